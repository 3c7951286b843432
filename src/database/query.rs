use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};
use surrealdb::engine::any::Any;
use surrealdb::opt::QueryResult;

use super::Database;
use crate::retry::Exhaustion;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    #[snafu(display("query failed: {source}"))]
    Execute { source: surrealdb::Error },

    #[snafu(display("failed to deserialize the query response: {source}"))]
    Deserialize { source: surrealdb::Error },
}

impl Exhaustion for QueryError {
    /// Write conflicts between concurrent transactions are transient, the statement can be
    /// repeated as is.
    fn is_resource_exhausted(&self) -> bool {
        let (QueryError::Execute { source } | QueryError::Deserialize { source }) = self;
        match source {
            surrealdb::Error::Db(surrealdb::error::Db::TxFailure) => true,
            surrealdb::Error::Db(surrealdb::error::Db::Tx(message)) => {
                message.to_ascii_lowercase().contains("conflict")
            }
            _ => false,
        }
    }
}

/// An extension trait that allows you to execute raw SQL queries. Parameters can be bound using
/// the [Bindings::bind] method which takes any serializable data structure.
///
/// # Example
/// ```ignore
/// let record: Option<CounterRecord> = database
///     .sql("SELECT * FROM type::thing($table, $path)")
///     .bind(("table", "user_data"))
///     .bind(("path", "artifacts/app/users/alice/user_data/click_count"))
///     .fetch_first()
///     .await?;
/// ```
pub trait Sql<'a> {
    fn sql(&'a self, query: &str) -> Bindings<'a>;
}

impl<'a> Sql<'a> for Database {
    fn sql(&'a self, query: &str) -> Bindings<'a> {
        Bindings {
            query: self.query(query.to_owned()),
        }
    }
}

#[derive(Debug)]
pub struct Bindings<'a> {
    query: surrealdb::method::Query<'a, Any>,
}

impl Bindings<'_> {
    pub fn bind(mut self, params: impl serde::Serialize) -> Self {
        let query = self.query;
        self.query = query.bind(params);
        self
    }

    /// Execute the query and return the raw [surrealdb::Response].
    pub async fn execute(self) -> Result<surrealdb::Response, QueryError> {
        let response = self.query.await.context(ExecuteSnafu)?;
        tracing::trace!(?response, "executed query");
        Ok(response)
    }

    /// Execute the query and deserialize the result of the first statement.
    pub async fn fetch_first<T: DeserializeOwned>(self) -> Result<T, QueryError>
    where
        usize: QueryResult<T>,
    {
        let mut statements = self.execute().await?;
        statements.take::<T>(0).context(DeserializeSnafu)
    }
}
