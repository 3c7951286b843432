use serde::Deserialize;
use snafu::{Location, ResultExt, Snafu};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth;
use surrealdb::Surreal;
use tracing::instrument;
use url::Url;

/// Helper for executing arbitrary SurrealQL queries.
pub mod query;

pub use query::{Bindings, QueryError, Sql};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DatabaseError {
    #[snafu(display("cannot connect to the database `{url}`: {source}"))]
    Connect {
        url: Url,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("cannot sign in to the database as `{username}`: {source}"))]
    SignIn {
        username: String,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("cannot use namespace `{namespace}` and database `{database}`: {source}"))]
    Select {
        namespace: String,
        database: String,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "surreal_url", default = "default_url")]
    pub url: Url,
    #[serde(rename = "surreal_ns", default = "default_namespace")]
    pub namespace: String,
    #[serde(rename = "surreal_db", default = "default_database")]
    pub database: String,
    #[serde(flatten)]
    pub credentials: Option<DatabaseCredentials>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            namespace: default_namespace(),
            database: default_database(),
            credentials: None,
        }
    }
}

fn default_url() -> Url {
    Url::parse("mem://").expect("`mem://` is a valid url")
}

fn default_namespace() -> String {
    "clicker".into()
}

fn default_database() -> String {
    "clicker".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseCredentials {
    #[serde(rename = "surreal_user")]
    pub username: String,
    #[serde(rename = "surreal_pass")]
    pub password: String,
}

/// A connected SurrealDB handle. Cheap to clone, every clone shares the same connection.
#[derive(Debug, Clone)]
pub struct Database {
    inner: Surreal<Any>,
}

impl Database {
    /// Connect to the database described by `config`, sign in when credentials are given and
    /// select the configured namespace and database.
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let inner = surrealdb::engine::any::connect(config.url.as_str())
            .await
            .context(ConnectSnafu {
                url: config.url.clone(),
            })?;

        if let Some(credentials) = &config.credentials {
            inner
                .signin(auth::Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username: &credentials.username,
                    password: &credentials.password,
                })
                .await
                .context(SignInSnafu {
                    username: &credentials.username,
                })?;
        }

        inner
            .use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .context(SelectSnafu {
                namespace: &config.namespace,
                database: &config.database,
            })?;

        tracing::info!(
            namespace = %config.namespace,
            database = %config.database,
            "connected to the database"
        );

        Ok(Self { inner })
    }

    /// An empty in-memory database.
    pub async fn memory() -> Result<Self, DatabaseError> {
        Self::connect(&DatabaseConfig::default()).await
    }
}

impl std::ops::Deref for Database {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
