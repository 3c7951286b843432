use std::sync::Arc;

use crate::api::BackendClient;
use crate::config::ClientConfig;
use crate::counter::Counter;
use crate::database::Database;
use crate::error::{ApplicationError, ConnectDatabaseSnafu};
use crate::identity::Toolkit;
use crate::prelude::*;
use crate::session::Session;

/// Every client-side service, built once at startup and handed to whoever needs it.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: ClientConfig,
    pub database: Database,
    pub session: Arc<Session>,
    pub counter: Counter,
    pub backend: BackendClient,
}

impl AppContext {
    /// Connect to the configured database and assemble the context around it.
    pub async fn connect(config: ClientConfig) -> Result<Self, ApplicationError> {
        let database = Database::connect(&config.database)
            .await
            .context(ConnectDatabaseSnafu)?;

        Ok(Self::with_database(config, database, Backoff::default()))
    }

    pub fn with_database(config: ClientConfig, database: Database, backoff: Backoff) -> Self {
        let toolkit = Toolkit::new(&config.identity);
        let session = Session::new(toolkit, backoff, config.initial_auth_token.clone());
        let counter = Counter::new(database.clone(), config.app_id.clone(), backoff);
        let backend = BackendClient::new(config.backend_url.clone());

        Self {
            config,
            database,
            session: Arc::new(session),
            counter,
            backend,
        }
    }

    /// Sign out locally and close the database connection.
    pub async fn shutdown(self) {
        self.session.sign_out();

        if let Err(err) = self.database.invalidate().await {
            tracing::warn!("cannot invalidate the database session: {err}");
        }

        tracing::info!("client context shut down");
    }
}
