use std::net::SocketAddr;

use snafu::{Location, Snafu};

use crate::database::DatabaseError;
use crate::identity::ServiceAccountError;
use crate::repl::ReplError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ApplicationError {
    /// Could not read the configuration from the environment
    ConfigLoad {
        source: envy::Error,
        #[snafu(implicit)]
        location: Location,
    },

    ConnectDatabase {
        source: DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not serve the application
    WebServer {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not bind to the given address, check if it's already in use
    BindAddress {
        address: SocketAddr,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not initialize the logger
    InitializeLogger {
        source: tracing::subscriber::SetGlobalDefaultError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not load the service account credentials
    ServiceAccount {
        source: ServiceAccountError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not mint a custom token
    MintToken {
        uid: String,
        source: ServiceAccountError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("{source}"))]
    Repl {
        source: ReplError,
        #[snafu(implicit)]
        location: Location,
    },
}
