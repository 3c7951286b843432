use std::sync::Arc;

use clap::{Parser, Subcommand};
use clicker::api;
use clicker::config::ServerConfig;
use clicker::error::{ApplicationError, MintTokenSnafu, ServiceAccountSnafu};
use clicker::identity::{KeyStore, ServiceAccount, Verifier};
use clicker::logger;
use dotenvy::dotenv;
use snafu::ResultExt;

#[derive(Debug, Parser)]
#[command(version, about = "Backend for the clicker demo")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (the default)
    Serve,
    /// Print a custom token for `uid`, usable as the client's CLICKER_INITIAL_AUTH_TOKEN
    MintToken { uid: String },
}

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    dotenv().ok();

    let cli = Cli::parse();
    let config = ServerConfig::from_env()?;

    let _guard = logger::init(&config.log_dir, "clicker-backend.log")?;

    let account = ServiceAccount::new(
        config.project_id.clone(),
        config.client_email.clone(),
        &config.private_key,
    )
    .context(ServiceAccountSnafu)?;

    tracing::info!(
        project_id = %account.project_id,
        client_email = %account.client_email,
        "loaded service account"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let keys = KeyStore::remote(config.jwks_url.clone());
            let verifier = Verifier::new(config.project_id.clone(), keys);

            api::serve(config.port, Arc::new(verifier)).await
        }
        Command::MintToken { uid } => {
            let token = account
                .custom_token(&uid)
                .context(MintTokenSnafu { uid: uid.clone() })?;

            println!("{token}");
            Ok(())
        }
    }
}
