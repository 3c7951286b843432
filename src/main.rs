use clicker::config::ClientConfig;
use clicker::context::AppContext;
use clicker::dashboard::Dashboard;
use clicker::error::{ApplicationError, ReplSnafu};
use clicker::logger;
use clicker::repl::{self, Repl};
use dotenvy::dotenv;
use snafu::ResultExt;

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    dotenv().ok();

    let config = ClientConfig::from_env()?;

    let _guard = logger::init(&config.log_dir, "clicker.log")?;

    let context = AppContext::connect(config).await?;

    if let Err(err) = context.session.start().await {
        tracing::error!("authentication error during initial setup: {err}");
    }

    let mut dashboard = Dashboard::new(context.clone());
    let mut shell = Repl::new().context(ReplSnafu)?;
    let result = repl::start(&mut shell, &mut dashboard).await;

    dashboard.shutdown().await;
    context.shutdown().await;

    result.context(ReplSnafu)
}
