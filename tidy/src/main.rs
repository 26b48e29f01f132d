//! Quire Tidy - runs one cleanup pass over the notebook collection.
//!
//! Logs go to stderr; the run report is printed to stdout as JSON.

use quire_tidy::{Backend, Config, PgStore, RestStore, RunReport, Runner, TidyError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quire_tidy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let report = run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn run() -> Result<RunReport, TidyError> {
    let config = Config::from_env()?;

    tracing::info!(
        table = %config.table,
        dry_run = config.dry_run,
        "Starting notebook cleanup"
    );

    match &config.backend {
        Backend::Rest { url, api_key } => {
            let store = RestStore::new(url, api_key, config.request_timeout)?;
            let runner = Runner::new(&store, config.run_options()).with_assets(&store);
            runner.run().await
        }
        Backend::Postgres { database_url } => {
            let mut options = config.run_options();
            if options.purge_assets {
                tracing::warn!("Asset purge needs STORE_REST_URL; skipping it for this run");
                options.purge_assets = false;
            }
            let store = PgStore::connect(database_url).await?;
            let runner = Runner::new(&store, options);
            runner.run().await
        }
    }
}
