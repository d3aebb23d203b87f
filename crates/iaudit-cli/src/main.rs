mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::Cli;
use iaudit_config::{Settings, SettleUnits};
use iaudit_publisher::AmqpPublisher;
use iaudit_store::PostgresStore;
use iaudit_verifier::{Verifier, VerifierConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "verifier exited with an unrecoverable error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let settle_units = SettleUnits::parse(&cli.settle_units)?;
    let config = VerifierConfig {
        tick_time: Duration::from_secs(cli.tick_time),
        settle_time: settle_units.to_duration(cli.settle_time),
        pool_size: cli.pool_size,
        run_once: cli.run_once,
    };

    info!(
        tick_time = cli.tick_time,
        settle_time = cli.settle_time,
        settle_units = cli.settle_units.as_str(),
        pool_size = cli.pool_size,
        run_once = cli.run_once,
        "starting exists verifier"
    );

    let store = Arc::new(PostgresStore::connect(&settings.database_url).await?);

    let publisher: Option<Arc<dyn iaudit_verifier::Publisher>> = Some(Arc::new(
        AmqpPublisher::connect(
            store.clone(),
            &settings.amqp_url,
            &settings.publish_exchange,
            settings.publish_routing_keys.clone(),
        )
        .await?,
    ));

    let verifier = Verifier::new(store, publisher, config);
    verifier.run().await?;

    info!("verifier shut down cleanly");
    Ok(())
}
