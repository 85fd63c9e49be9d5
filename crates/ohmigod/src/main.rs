use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use ohmigod::Config;
use ohmigod::Engine;
use ohmigod::LogLevel;
use ohmigod::api;
use ohmigod::integrations::ohmonwifi::HttpDeviceClient;
use ohmigod::integrations::ohmonwifi::manual_pairing;
use tokio::sync::oneshot;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Home automation daemon for OhmOnWifi temperature emulators
#[derive(Parser)]
#[command(name = "ohmigod", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "ohmigod.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run,

    /// Ask the device at ADDRESS who it is and print its pairing candidate
    Probe {
        address: String,

        #[arg(long, default_value = "http")]
        protocol: String,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

fn init_tracing(targets: Targets) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(targets)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&cli.config, cli.log_level).await,
        Command::Probe {
            address,
            protocol,
            timeout,
        } => {
            init_tracing(Targets::new().with_default(cli.log_level.unwrap_or(LogLevel::Warn)));
            probe(address, protocol, Duration::from_secs(timeout)).await
        }
    }
}

async fn run(config_path: &Path, log_level: Option<LogLevel>) -> anyhow::Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    init_tracing(config.logging.targets(log_level));

    tracing::info!("ohmigod starting");
    tracing::info!("Loaded config from: {}", config_path.display());

    let mut engine = Engine::new();
    engine.register_integrations_from_config(&config);
    let engine = Arc::new(engine);

    let runner = engine.clone();
    let engine_task = tokio::spawn(async move { runner.run().await });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut api_task = tokio::spawn(api::serve(
        config.api.listen.clone(),
        config.api.port,
        engine.clone(),
        shutdown_rx,
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(());
            match api_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("HTTP API server failed: {}", e),
                Err(e) => tracing::error!("HTTP API task failed: {}", e),
            }
        }
        result = &mut api_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP API server stopped"),
                Ok(Err(e)) => tracing::error!("HTTP API server failed: {}", e),
                Err(e) => tracing::error!("HTTP API task failed: {}", e),
            }
        }
    }

    engine.shutdown().await;
    engine_task.abort();

    tracing::info!("ohmigod stopped");
    Ok(())
}

async fn probe(address: String, protocol: String, timeout: Duration) -> anyhow::Result<()> {
    let client = HttpDeviceClient::new(protocol, address.clone(), timeout)
        .context("Failed to create HTTP client")?;

    let candidate = manual_pairing(&client)
        .await
        .with_context(|| format!("Failed to identify device at {}", address))?;

    println!("{}", serde_json::to_string_pretty(&candidate)?);
    Ok(())
}
