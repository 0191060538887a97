use anyhow::{bail, Context, Result};
use telemetry_collector::collector::{Collector, RunOutcome};
use telemetry_collector::config::{load_config, CollectorConfig};
use telemetry_collector::simulation::ScriptedSimulation;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetry_collector=info".into()),
        )
        .init();

    info!("Telemetry collector starting...");

    // Config path: first argument, then TELEMETRY_CONFIG, else defaults
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TELEMETRY_CONFIG").ok());

    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => CollectorConfig::default(),
    }
    .with_env_overrides();
    config.validate().context("Invalid configuration")?;

    let scenario = config
        .simulation
        .scenario
        .clone()
        .context("No scenario configured (set simulation.scenario or TELEMETRY_SCENARIO)")?;

    info!(
        config = config_path.as_deref().unwrap_or("<defaults>"),
        scenario = %scenario.display(),
        output_dir = %config.output.directory.display(),
        "Configuration loaded"
    );

    let simulation = ScriptedSimulation::load_from_file(&scenario)?;

    // Ctrl-C interrupts any pending simulation call and still finalizes the output
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping collection");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut collector = Collector::new(simulation, config);
    let report = collector.run(shutdown_rx).await?;

    match report.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Cancelled => {
            info!(output = %report.output.display(), "Run cancelled");
            Ok(())
        }
        RunOutcome::Aborted { reason } => {
            error!(output = %report.output.display(), reason = %reason, "Run aborted");
            bail!("run aborted: {}", reason)
        }
    }
}
