use anyhow::Result;
use clap::Parser;

use logsluice_core::config::LogsluiceConfig;
use logsluice_daemon::cli::{Command, DaemonCli};
use logsluice_daemon::commands;
use logsluice_daemon::logging::init_tracing;
use logsluice_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // file -> env -> CLI
    let mut config = LogsluiceConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    init_tracing(&config.general)?;

    match cli.command() {
        Command::Run => {
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                config = %cli.config.display(),
                "logsluice-daemon starting"
            );
            let mut orchestrator = Orchestrator::build_from_config(config).await?;
            orchestrator.run().await?;
            tracing::info!("logsluice-daemon shut down");
        }
        Command::Ingest { file } => {
            commands::ingest(&config, &file, &mut std::io::stdout()).await?;
        }
        Command::DeadLetters { limit } => {
            commands::dead_letters(&config, limit, &mut std::io::stdout()).await?;
        }
    }

    Ok(())
}
