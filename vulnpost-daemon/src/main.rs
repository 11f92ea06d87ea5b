use anyhow::Result;
use clap::Parser;

use vulnpost_core::config::VulnpostConfig;
use vulnpost_daemon::cli::DaemonCli;
use vulnpost_daemon::logging;
use vulnpost_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = VulnpostConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;

    // CLI 인자는 설정 파일과 환경변수보다 우선함
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
    if let Some(pid_file) = &cli.pid_file {
        config.general.pid_file = pid_file.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "vulnpost-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;

    if cli.once {
        orchestrator.run_once().await
    } else {
        orchestrator.run().await
    }
}
