//! Daemon orchestration -- assembly, channel wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `vulnpost-daemon`.
//! It validates configuration, builds the export collector over the real
//! HTTP client, wires the finding channel to the downstream consumer (a
//! structured-log emitter), and manages startup, signal-driven shutdown,
//! and PID file handling.
//!
//! # Event Flow
//!
//! ```text
//! ExportCollector --mpsc--> finding logger task --> tracing log records
//! ```

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use vulnpost_collector::{
    ExportCollector, ExportCollectorBuilder, ExportCollectorConfig, GitlabExportClient,
};
use vulnpost_core::config::VulnpostConfig;
use vulnpost_core::event::{Event, FindingEvent};
use vulnpost_core::metrics as m;
use vulnpost_core::pipeline::Pipeline;
use vulnpost_core::types::Severity;

use crate::health::{DaemonHealth, ModuleHealth, aggregate_status};
use crate::metrics_server;

/// Interval between periodic health log lines.
const HEALTH_LOG_INTERVAL_SECS: u64 = 30;

/// The main daemon orchestrator.
///
/// Owns the collector and the finding consumer for the lifetime of the
/// process.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: VulnpostConfig,
    /// The export collector over the production HTTP client.
    collector: ExportCollector<GitlabExportClient>,
    /// Finding receiver, consumed when the logger task is spawned.
    finding_rx: Option<mpsc::Receiver<FindingEvent>>,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("finding_rx", &self.finding_rx.is_some())
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Load configuration from a file and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read, parsed, or
    /// validated, or if the collector fails to initialize.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = VulnpostConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// Useful for testing or when config has already been loaded.
    pub async fn build_from_config(config: VulnpostConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before the collector starts recording
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
            record_daemon_metrics();
        }

        tracing::info!("initializing export collector");
        let collector_config = ExportCollectorConfig::from_core(&config)
            .map_err(|e| anyhow::anyhow!("invalid collector config: {}", e))?;
        let client = GitlabExportClient::new(&config.api)
            .map_err(|e| anyhow::anyhow!("failed to build export client: {}", e))?;
        let (collector, finding_rx) = ExportCollectorBuilder::new()
            .config(collector_config)
            .api_client(std::sync::Arc::new(client))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build export collector: {}", e))?;

        let (shutdown_tx, _) = broadcast::channel(16);

        tracing::info!("orchestrator initialized");

        Ok(Self {
            config,
            collector,
            finding_rx,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the collector and block until a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        // Write PID file if configured
        if !self.config.general.pid_file.is_empty() {
            let path = Path::new(&self.config.general.pid_file);
            write_pid_file(path)?;
        }

        // Spawn the downstream consumer before the producer starts
        let finding_logger_task = self.spawn_consumer();

        tracing::info!("starting export collector");
        if let Err(e) = self.collector.start().await {
            tracing::error!(error = %e, "collector startup failed");
            if !self.config.general.pid_file.is_empty() {
                remove_pid_file(Path::new(&self.config.general.pid_file));
            }
            return Err(e.into());
        }

        // Main event loop: wait for a shutdown signal, logging health
        // periodically in between.
        tracing::info!("vulnpost-daemon running");
        let signal = self.wait_for_shutdown().await?;
        tracing::info!(signal, "shutdown signal received");

        // Initiate shutdown: stop the producer first so the consumer can
        // drain remaining findings from the channel.
        if let Err(e) = self.collector.stop().await {
            tracing::error!(error = %e, "failed to stop export collector");
        }

        tracing::info!("broadcasting shutdown signal to background tasks");
        let _ = self.shutdown_tx.send(());
        if let Some(task) = finding_logger_task {
            let _ = task.await;
        }

        // Remove PID file
        if !self.config.general.pid_file.is_empty() {
            remove_pid_file(Path::new(&self.config.general.pid_file));
        }

        tracing::info!("vulnpost-daemon shut down");
        Ok(())
    }

    /// Run a single poll tick and exit (the `--once` flag).
    pub async fn run_once(&mut self) -> Result<()> {
        let finding_logger_task = self.spawn_consumer();

        let report = self
            .collector
            .poll_once()
            .await
            .map_err(|e| anyhow::anyhow!("poll tick failed: {}", e))?;
        tracing::info!(
            records = report.records,
            emitted = report.emitted,
            skipped = report.skipped,
            "single poll tick completed"
        );

        let _ = self.shutdown_tx.send(());
        if let Some(task) = finding_logger_task {
            let _ = task.await;
        }
        Ok(())
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let collector_status = self.collector.health_check().await;
        let modules = vec![ModuleHealth {
            name: "export-collector".to_owned(),
            enabled: true,
            status: collector_status,
        }];

        let overall_status = aggregate_status(&modules);
        let uptime_secs = self.start_time.elapsed().as_secs();

        if self.config.metrics.enabled {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status: overall_status,
            uptime_secs,
            modules,
        }
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &VulnpostConfig {
        &self.config
    }

    fn spawn_consumer(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        self.finding_rx.take().map(|finding_rx| {
            let shutdown_rx = self.shutdown_tx.subscribe();
            spawn_finding_logger(finding_rx, shutdown_rx)
        })
    }

    /// Wait for SIGTERM/SIGINT, logging aggregated health in between.
    async fn wait_for_shutdown(&self) -> Result<&'static str> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

        let mut health_interval = tokio::time::interval(tokio::time::Duration::from_secs(
            HEALTH_LOG_INTERVAL_SECS,
        ));
        health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sigterm.recv() => return Ok("SIGTERM"),
                _ = sigint.recv() => return Ok("SIGINT"),
                _ = health_interval.tick() => {
                    let health = self.health().await;
                    tracing::debug!(
                        status = %health.status,
                        uptime_secs = health.uptime_secs,
                        ticks = self.collector.ticks_completed(),
                        tick_failures = self.collector.tick_failures(),
                        state_entries = self.collector.state_entries(),
                        "daemon health"
                    );
                }
            }
        }
    }
}

/// Spawn the downstream consumer: a task that emits one structured log
/// record per accepted finding.
///
/// Severity maps to the log level (Critical/High -> warn, others -> info)
/// so downstream log tooling can alert on it directly.
fn spawn_finding_logger(
    mut finding_rx: mpsc::Receiver<FindingEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                finding_result = finding_rx.recv() => {
                    match finding_result {
                        Some(event) => log_finding(&event),
                        None => {
                            tracing::debug!("finding channel closed, exiting consumer");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    // Drain whatever the collector already handed off
                    while let Ok(event) = finding_rx.try_recv() {
                        log_finding(&event);
                    }
                    tracing::debug!("finding consumer shutting down");
                    break;
                }
            }
        }
    })
}

fn log_finding(event: &FindingEvent) {
    let finding = &event.finding;
    let attributes = serde_json::to_string(&finding.attributes).unwrap_or_default();

    match finding.severity {
        Severity::Critical | Severity::High => {
            tracing::warn!(
                event_id = %event.event_id(),
                trace_id = %event.metadata.trace_id,
                target_id = %finding.target_id,
                export_id = finding.export_id,
                severity = %finding.severity,
                title = %finding.title,
                detected_at = %finding.detected_at.to_rfc3339(),
                attributes = %attributes,
                "vulnerability finding"
            );
        }
        _ => {
            tracing::info!(
                event_id = %event.event_id(),
                trace_id = %event.metadata.trace_id,
                target_id = %finding.target_id,
                export_id = finding.export_id,
                severity = %finding.severity,
                title = %finding.title,
                detected_at = %finding.detected_at.to_rfc3339(),
                attributes = %attributes,
                "vulnerability finding"
            );
        }
    }
}

/// Record daemon-level build metrics.
///
/// This should be called once during orchestrator initialization.
fn record_daemon_metrics() {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file (prevents TOCTOU races)
/// - Verifies the created file is a regular file (prevents symlink attacks)
/// - Creates the parent directory with restrictive permissions (0o700)
///
/// # Errors
///
/// Returns an error if the PID file cannot be written.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    // Create parent directory with restrictive permissions (0o700)
    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    // Atomically create the file only if it doesn't exist (eliminates TOCTOU race)
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            // File already exists, read the existing PID for the error message
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    // Verify the created file is a regular file (not a symlink or other special file)
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    // Set restrictive permissions on the PID file (0o600)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        file.set_permissions(permissions)?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}
