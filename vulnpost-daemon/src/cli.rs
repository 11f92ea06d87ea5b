//! CLI argument definitions for vulnpost-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Vulnpost vulnerability export daemon.
///
/// Periodically drives vulnerability exports for the configured target and
/// relays new or changed findings downstream as structured events.
#[derive(Parser, Debug)]
#[command(name = "vulnpost-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to vulnpost.toml configuration file.
    #[arg(short, long, default_value = "/etc/vulnpost/vulnpost.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Run a single poll tick and exit (smoke testing).
    #[arg(long)]
    pub once: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_path() {
        let cli = DaemonCli::parse_from(["vulnpost-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/vulnpost/vulnpost.toml"));
        assert!(!cli.validate);
        assert!(!cli.once);
    }

    #[test]
    fn parses_overrides() {
        let cli = DaemonCli::parse_from([
            "vulnpost-daemon",
            "--config",
            "/tmp/v.toml",
            "--log-level",
            "debug",
            "--once",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/v.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.once);
    }
}
