//! Service Bootstrap and Initialization
//!
//! Command-line arguments and logging setup. Configuration itself lives in
//! [`crate::config`].

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::Level;

use crate::config::ServiceConfig;

/// Command-line arguments for inspsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "inspsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Visual Inspection Service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(
        short = 'c',
        long,
        env = "INSPSRV_CONFIG",
        default_value = "config/inspsrv.yaml"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Enable debug mode
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// `--debug` wins over `--log-level`; unknown levels fall back to INFO
    pub fn parse_log_level(&self) -> Level {
        if self.debug {
            return Level::DEBUG;
        }
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}

/// Initialize logging for the service.
///
/// Log root directory priority:
/// 1. INSPECTION_LOG_DIR environment variable
/// 2. `service.log_dir` from the config file
/// 3. Default "logs"
pub fn initialize_logging(args: &Args, service: &ServiceConfig) -> Result<()> {
    common::logging::init_log_root(service.log_dir.as_deref());

    let log_config = common::logging::LogConfig {
        service_name: service.name.clone(),
        log_dir: common::logging::get_log_root().join(&service.name),
        console_level: args.parse_log_level(),
        enable_json: false,
        ansi: !args.no_color,
        ..Default::default()
    };

    common::logging::init_with_config(log_config)
        .map_err(|e| anyhow!("Failed to init logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["inspsrv"]);
        assert_eq!(args.config, PathBuf::from("config/inspsrv.yaml"));
        assert_eq!(args.parse_log_level(), Level::INFO);
        assert!(!args.validate);
    }

    #[test]
    fn test_log_level_selection() {
        let args = Args::parse_from(["inspsrv", "-l", "warn", "--no-color"]);
        assert_eq!(args.parse_log_level(), Level::WARN);
        assert!(args.no_color);

        let args = Args::parse_from(["inspsrv", "-l", "warn", "--debug"]);
        assert_eq!(args.parse_log_level(), Level::DEBUG);

        let args = Args::parse_from(["inspsrv", "-l", "loud"]);
        assert_eq!(args.parse_log_level(), Level::INFO);
    }

    #[test]
    fn test_config_flag() {
        let args = Args::parse_from(["inspsrv", "--config", "/etc/inspsrv.toml", "--validate"]);
        assert_eq!(args.config, PathBuf::from("/etc/inspsrv.toml"));
        assert!(args.validate);
    }
}
