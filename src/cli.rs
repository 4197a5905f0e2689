//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Pluggable API key and JWT authentication in front of HTTP services
#[derive(Parser, Debug)]
#[command(name = "authgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTHGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTHGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTHGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AUTHGATE_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTHGATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the authentication server (default)
    Serve,

    /// Validate the configuration and print the enabled schemes
    Check,
}
