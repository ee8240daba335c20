//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Vulcan authorization service - external sign-in, access tokens and API keys
#[derive(Parser, Debug)]
#[command(name = "vulcan-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "VULCAN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "VULCAN_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "VULCAN_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "VULCAN_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "VULCAN_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Load and validate configuration, then print it with secrets redacted
    CheckConfig,

    /// Sign an activation token the way a registered application would
    SignActivation {
        /// Application secret key
        #[arg(long, env = "VULCAN_APP_SECRET")]
        secret: String,

        /// Activation key returned by sign-in
        #[arg(long)]
        activation_key: String,
    },
}
