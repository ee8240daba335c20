//! Vulcan - authorization service for external sign-in, access tokens and API keys

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use vulcan_auth::{
    auth::activation::sign_activation,
    cli::{Cli, Command},
    config::Config,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Command::CheckConfig) => check_config(&cli),
        Some(Command::SignActivation {
            ref secret,
            ref activation_key,
        }) => sign(secret, activation_key),
        Some(Command::Serve) | None => run_server(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load configuration and apply CLI overrides.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
    Ok(config)
}

fn check_config(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let yaml = serde_yaml::to_string(&config.redacted()).context("Failed to render configuration")?;
    println!("{yaml}");
    Ok(())
}

fn sign(secret: &str, activation_key: &str) -> anyhow::Result<()> {
    let token = sign_activation(activation_key, secret).context("Failed to sign activation token")?;
    println!("{token}");
    Ok(())
}

async fn run_server(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        providers = config.providers.len(),
        "Starting Vulcan"
    );

    let server = Server::new(config).await.context("Failed to build server")?;
    server.run().await.context("Server error")?;
    Ok(())
}
