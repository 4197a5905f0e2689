//! authgate - API key and JWT authentication server

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use authgate::{
    cli::{Cli, Command},
    config::Config,
    server::AuthServer,
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
        Some(Command::Check) => run_check(&cli),
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

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Validate configuration and print a summary of the enabled schemes
fn run_check(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    config.validate().context("Invalid configuration")?;

    let auth = &config.auth;
    println!("Configuration OK");
    println!("  listen:   {}:{}", config.server.host, config.server.port);
    println!("  bypass:   {}", auth.bypass_paths.join(", "));
    if auth.api_key.enabled {
        println!(
            "  api_key:  mode={} header={} cache={}",
            auth.api_key.mode,
            auth.api_key.header_name,
            auth.api_key.mode.is_remote() && auth.api_key.cache.enabled
        );
    } else {
        println!("  api_key:  disabled");
    }
    if auth.jwt.enabled {
        println!(
            "  jwt:      mode={} cache={}",
            auth.jwt.mode,
            auth.jwt.mode.is_remote() && auth.jwt.cache.enabled
        );
    } else {
        println!("  jwt:      disabled");
    }
    Ok(())
}

async fn run_server(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        api_key = config.auth.api_key.enabled,
        jwt = config.auth.jwt.enabled,
        "Starting authgate"
    );

    let server = AuthServer::new(config).context("Failed to create server")?;
    server.run().await.context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
