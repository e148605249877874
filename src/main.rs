//! cmdrelay: a line-oriented command server with a chat relay
//!
//! Runs as either side of the connection:
//! - server: accepts peers, runs filesystem commands against each peer's own
//!   working directory and relays every other line to the remaining peers
//! - client: pipes stdin/stdout over one connection to a server
//!
//! Configuration via CLI arguments or TOML file.

mod commands;
mod config;
mod connection;
mod peer;
mod protocol;
mod registry;
mod server;
mod session;

use config::{Config, ConfigError, Instance};
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match config.instance {
        Instance::Server => runtime.block_on(run_server(config)),
        Instance::Client => runtime.block_on(run_client(config)),
    }
}

async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        network = ?config.network,
        address = %config.address,
        ports = ?config.ports,
        root = %config.root.display(),
        max_connections = config.max_connections,
        "Starting cmdrelay server"
    );

    let server = Server::new(config);
    server.run().await?;
    Ok(())
}

async fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // The client only ever dials the first port.
    let endpoint = config
        .endpoints()
        .into_iter()
        .next()
        .ok_or(ConfigError::NoPorts)?;
    info!(network = ?config.network, endpoint = %endpoint, "Starting cmdrelay client");

    session::run(&endpoint).await?;
    Ok(())
}
