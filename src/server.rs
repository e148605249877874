//! TCP server accepting peers.
//!
//! Binds one listener per configured port, accepts connections on all of
//! them and hands each connection to its own handler task. All listeners
//! share one peer table, so chat reaches peers regardless of the port they
//! came in on.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::connection::Connection;
use crate::peer::PeerTable;
use crate::registry::CommandRegistry;

/// Listen backlog for server sockets
const LISTEN_BACKLOG: i32 = 1024;

/// State shared by the accept loops and every connection handler
pub struct ServerState {
    pub registry: CommandRegistry,
    pub peers: PeerTable,
    /// Starting directory for every peer
    pub root: PathBuf,
    /// Pause between `:echo` phases
    pub echo_delay: Duration,
}

impl ServerState {
    pub fn new(config: &Config) -> Self {
        ServerState {
            registry: CommandRegistry::with_defaults(),
            peers: PeerTable::new(),
            root: config.root.clone(),
            echo_delay: config.echo_delay,
        }
    }
}

/// Server instance
pub struct Server {
    config: Config,
    shared: Arc<ServerState>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let shared = Arc::new(ServerState::new(&config));
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            shared,
            connection_limit,
        }
    }

    /// Bind every configured endpoint and serve until the process ends.
    ///
    /// Failing to bind any endpoint is fatal.
    pub async fn run(&self) -> Result<(), ServerError> {
        let mut listeners = Vec::with_capacity(self.config.ports.len());
        for endpoint in self.config.endpoints() {
            listeners.push(self.bind(&endpoint).await?);
        }

        let mut accept_loops = JoinSet::new();
        for listener in listeners {
            let server = self.clone_handle();
            accept_loops.spawn(async move { server.serve(listener).await });
        }

        while let Some(result) = accept_loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Accept loop terminated");
            }
        }
        Ok(())
    }

    /// Resolve `endpoint` and bind a listener on the first address that works.
    pub async fn bind(&self, endpoint: &str) -> Result<TcpListener, ServerError> {
        debug!(network = ?self.config.network, endpoint, "Binding");
        let addrs = tokio::net::lookup_host(endpoint)
            .await
            .map_err(|e| ServerError::Resolve(endpoint.to_string(), e))?;

        let mut last_error = None;
        for addr in addrs {
            match create_listener(addr) {
                Ok(listener) => {
                    info!(address = %addr, "Server listening");
                    return Ok(listener);
                }
                Err(e) => {
                    debug!(address = %addr, error = %e, "Bind attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(ServerError::Bind(
            endpoint.to_string(),
            last_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
            }),
        ))
    }

    /// Accept connections forever. A failed accept is logged and skipped.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            let permit = match self.connection_limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "Connection limiter closed");
                    return;
                }
            };

            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");
                    let (reader, writer) = stream.into_split();
                    let conn = Connection::open(reader, writer, addr, Arc::clone(&self.shared));

                    tokio::spawn(async move {
                        conn.run().await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// State shared with connection handlers
    #[cfg(test)]
    pub fn shared(&self) -> &Arc<ServerState> {
        &self.shared
    }

    fn clone_handle(&self) -> Server {
        Server {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            connection_limit: Arc::clone(&self.connection_limit),
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

/// Server startup errors
#[derive(Debug)]
pub enum ServerError {
    Resolve(String, std::io::Error),
    Bind(String, std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Resolve(endpoint, e) => {
                write!(f, "Failed to resolve '{}': {}", endpoint, e)
            }
            ServerError::Bind(endpoint, e) => {
                write!(f, "Failed to listen on '{}': {}", endpoint, e)
            }
        }
    }
}

impl std::error::Error for ServerError {}
