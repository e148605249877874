//! Per-connection command loop.
//!
//! Each accepted connection is registered as a peer and then served by one
//! task running a small state machine:
//!
//! ```text
//! Active --(EOF | read error | :close | writer gone)--> Closing --> Closed
//! ```
//!
//! While `Active`, every line is dispatched in this order: registered
//! command, built-in verb, chat broadcast to everybody else. Registered
//! commands touch the filesystem synchronously, so they run on the blocking
//! pool rather than on the runtime's worker threads.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, Receiver};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::peer::Peer;
#[cfg(test)]
use crate::peer::PeerId;
use crate::protocol::{Builtin, Request, Response};
use crate::registry::{CommandError, WorkDir};
use crate::server::ServerState;

/// Chunk size used when streaming files with `:ftp`
const FTP_CHUNK_SIZE: usize = 16 * 1024;

/// Initial capacity of the line buffer
const LINE_CAPACITY: usize = 1024;

/// Payloads a peer may have queued before its own handler waits for the
/// writer, and before relayed chat to it is dropped
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Lifecycle of a connection handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reading and dispatching lines.
    Active,
    /// Leaving the peer table and closing the socket.
    Closing,
    /// Done; the task exits.
    Closed,
}

/// A registered peer together with the read side of its socket.
pub struct Connection<R> {
    reader: BufReader<R>,
    peer: Peer,
    state: ConnState,
    writer: JoinHandle<()>,
    shared: Arc<ServerState>,
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin,
{
    /// Register a new peer and start the task that owns its write half.
    ///
    /// The peer is visible to broadcasts as soon as this returns.
    pub fn open<W>(reader: R, writer: W, addr: SocketAddr, shared: Arc<ServerState>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let peer = shared.peers.add(addr, tx, WorkDir::new(&shared.root));

        let id = peer.id().clone();
        let writer = tokio::spawn(async move {
            if let Err(e) = write_loop(writer, rx).await {
                debug!(id = %id, error = %e, "Writer stopped");
            }
        });

        Connection {
            reader: BufReader::new(reader),
            peer,
            state: ConnState::Active,
            writer,
            shared,
        }
    }

    #[cfg(test)]
    pub fn peer_id(&self) -> &PeerId {
        self.peer.id()
    }

    /// Serve the peer until it disconnects or asks to close.
    pub async fn run(mut self) {
        info!(id = %self.peer.id(), peer = %self.peer.addr(), "Peer connected");

        let mut line = Vec::with_capacity(LINE_CAPACITY);
        while self.state == ConnState::Active {
            line.clear();
            self.state = match self.reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    trace!(id = %self.peer.id(), "Connection closed by peer");
                    ConnState::Closing
                }
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    trace!(id = %self.peer.id(), line = %text.trim_end(), "Received line");
                    match Request::parse(&text) {
                        Some(request) => self.dispatch(request).await,
                        None => ConnState::Active,
                    }
                }
                Err(e) => {
                    debug!(id = %self.peer.id(), error = %e, "Read failed");
                    ConnState::Closing
                }
            };
        }

        self.close().await;
    }

    /// Remove the peer and wait for its writer to flush and shut down.
    async fn close(mut self) {
        self.state = ConnState::Closed;
        let Connection {
            peer,
            writer,
            shared,
            state,
            ..
        } = self;

        shared.peers.remove(peer.id());
        let (id, addr, requested) = (peer.id().clone(), peer.addr(), !peer.connected);

        // Dropping the last sender ends the writer loop, which shuts the
        // socket down once.
        drop(peer);
        let _ = writer.await;

        info!(id = %id, peer = %addr, requested, ?state, "Peer disconnected");
    }

    async fn dispatch(&mut self, request: Request) -> ConnState {
        if let Some(handler) = self.shared.registry.resolve(&request.command) {
            debug!(id = %self.peer.id(), command = %request.command, "Invoking command");
            let mut cwd = self.peer.cwd.clone();
            let args = request.args;
            let outcome = tokio::task::spawn_blocking(move || {
                let result = handler(&mut cwd, &args);
                (cwd, result)
            })
            .await;

            let payload = match outcome {
                Ok((cwd, Ok(payload))) => {
                    self.peer.cwd = cwd;
                    payload
                }
                Ok((_, Err(CommandError::Unimplemented(feature)))) => {
                    warn!(id = %self.peer.id(), feature, "Unimplemented command requested");
                    Response::unavailable(feature)
                }
                Err(e) => {
                    warn!(id = %self.peer.id(), command = %request.command, error = %e, "Command task failed");
                    Response::notice(Response::COMMAND_FAILED)
                }
            };
            return self.reply(payload).await;
        }

        match request.builtin() {
            Some(Builtin::Ftp) => self.ftp(&request.args).await,
            Some(Builtin::Close) => {
                self.peer.connected = false;
                ConnState::Closing
            }
            Some(Builtin::Echo) => {
                let text = request.args.join(" ");
                self.echo(&text, self.shared.echo_delay).await
            }
            Some(Builtin::Send) => {
                warn!(id = %self.peer.id(), "Peer-to-peer transfer requested");
                self.reply(Response::unavailable(Builtin::Send.name())).await
            }
            None => {
                let delivered = self
                    .shared
                    .peers
                    .broadcast(self.peer.id(), &Response::chat(&request.line));
                trace!(id = %self.peer.id(), delivered, "Broadcast message");
                ConnState::Active
            }
        }
    }

    async fn reply(&self, payload: Bytes) -> ConnState {
        match self.peer.send(payload).await {
            Ok(()) => ConnState::Active,
            Err(_) => ConnState::Closing,
        }
    }

    /// Stream a file from the peer's directory back to it.
    async fn ftp(&self, args: &[String]) -> ConnState {
        let Some(path) = args.first() else {
            return self.reply(Response::notice(Response::FILE_NOT_SPECIFIED)).await;
        };

        let target = self.peer.cwd.join(path);
        let mut file = match File::open(&target).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %target.display(), error = %e, ":ftp open failed");
                return self.reply(Response::notice(Response::FILE_NOT_FOUND)).await;
            }
        };
        match file.metadata().await {
            Ok(meta) if meta.is_file() => {}
            _ => return self.reply(Response::notice(Response::FILE_NOT_FOUND)).await,
        }

        let mut sent = 0usize;
        let mut buf = BytesMut::with_capacity(FTP_CHUNK_SIZE);
        loop {
            buf.reserve(FTP_CHUNK_SIZE);
            match file.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    sent += n;
                    if self.peer.send(buf.split().freeze()).await.is_err() {
                        return ConnState::Closing;
                    }
                }
                Err(e) => {
                    warn!(path = %target.display(), error = %e, ":ftp read failed");
                    break;
                }
            }
        }

        debug!(id = %self.peer.id(), path = %target.display(), bytes = sent, "File sent");
        ConnState::Active
    }

    /// Write `text` shouted, plain and whispered, pausing between phases.
    async fn echo(&self, text: &str, delay: Duration) -> ConnState {
        let phases = [text.to_uppercase(), text.to_string(), text.to_lowercase()];
        for (i, phase) in phases.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            if self.peer.send(Response::echo(phase)).await.is_err() {
                return ConnState::Closing;
            }
        }
        ConnState::Active
    }
}

/// Drain queued payloads into the socket, then shut the write side down.
pub async fn write_loop<W>(mut writer: W, mut rx: Receiver<Bytes>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = rx.recv().await {
        writer.write_all(&payload).await?;
    }
    writer.shutdown().await
}
