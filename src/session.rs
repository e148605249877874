//! Client side: pipe standard input and output over one connection.

use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Which copy loop finished first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Local input reached end of file
    InputClosed,
    /// The server closed the connection
    RemoteClosed,
}

/// An established connection to a server
pub struct Session<S> {
    stream: S,
    addr: SocketAddr,
}

impl Session<TcpStream> {
    /// Dial `endpoint` (`host:port`).
    pub async fn connect(endpoint: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(endpoint).await?;
        let addr = stream.peer_addr()?;
        info!(address = %addr, "Connected");
        Ok(Session::new(stream, addr))
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, addr: SocketAddr) -> Self {
        Session { stream, addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Copy `input` to the connection and the connection to `output`
    /// concurrently, returning as soon as either direction finishes.
    ///
    /// An I/O error in the direction that finished first is returned.
    pub async fn run<I, O>(self, mut input: I, mut output: O) -> io::Result<SessionEnd>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let (mut remote_rx, mut remote_tx) = tokio::io::split(self.stream);

        let send = async {
            let n = tokio::io::copy(&mut input, &mut remote_tx).await?;
            remote_tx.flush().await?;
            Ok::<_, io::Error>(n)
        };

        let recv = async {
            let n = tokio::io::copy(&mut remote_rx, &mut output).await?;
            output.flush().await?;
            Ok::<_, io::Error>(n)
        };

        tokio::select! {
            sent = send => {
                let sent = sent?;
                debug!(bytes = sent, "Input closed");
                Ok(SessionEnd::InputClosed)
            }
            received = recv => {
                let received = received?;
                debug!(bytes = received, "Connection closed by server");
                Ok(SessionEnd::RemoteClosed)
            }
        }
    }
}

/// Connect to `endpoint` and attach it to this process's stdin and stdout.
pub async fn run(endpoint: &str) -> io::Result<SessionEnd> {
    let session = Session::connect(endpoint).await?;
    let addr = session.addr();
    let end = session.run(tokio::io::stdin(), tokio::io::stdout()).await?;
    info!(address = %addr, ?end, "Session finished");
    Ok(end)
}
