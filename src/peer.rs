//! Connected peers and the shared peer table.
//!
//! A peer's socket is split in two: the connection handler owns the read half,
//! and a writer task owns the write half. Everything destined for the peer
//! (its own command results and chat lines relayed from others) is queued on
//! one bounded channel feeding that writer task, which keeps per-connection
//! output in order. The owning handler waits for room in that queue; relayed
//! chat never waits and is dropped for a peer whose queue is full.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use crate::registry::WorkDir;

/// Identity of a peer: upper-case hex SHA-256 of its remote address.
///
/// Two live connections can only share an id if their address strings hash
/// identically; no attempt is made to detect that.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn from_addr(addr: &str) -> Self {
        let digest = Sha256::digest(addr.as_bytes());
        PeerId(hex::encode_upper(digest))
    }

    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the table keeps for each peer: enough to address and reach it
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub id: PeerId,
    pub addr: SocketAddr,
    tx: Sender<Bytes>,
}

impl PeerHandle {
    /// Queue bytes for this peer, waiting while its queue is full.
    /// Fails once its writer has gone away.
    pub async fn send(&self, payload: Bytes) -> Result<(), PeerGone> {
        self.tx.send(payload).await.map_err(|_| PeerGone)
    }

    /// Queue bytes for this peer without waiting.
    pub fn try_send(&self, payload: Bytes) -> Result<(), TrySendError<Bytes>> {
        self.tx.try_send(payload)
    }
}

/// The peer's writer task has exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerGone;

impl fmt::Display for PeerGone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer connection is closed")
    }
}

impl std::error::Error for PeerGone {}

/// One connected client, owned by its connection handler
#[derive(Debug)]
pub struct Peer {
    handle: PeerHandle,
    /// Cleared when the peer asks to close
    pub connected: bool,
    /// Directory filesystem commands resolve against
    pub cwd: WorkDir,
}

impl Peer {
    pub fn id(&self) -> &PeerId {
        &self.handle.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }

    pub async fn send(&self, payload: Bytes) -> Result<(), PeerGone> {
        self.handle.send(payload).await
    }
}

/// Table of live peers, keyed by id.
///
/// Insert, remove and broadcast all go through one lock, so a broadcast sees
/// a consistent snapshot of who is connected.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Mutex<HashMap<PeerId, PeerHandle>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<PeerId, PeerHandle>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a freshly accepted connection and return its peer
    pub fn add(&self, addr: SocketAddr, tx: Sender<Bytes>, cwd: WorkDir) -> Peer {
        let handle = PeerHandle {
            id: PeerId::from_addr(&addr.to_string()),
            addr,
            tx,
        };

        let mut peers = self.peers();
        if let Some(previous) = peers.insert(handle.id.clone(), handle.clone()) {
            warn!(id = %previous.id, peer = %previous.addr, "Peer id collision, replacing entry");
        }
        debug!(id = %handle.id, peer = %addr, total = peers.len(), "Peer registered");

        Peer {
            handle,
            connected: true,
            cwd,
        }
    }

    /// Remove a peer. Unknown ids are ignored.
    pub fn remove(&self, id: &PeerId) -> Option<PeerHandle> {
        let removed = self.peers().remove(id);
        if removed.is_some() {
            debug!(id = %id, "Peer removed");
        }
        removed
    }

    /// Deliver `payload` to every peer except `exclude`.
    ///
    /// Never waits: a peer whose queue is full misses this payload, and a
    /// peer that cannot be reached is skipped. Both are logged. Returns how
    /// many peers the payload was queued for.
    pub fn broadcast(&self, exclude: &PeerId, payload: &Bytes) -> usize {
        let peers = self.peers();
        let mut delivered = 0;
        for (id, peer) in peers.iter() {
            if id == exclude {
                continue;
            }
            match peer.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(id = %id, peer = %peer.addr, "Peer queue full, dropping message")
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(id = %id, peer = %peer.addr, error = %PeerGone, "Broadcast delivery failed")
                }
            }
        }
        delivered
    }

    #[cfg(test)]
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers().contains_key(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.peers().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }
}
