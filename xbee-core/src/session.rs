//! Sessions and the session registry: one live link per peer address.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};

use crate::wire::RelayFrame;
use crate::RelayError;

/// API frame id counter. Yields 1..=255 and wraps back to 1; 0 is never produced.
#[derive(Debug, Default)]
pub struct FrameSequence(AtomicU8);

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically advance and return the new id.
    pub fn next(&self) -> u8 {
        let advance = |v: u8| v.wrapping_add(1).max(1);
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(advance(v)))
            .unwrap_or_else(|v| v);
        advance(prev)
    }

    /// Last id handed out (0 before the first frame).
    pub fn current(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }
}

/// Error handing a frame to the link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("link closed")]
    Closed,
}

/// Owning side of a link: outbound queue plus shutdown switch.
/// Dispatch is fire-and-forget: it returns once the frame is queued for the transport.
#[derive(Debug)]
pub struct LinkHandle {
    outbound: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
}

/// Transport side of a link. The transport drains `outbound` and stops when `shutdown` turns true.
#[derive(Debug)]
pub struct LinkEndpoint {
    pub outbound: mpsc::Receiver<Vec<u8>>,
    pub shutdown: watch::Receiver<bool>,
}

/// Create a link with an outbound queue of `depth` frames. A full queue is the only backpressure.
pub fn link_channel(depth: usize) -> (LinkHandle, LinkEndpoint) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    (
        LinkHandle {
            outbound: tx,
            shutdown: shutdown_tx,
        },
        LinkEndpoint {
            outbound: rx,
            shutdown: shutdown_rx,
        },
    )
}

impl LinkHandle {
    /// Queue raw frame bytes for the transport. Fails once the link is closed,
    /// including while waiting for room in a full queue.
    pub async fn dispatch(&self, bytes: Vec<u8>) -> Result<(), DispatchError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(DispatchError::Closed);
        }
        tokio::select! {
            permit = self.outbound.reserve() => {
                let permit = permit.map_err(|_| DispatchError::Closed)?;
                if *shutdown.borrow() {
                    return Err(DispatchError::Closed);
                }
                permit.send(bytes);
                Ok(())
            }
            _ = shutdown.changed() => Err(DispatchError::Closed),
        }
    }

    /// Release the link. Idempotent.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.outbound.is_closed()
    }
}

impl LinkEndpoint {
    /// Resolves when the owning side closes the link or is dropped.
    pub async fn closed(&mut self) {
        while !*self.shutdown.borrow_and_update() {
            if self.shutdown.changed().await.is_err() {
                return;
            }
        }
    }
}

/// One established link to a peer.
#[derive(Debug)]
pub struct Session {
    address: String,
    link: LinkHandle,
    sequence: FrameSequence,
}

impl Session {
    pub fn new(address: String, link: LinkHandle) -> Self {
        Self {
            address,
            link,
            sequence: FrameSequence::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Next frame id for an outbound frame on this session.
    pub fn next_sequence_id(&self) -> u8 {
        self.sequence.next()
    }

    pub fn current_sequence_id(&self) -> u8 {
        self.sequence.current()
    }

    pub fn sequence(&self) -> &FrameSequence {
        &self.sequence
    }

    /// Hand an encoded frame to the link without waiting for the peer.
    pub async fn dispatch(&self, frame: &RelayFrame) -> Result<(), DispatchError> {
        self.link.dispatch(frame.to_bytes()).await
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    fn close(&self) {
        self.link.close();
    }
}

/// Address -> live session. The only place sessions are created and released.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new session with a zeroed frame counter. Fails if the address already has one;
    /// in that case the rejected link is closed.
    pub fn register(&self, address: &str, link: LinkHandle) -> Result<Arc<Session>, RelayError> {
        match self.sessions.entry(address.to_string()) {
            Entry::Occupied(_) => {
                link.close();
                Err(RelayError::DuplicateSession(address.to_string()))
            }
            Entry::Vacant(slot) => {
                let session = Arc::new(Session::new(address.to_string(), link));
                slot.insert(session.clone());
                tracing::info!(address, "session registered");
                Ok(session)
            }
        }
    }

    pub fn lookup(&self, address: &str) -> Option<Arc<Session>> {
        self.sessions.get(address).map(|s| s.value().clone())
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.sessions.contains_key(address)
    }

    /// Remove and close the session for `address`. Returns false if there was none.
    pub fn remove(&self, address: &str) -> bool {
        match self.sessions.remove(address) {
            Some((_, session)) => {
                session.close();
                tracing::info!(address, "session removed");
                true
            }
            None => false,
        }
    }

    /// Remove `session` only if it is still the one registered under its address.
    /// Used on link loss so a stale link never evicts a newer session.
    pub fn remove_session(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(session.address(), |_, current| Arc::ptr_eq(current, session));
        session.close();
        if removed.is_some() {
            tracing::info!(address = session.address(), "session removed after link loss");
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}
