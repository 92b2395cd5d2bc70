//! Relay ingress: one listener task per session decodes inbound bytes and publishes relay messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::{Event, InboundRelayMessage};
use crate::session::{Session, SessionRegistry};
use crate::wire::{DecodedFrame, FrameDecoder};

type Listeners = Arc<DashMap<String, Listener>>;

struct Listener {
    generation: u64,
    task: JoinHandle<()>,
}

/// Listener table. Attach at connect, detach at disconnect; a listener whose link is lost drops its own entry.
pub struct Ingress {
    registry: Arc<SessionRegistry>,
    events: mpsc::UnboundedSender<Event>,
    listeners: Listeners,
    generation: AtomicU64,
}

impl Ingress {
    pub fn new(registry: Arc<SessionRegistry>, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            registry,
            events,
            listeners: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Start listening on `inbound` for `session`. Replaces any listener already attached to the address.
    /// When `inbound` ends the link is considered lost and the session is removed.
    pub fn attach(&self, session: Arc<Session>, inbound: mpsc::Receiver<Vec<u8>>) {
        // Entries of listeners that ended before they were recorded.
        self.listeners.retain(|_, l| !l.task.is_finished());
        let address = session.address().to_string();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(listen(
            session,
            inbound,
            self.registry.clone(),
            self.events.clone(),
            (self.listeners.clone(), generation),
        ));
        if let Some(previous) = self.listeners.insert(address, Listener { generation, task }) {
            previous.task.abort();
        }
    }

    /// Stop the listener for `address`. Returns false (and does nothing) if none is attached.
    pub fn detach(&self, address: &str) -> bool {
        match self.listeners.remove(address) {
            Some((_, listener)) => {
                listener.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self, address: &str) -> bool {
        self.listeners
            .get(address)
            .map(|l| !l.task.is_finished())
            .unwrap_or(false)
    }

    /// Number of listener entries currently held.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Drop for Ingress {
    fn drop(&mut self) {
        for entry in self.listeners.iter() {
            entry.value().task.abort();
        }
    }
}

async fn listen(
    session: Arc<Session>,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    registry: Arc<SessionRegistry>,
    events: mpsc::UnboundedSender<Event>,
    (listeners, generation): (Listeners, u64),
) {
    let address = session.address().to_string();
    let mut decoder = FrameDecoder::new();
    while let Some(bytes) = inbound.recv().await {
        for result in decoder.push(&bytes) {
            match result {
                Ok(DecodedFrame::Output(output)) => {
                    tracing::debug!(
                        address = %address,
                        len = output.data.len(),
                        "relay data received"
                    );
                    let _ = events.send(Event::InboundRelay(InboundRelayMessage::new(
                        &address, output,
                    )));
                }
                Ok(DecodedFrame::Request(frame)) => {
                    tracing::debug!(address = %address, seq = frame.sequence_id, "ignoring relay request from peer");
                }
                Ok(DecodedFrame::Other { frame_type }) => {
                    tracing::debug!(address = %address, frame_type, "ignoring api frame");
                }
                Err(e) => {
                    tracing::warn!(address = %address, "malformed inbound frame: {}", e);
                }
            }
        }
    }
    listeners.remove_if(&address, |_, l| l.generation == generation);
    if registry.remove_session(&session) {
        tracing::warn!(address = %address, "link lost");
        let _ = events.send(Event::ConnectionLost { address });
    }
}
