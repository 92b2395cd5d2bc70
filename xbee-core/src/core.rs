//! Command surface: connect, disconnect, direct relay sends and transfers.
//! The host owns the I/O (link connector, byte sources); this layer owns sessions and events.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::event::Event;
use crate::ingress::Ingress;
use crate::protocol::LogicalInterface;
use crate::session::{LinkHandle, Session, SessionRegistry};
use crate::source::ByteSource;
use crate::transfer::{TransferEngine, TransferHandle};
use crate::wire::RelayCodec;
use crate::RelayError;

/// An established link as produced by a connector: the outbound handle and the raw inbound byte stream.
#[derive(Debug)]
pub struct Link {
    pub handle: LinkHandle,
    pub inbound: mpsc::Receiver<Vec<u8>>,
}

/// Link establishment capability (radio stack, bridge, ...).
pub trait Connector: Send + Sync + 'static {
    /// Open and authenticate a link to `address`. `queue_depth` sizes the outbound queue.
    fn connect(
        &self,
        address: &str,
        credentials: &str,
        queue_depth: usize,
    ) -> impl Future<Output = Result<Link, RelayError>> + Send;
}

/// Main coordinator. Host passes commands; relay emits events on the channel given at construction.
pub struct XbeeRelay<C> {
    connector: C,
    config: Config,
    registry: Arc<SessionRegistry>,
    ingress: Ingress,
    engine: TransferEngine,
}

impl<C: Connector> XbeeRelay<C> {
    pub fn new(connector: C, config: Config, events: mpsc::UnboundedSender<Event>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let codec = RelayCodec::new(config.max_frame_size);
        let ingress = Ingress::new(registry.clone(), events.clone());
        let engine = TransferEngine::new(registry.clone(), codec, events)
            .with_interface(config.transfer_interface);
        Self {
            connector,
            config,
            registry,
            ingress,
            engine,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.registry.is_connected(address)
    }

    /// Connect, register the session and attach its ingress listener.
    pub async fn connect(&self, address: &str, credentials: &str) -> Result<Arc<Session>, RelayError> {
        if self.registry.is_connected(address) {
            return Err(RelayError::DuplicateSession(address.to_string()));
        }
        tracing::info!(address, "connecting");
        let link = self
            .connector
            .connect(address, credentials, self.config.link_queue_depth)
            .await
            .map_err(|e| {
                tracing::warn!(address, "connect failed: {}", e);
                e
            })?;
        let session = self.registry.register(address, link.handle)?;
        self.ingress.attach(session.clone(), link.inbound);
        tracing::info!(address, "connected");
        Ok(session)
    }

    /// Detach the listener and release the session.
    pub fn disconnect(&self, address: &str) -> Result<(), RelayError> {
        self.ingress.detach(address);
        if self.registry.remove(address) {
            Ok(())
        } else {
            Err(RelayError::SessionNotFound(address.to_string()))
        }
    }

    /// Direct, non-chunked send of one payload.
    pub async fn send_relay(
        &self,
        address: &str,
        interface: LogicalInterface,
        payload: &[u8],
    ) -> Result<(), RelayError> {
        let session = self
            .registry
            .lookup(address)
            .ok_or_else(|| RelayError::SessionNotFound(address.to_string()))?;
        let frame = self.engine.codec().encode(&session, interface, payload)?;
        session.dispatch(&frame).await?;
        tracing::debug!(address, seq = frame.sequence_id, len = payload.len(), "relay sent");
        Ok(())
    }

    /// Start a chunked transfer using the configured chunk size.
    pub fn start_transfer<S: ByteSource>(
        &self,
        address: &str,
        source: S,
        declared_length: u64,
    ) -> Result<TransferHandle, RelayError> {
        self.engine
            .start(address, source, declared_length, self.config.chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::protocol::FRAME_TYPE_USER_DATA_RELAY_OUTPUT;
    use crate::session::{link_channel, LinkEndpoint};
    use crate::source::MemorySource;
    use crate::wire::{decode_frame, wrap_api_frame, DecodedFrame};
    use std::sync::Mutex;

    const ADDR: &str = "00:13:A2:00:41:B7:6E:3C";

    /// Connector handing out in-memory links; keeps the far ends for inspection.
    #[derive(Default)]
    struct MemoryConnector {
        ends: Arc<Mutex<Vec<(LinkEndpoint, mpsc::Sender<Vec<u8>>)>>>,
    }

    impl Connector for MemoryConnector {
        async fn connect(
            &self,
            _address: &str,
            credentials: &str,
            queue_depth: usize,
        ) -> Result<Link, RelayError> {
            if credentials != "1234" {
                return Err(RelayError::AuthenticationFailure("bad password".into()));
            }
            let (handle, endpoint) = link_channel(queue_depth);
            let (tx, rx) = mpsc::channel(queue_depth);
            self.ends.lock().unwrap().push((endpoint, tx));
            Ok(Link {
                handle,
                inbound: rx,
            })
        }
    }

    fn relay(config: Config) -> (
        XbeeRelay<MemoryConnector>,
        Arc<Mutex<Vec<(LinkEndpoint, mpsc::Sender<Vec<u8>>)>>>,
        mpsc::UnboundedReceiver<Event>,
    ) {
        let connector = MemoryConnector::default();
        let ends = connector.ends.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        (XbeeRelay::new(connector, config, tx), ends, rx)
    }

    #[tokio::test]
    async fn connect_and_disconnect() {
        let (relay, ends, _events) = relay(Config::default());
        relay.connect(ADDR, "1234").await.unwrap();
        assert!(relay.is_connected(ADDR));
        assert_eq!(
            relay.connect(ADDR, "1234").await.unwrap_err(),
            RelayError::DuplicateSession(ADDR.into())
        );
        relay.disconnect(ADDR).unwrap();
        assert!(!relay.is_connected(ADDR));
        assert!(*ends.lock().unwrap()[0].0.shutdown.borrow());
        assert_eq!(
            relay.disconnect(ADDR).unwrap_err(),
            RelayError::SessionNotFound(ADDR.into())
        );
    }

    #[tokio::test]
    async fn connector_result_is_debuggable() {
        let connector = MemoryConnector::default();
        let err = connector.connect(ADDR, "nope", 4).await.unwrap_err();
        assert_eq!(err.kind(), "AuthenticationFailure");
        let link = connector.connect(ADDR, "1234", 4).await.unwrap();
        assert!(format!("{:?}", link).starts_with("Link"));
    }

    #[tokio::test]
    async fn bad_credentials_create_no_session() {
        let (relay, _ends, _events) = relay(Config::default());
        let err = relay.connect(ADDR, "nope").await.unwrap_err();
        assert_eq!(err.kind(), "AuthenticationFailure");
        assert!(!relay.is_connected(ADDR));
    }

    #[tokio::test]
    async fn send_relay_frames_payload() {
        let (relay, ends, _events) = relay(Config::default());
        relay.connect(ADDR, "1234").await.unwrap();
        relay
            .send_relay(ADDR, LogicalInterface::MicroPython, b"print(1)")
            .await
            .unwrap();
        let bytes = ends.lock().unwrap()[0].0.outbound.try_recv().unwrap();
        match decode_frame(&bytes).unwrap().0 {
            DecodedFrame::Request(f) => {
                assert_eq!(f.sequence_id, 1);
                assert_eq!(f.interface, LogicalInterface::MicroPython);
                assert_eq!(f.payload, b"print(1)");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_relay_errors() {
        let config = Config {
            max_frame_size: 4,
            ..Config::default()
        };
        let (relay, _ends, _events) = relay(config);
        assert_eq!(
            relay
                .send_relay(ADDR, LogicalInterface::Serial, b"x")
                .await
                .unwrap_err(),
            RelayError::SessionNotFound(ADDR.into())
        );
        relay.connect(ADDR, "1234").await.unwrap();
        assert_eq!(
            relay
                .send_relay(ADDR, LogicalInterface::Serial, b"too long")
                .await
                .unwrap_err(),
            RelayError::PayloadTooLarge { len: 8, max: 4 }
        );
        assert_eq!(relay.registry().lookup(ADDR).unwrap().current_sequence_id(), 0);
    }

    #[tokio::test]
    async fn inbound_relay_reaches_events() {
        let (relay, ends, mut events) = relay(Config::default());
        relay.connect(ADDR, "1234").await.unwrap();
        let tx = ends.lock().unwrap()[0].1.clone();
        tx.send(wrap_api_frame(&[FRAME_TYPE_USER_DATA_RELAY_OUTPUT, 0, b'o', b'k']))
            .await
            .unwrap();
        match events.recv().await.unwrap() {
            Event::InboundRelay(m) => {
                assert_eq!(m.session_address, ADDR);
                assert_eq!(m.data, b"ok");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn link_loss_removes_session() {
        let (relay, ends, mut events) = relay(Config::default());
        relay.connect(ADDR, "1234").await.unwrap();
        ends.lock().unwrap().clear();
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::ConnectionLost { .. }
        ));
        assert!(!relay.is_connected(ADDR));
    }

    #[tokio::test]
    async fn transfer_uses_configured_chunk_size() {
        let config = Config {
            max_frame_size: 4,
            chunk_size: 4,
            ..Config::default()
        };
        let (relay, ends, _events) = relay(config);
        relay.connect(ADDR, "1234").await.unwrap();
        let state = relay
            .start_transfer(ADDR, MemorySource::new(b"ABCDEFGH".to_vec()), 8)
            .unwrap()
            .wait()
            .await;
        assert_eq!(state, JobState::Completed);
        let mut guard = ends.lock().unwrap();
        let mut n = 0;
        while guard[0].0.outbound.try_recv().is_ok() {
            n += 1;
        }
        assert_eq!(n, 2);
    }
}
