//! Scan facade: listen for bridge advertisements on UDP and report them as discovered devices.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use xbee_core::{decode_advert, Event, RelayError};

/// Group bridges announce on, in addition to plain broadcast.
const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);
const RECV_BUF: usize = 65536;

pub struct Scanner {
    port: u16,
    events: mpsc::UnboundedSender<Event>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(port: u16, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            port,
            events,
            task: Mutex::new(None),
        }
    }

    /// Start listening. Already scanning is not an error.
    pub async fn start(&self) -> Result<(), RelayError> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let socket = make_socket(self.port)
            .map_err(|e| RelayError::TransportUnavailable(format!("udp port {}: {}", self.port, e)))?;
        tracing::info!(port = self.port, "scan started");
        *task = Some(tokio::spawn(recv_loop(socket, self.events.clone())));
        Ok(())
    }

    /// Stop listening and emit `scanStopped`.
    pub async fn stop(&self) {
        if let Some(t) = self.task.lock().await.take() {
            t.abort();
            tracing::info!("scan stopped");
        }
        let _ = self.events.send(Event::ScanStopped);
    }

    #[allow(dead_code)]
    pub async fn is_scanning(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

fn make_socket(port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    if let Err(e) = std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED) {
        tracing::debug!("multicast join failed, broadcast only: {}", e);
    }
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn recv_loop(socket: UdpSocket, events: mpsc::UnboundedSender<Event>) {
    let mut buf = vec![0u8; RECV_BUF];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("scan socket failed: {}", e);
                return;
            }
        };
        match decode_advert(&buf[..n]) {
            Ok(advert) => {
                let device = advert.to_device(from.ip());
                tracing::debug!(id = %device.id, rssi = device.rssi, "device discovered");
                if events.send(Event::DeviceDiscovered(device)).is_err() {
                    return;
                }
            }
            Err(e) => tracing::debug!(%from, "ignoring datagram: {}", e),
        }
    }
}
