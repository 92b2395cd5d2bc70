//! Bridge link: TCP connection to a radio bridge, password handshake, then raw API frames both ways.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use xbee_core::{link_channel, Connector, Link, LinkEndpoint, RelayError};

/// Handshake: [version][password len][password], answered by one status byte.
pub const AUTH_VERSION: u8 = 1;
pub const AUTH_OK: u8 = 0;
const READ_BUF: usize = 4096;

/// Connects to bridges listening on `host:port`.
#[derive(Debug, Clone)]
pub struct TcpBridgeConnector {
    timeout: Duration,
}

impl TcpBridgeConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Connector for TcpBridgeConnector {
    async fn connect(
        &self,
        address: &str,
        credentials: &str,
        queue_depth: usize,
    ) -> Result<Link, RelayError> {
        let unavailable = |e: String| RelayError::TransportUnavailable(format!("{}: {}", address, e));
        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(address))
            .await
            .map_err(|_| unavailable("connect timed out".into()))?
            .map_err(|e| unavailable(e.to_string()))?;
        let _ = stream.set_nodelay(true);

        let status = tokio::time::timeout(self.timeout, handshake(&mut stream, credentials))
            .await
            .map_err(|_| unavailable("handshake timed out".into()))??;
        if status != AUTH_OK {
            return Err(RelayError::AuthenticationFailure(format!(
                "{} rejected credentials (status {})",
                address, status
            )));
        }

        let (handle, endpoint) = link_channel(queue_depth);
        let (inbound_tx, inbound_rx) = mpsc::channel(queue_depth.max(1));
        let (reader, writer) = stream.into_split();
        let shutdown = endpoint.shutdown.clone();
        tokio::spawn(write_loop(writer, endpoint));
        tokio::spawn(read_loop(reader, inbound_tx, shutdown));
        tracing::debug!(address, "bridge link up");
        Ok(Link {
            handle,
            inbound: inbound_rx,
        })
    }
}

/// Send credentials and return the bridge's status byte.
async fn handshake(stream: &mut TcpStream, credentials: &str) -> Result<u8, RelayError> {
    let password = credentials.as_bytes();
    let len = u8::try_from(password.len())
        .map_err(|_| RelayError::AuthenticationFailure("password longer than 255 bytes".into()))?;
    let io_err = |e: std::io::Error| RelayError::TransportUnavailable(e.to_string());
    let mut out = Vec::with_capacity(2 + password.len());
    out.push(AUTH_VERSION);
    out.push(len);
    out.extend_from_slice(password);
    stream.write_all(&out).await.map_err(io_err)?;
    stream.flush().await.map_err(io_err)?;
    let mut status = [0u8; 1];
    stream.read_exact(&mut status).await.map_err(io_err)?;
    Ok(status[0])
}

/// Drain queued frames onto the socket until the link is closed or the socket fails.
async fn write_loop(mut writer: OwnedWriteHalf, mut endpoint: LinkEndpoint) {
    let LinkEndpoint { outbound, shutdown } = &mut endpoint;
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            frame = outbound.recv() => {
                let Some(bytes) = frame else { break };
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::warn!("bridge write failed: {}", e);
                    break;
                }
            }
            res = shutdown.changed() => {
                if res.is_err() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

/// Forward socket reads to the ingress listener. Dropping `inbound` signals link loss.
async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::Sender<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; READ_BUF];
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            res = reader.read(&mut buf) => match res {
                Ok(0) => break,
                Ok(n) => {
                    if inbound.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("bridge read failed: {}", e);
                    break;
                }
            },
            res = shutdown.changed() => {
                if res.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// One-shot bridge: accepts a connection, checks the password, then echoes whatever it reads.
    async fn spawn_bridge(password: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = [0u8; 2];
            stream.read_exact(&mut head).await.unwrap();
            let mut pw = vec![0u8; head[1] as usize];
            stream.read_exact(&mut pw).await.unwrap();
            let ok = head[0] == AUTH_VERSION && pw == password.as_bytes();
            stream.write_all(&[if ok { AUTH_OK } else { 1 }]).await.unwrap();
            if !ok {
                return;
            }
            let mut buf = [0u8; 256];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        addr
    }

    fn connector() -> TcpBridgeConnector {
        TcpBridgeConnector::new(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let addr = spawn_bridge("1234").await;
        let mut link = connector().connect(&addr, "1234", 4).await.unwrap();
        link.handle.dispatch(vec![0x7E, 0x00, 0x01]).await.unwrap();
        let mut got = Vec::new();
        while got.len() < 3 {
            got.extend(link.inbound.recv().await.unwrap());
        }
        assert_eq!(got, vec![0x7E, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn closing_link_ends_inbound() {
        let addr = spawn_bridge("1234").await;
        let mut link = connector().connect(&addr, "1234", 4).await.unwrap();
        link.handle.close();
        assert!(link.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn wrong_password_is_authentication_failure() {
        let addr = spawn_bridge("1234").await;
        let err = connector().connect(&addr, "0000", 4).await.unwrap_err();
        assert_eq!(err.kind(), "AuthenticationFailure");
    }

    #[tokio::test]
    async fn unreachable_bridge_is_transport_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = connector().connect(&addr, "1234", 4).await.unwrap_err();
        assert_eq!(err.kind(), "TransportUnavailable");
    }
}
