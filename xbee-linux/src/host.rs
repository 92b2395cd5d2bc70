//! Host command channel: newline-delimited JSON over a localhost TCP socket.
//! Each line in is a request `{"id":N,"cmd":"...",...}`; each line out is a response or an event.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use xbee_core::{Event, LogicalInterface, RelayError, XbeeRelay};

use crate::config::Config;
use crate::discovery::Scanner;
use crate::link::TcpBridgeConnector;
use crate::source;

/// Events buffered per slow client before it starts missing them.
pub const EVENT_BACKLOG: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: u64,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Command {
    Scan,
    StopScan,
    Connect {
        address: String,
        #[serde(default)]
        password: String,
    },
    Disconnect {
        address: String,
    },
    SendRelay {
        address: String,
        interface: u8,
        data: Vec<u8>,
    },
    StartTransfer {
        address: String,
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl Response {
    fn ok(id: u64, job_id: Option<String>) -> Self {
        Self {
            id,
            ok: true,
            job_id,
            error: None,
        }
    }

    fn err(id: u64, kind: &str, message: String) -> Self {
        Self {
            id,
            ok: false,
            job_id: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message,
            }),
        }
    }
}

/// Everything a command needs: the relay, the scanner and the HTTP client for transfer sources.
pub struct Host {
    relay: XbeeRelay<TcpBridgeConnector>,
    scanner: Scanner,
    http: reqwest::Client,
}

impl Host {
    pub fn new(cfg: &Config, events: mpsc::UnboundedSender<Event>) -> anyhow::Result<Self> {
        let http = source::http_client(cfg)?;
        let connector = TcpBridgeConnector::new(cfg.connect_timeout());
        Ok(Self {
            relay: XbeeRelay::new(connector, cfg.relay.clone(), events.clone()),
            scanner: Scanner::new(cfg.discovery_port, events),
            http,
        })
    }

    /// Run one command. Returns the job id for `startTransfer`.
    pub async fn execute(&self, command: Command) -> Result<Option<String>, RelayError> {
        match command {
            Command::Scan => self.scanner.start().await.map(|_| None),
            Command::StopScan => {
                self.scanner.stop().await;
                Ok(None)
            }
            Command::Connect { address, password } => {
                self.relay.connect(&address, &password).await.map(|_| None)
            }
            Command::Disconnect { address } => self.relay.disconnect(&address).map(|_| None),
            Command::SendRelay {
                address,
                interface,
                data,
            } => {
                let interface = LogicalInterface::try_from(interface)?;
                self.relay
                    .send_relay(&address, interface, &data)
                    .await
                    .map(|_| None)
            }
            Command::StartTransfer { address, url } => {
                if !self.relay.is_connected(&address) {
                    return Err(RelayError::SessionNotFound(address));
                }
                let (src, declared_length) = source::open(&self.http, &url).await?;
                let handle = self.relay.start_transfer(&address, src, declared_length)?;
                tracing::debug!(%address, %url, job = %handle.job_id(), "transfer source opened");
                Ok(Some(handle.job_id().to_string()))
            }
        }
    }

    async fn handle_line(&self, line: &str) -> Response {
        let req: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => return Response::err(0, "InvalidRequest", e.to_string()),
        };
        match self.execute(req.command).await {
            Ok(job_id) => Response::ok(req.id, job_id),
            Err(e) => {
                tracing::debug!(id = req.id, "command failed: {}", e);
                Response::err(req.id, e.kind(), e.to_string())
            }
        }
    }
}

/// Move events from the relay's channel onto the broadcast every client subscribes to.
pub fn forward_events(
    mut rx: mpsc::UnboundedReceiver<Event>,
    tx: broadcast::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            // No subscribers is fine; events are not replayed.
            let _ = tx.send(ev);
        }
    })
}

/// Bind the command channel and serve clients until the listener fails.
pub async fn run_host(
    bind: SocketAddr,
    host: Arc<Host>,
    events: broadcast::Sender<Event>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(%bind, "host channel listening");
    serve(listener, host, events).await
}

pub async fn serve(
    listener: TcpListener,
    host: Arc<Host>,
    events: broadcast::Sender<Event>,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let host = host.clone();
        let events = events.subscribe();
        tokio::spawn(async move {
            tracing::debug!(%peer, "host client connected");
            if let Err(e) = handle_client(stream, host, events).await {
                tracing::debug!(%peer, "host client error: {}", e);
            }
            tracing::debug!(%peer, "host client gone");
        });
    }
}

async fn handle_client(
    stream: TcpStream,
    host: Arc<Host>,
    mut events: broadcast::Receiver<Event>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let write_task = tokio::spawn(async move {
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let event_tx = out_tx.clone();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ev) => match serde_json::to_string(&ev) {
                    Ok(line) => {
                        if event_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("event encode failed: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "host client lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    let result = loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let resp = host.handle_line(&line).await;
        match serde_json::to_string(&resp) {
            Ok(s) => {
                if out_tx.send(s).is_err() {
                    break Ok(());
                }
            }
            Err(e) => tracing::warn!("response encode failed: {}", e),
        }
    };
    event_task.abort();
    drop(out_tx);
    let _ = write_task.await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{AUTH_OK, AUTH_VERSION};
    use std::collections::VecDeque;
    use std::io::Write;
    use tokio::io::{AsyncReadExt, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

    #[test]
    fn parse_commands() {
        let r: Request = serde_json::from_str(r#"{"id":3,"cmd":"connect","address":"10.0.0.2:9750","password":"1234"}"#).unwrap();
        assert_eq!(r.id, 3);
        assert_eq!(
            r.command,
            Command::Connect {
                address: "10.0.0.2:9750".into(),
                password: "1234".into()
            }
        );
        let r: Request = serde_json::from_str(r#"{"cmd":"stopScan"}"#).unwrap();
        assert_eq!(r.command, Command::StopScan);
        let r: Request =
            serde_json::from_str(r#"{"id":1,"cmd":"sendRelay","address":"a","interface":2,"data":[1,2]}"#).unwrap();
        assert_eq!(
            r.command,
            Command::SendRelay {
                address: "a".into(),
                interface: 2,
                data: vec![1, 2]
            }
        );
        assert!(serde_json::from_str::<Request>(r#"{"cmd":"reboot"}"#).is_err());
    }

    #[test]
    fn response_shape() {
        let ok = serde_json::to_value(Response::ok(1, Some("j".into()))).unwrap();
        assert_eq!(ok, serde_json::json!({"id":1,"ok":true,"jobId":"j"}));
        let err = serde_json::to_value(Response::err(2, "SessionNotFound", "x".into())).unwrap();
        assert_eq!(
            err,
            serde_json::json!({"id":2,"ok":false,"error":{"kind":"SessionNotFound","message":"x"}})
        );
    }

    /// Bridge that accepts one link with password 1234 and collects every byte it receives.
    async fn spawn_bridge() -> (String, mpsc::UnboundedReceiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = [0u8; 2];
            stream.read_exact(&mut head).await.unwrap();
            let mut pw = vec![0u8; head[1] as usize];
            stream.read_exact(&mut pw).await.unwrap();
            assert_eq!(head[0], AUTH_VERSION);
            let status = if pw == b"1234" { AUTH_OK } else { 1 };
            stream.write_all(&[status]).await.unwrap();
            let mut buf = [0u8; 1024];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 || tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        });
        (addr, rx)
    }

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
        /// Events read while waiting for a response.
        pending: VecDeque<serde_json::Value>,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let (r, w) = TcpStream::connect(addr).await.unwrap().into_split();
            Self {
                lines: BufReader::new(r).lines(),
                writer: w,
                pending: VecDeque::new(),
            }
        }

        async fn send(&mut self, json: serde_json::Value) {
            let mut line = json.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn next(&mut self) -> serde_json::Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn response(&mut self) -> serde_json::Value {
            loop {
                let v = self.next().await;
                if v.get("event").is_none() {
                    return v;
                }
                self.pending.push_back(v);
            }
        }

        async fn event(&mut self, name: &str) -> serde_json::Value {
            self.event_where(|v| v["event"] == name).await
        }

        /// First event matching `pred`; events skipped on the way are dropped.
        async fn event_where(
            &mut self,
            pred: impl Fn(&serde_json::Value) -> bool,
        ) -> serde_json::Value {
            while let Some(v) = self.pending.pop_front() {
                if pred(&v) {
                    return v;
                }
            }
            loop {
                let v = self.next().await;
                if pred(&v) {
                    return v;
                }
            }
        }
    }

    async fn start_host(cfg: Config) -> SocketAddr {
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let (bc_tx, _) = broadcast::channel(EVENT_BACKLOG);
        forward_events(ev_rx, bc_tx.clone());
        let host = Arc::new(Host::new(&cfg, ev_tx).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, host, bc_tx));
        addr
    }

    #[tokio::test]
    async fn connect_send_disconnect_over_channel() {
        let (bridge, mut received) = spawn_bridge().await;
        let mut c = Client::connect(start_host(Config::default()).await).await;

        c.send(serde_json::json!({"id":1,"cmd":"connect","address":bridge,"password":"1234"})).await;
        assert_eq!(c.response().await["ok"], true);

        c.send(serde_json::json!({"id":2,"cmd":"connect","address":bridge,"password":"1234"})).await;
        assert_eq!(c.response().await["error"]["kind"], "DuplicateSession");

        c.send(serde_json::json!({"id":3,"cmd":"sendRelay","address":bridge,"interface":0,"data":[104,105]})).await;
        assert_eq!(c.response().await["ok"], true);
        let mut got = Vec::new();
        while got.len() < 9 {
            got.extend(received.recv().await.unwrap());
        }
        // 0x7E, len 0x0005, 0x2D, frame id 1, serial, "hi", checksum
        assert_eq!(&got[..8], &[0x7E, 0x00, 0x05, 0x2D, 0x01, 0x00, b'h', b'i']);

        c.send(serde_json::json!({"id":4,"cmd":"sendRelay","address":bridge,"interface":9,"data":[]})).await;
        assert_eq!(c.response().await["error"]["kind"], "UnknownInterface");

        c.send(serde_json::json!({"id":5,"cmd":"disconnect","address":bridge})).await;
        assert_eq!(c.response().await["ok"], true);
        c.send(serde_json::json!({"id":6,"cmd":"disconnect","address":bridge})).await;
        let r = c.response().await;
        assert_eq!(r["id"], 6);
        assert_eq!(r["error"]["kind"], "SessionNotFound");
    }

    #[tokio::test]
    async fn file_transfer_reports_progress_and_completion() {
        let (bridge, _received) = spawn_bridge().await;
        let mut cfg = Config::default();
        cfg.relay.chunk_size = 4;
        let mut c = Client::connect(start_host(cfg).await).await;

        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"ABCDEFGH").unwrap();
        let url = reqwest::Url::from_file_path(f.path()).unwrap().to_string();

        c.send(serde_json::json!({"id":1,"cmd":"startTransfer","address":bridge,"url":url})).await;
        assert_eq!(c.response().await["error"]["kind"], "SessionNotFound");

        c.send(serde_json::json!({"id":2,"cmd":"connect","address":bridge,"password":"1234"})).await;
        assert_eq!(c.response().await["ok"], true);
        c.send(serde_json::json!({"id":3,"cmd":"startTransfer","address":bridge,"url":url})).await;
        let r = c.response().await;
        let job = r["jobId"].as_str().unwrap().to_string();

        let first = c.event("transferProgress").await;
        assert_eq!(first["jobId"], job);
        assert_eq!(first["chunksSent"], 1);
        assert_eq!(first["bytesSent"], 4);
        assert_eq!(first["declaredLength"], 8);
        assert_eq!(first["progressPercent"], 50);
        assert_eq!(first["isDone"], false);

        let last = c
            .event_where(|v| v["event"] == "transferProgress" && v["isDone"] == true)
            .await;
        assert_eq!(last["jobId"], job);
        assert_eq!(last["bytesSent"], 8);
        assert_eq!(last["chunksSent"], 2);
        assert_eq!(last["progressPercent"], 100);

        let done = c.event("transferCompleted").await;
        assert_eq!(done["jobId"], job);

        c.send(serde_json::json!({"id":4,"cmd":"startTransfer","address":bridge,"url":"gopher://x"})).await;
        assert_eq!(c.response().await["error"]["kind"], "InvalidSource");
    }

    #[tokio::test]
    async fn bad_password_and_garbage_lines() {
        let (bridge, _received) = spawn_bridge().await;
        let mut c = Client::connect(start_host(Config::default()).await).await;
        c.send(serde_json::json!({"id":1,"cmd":"connect","address":bridge,"password":"0000"})).await;
        assert_eq!(c.response().await["error"]["kind"], "AuthenticationFailure");
        c.writer.write_all(b"not json\n").await.unwrap();
        assert_eq!(c.response().await["error"]["kind"], "InvalidRequest");
    }
}
