//! [`NodeClient`] – one long-lived connection to one node.
//!
//! The socket is split on connect. A detached reader task owns the read half
//! and classifies every inbound line: telemetry goes to a broadcast channel
//! and a latest-value snapshot, everything else resolves the oldest pending
//! command exchange. The write half lives inside an async mutex together
//! with the pending queue, which serializes exchanges so replies can be
//! matched to requests purely by arrival order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use maestro_types::{ArgValue, Manifest, Reply, Request, TelemetrySample};

use crate::error::ClientError;

/// Telemetry fan-out buffer; slow subscribers lose old samples, never block
/// the reader.
const TELEMETRY_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of the link to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A timeout, I/O error, or protocol violation poisoned the connection.
    /// The node is excluded from plans until reconnected.
    Faulted,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Faulted => "faulted",
        };
        f.write_str(label)
    }
}

/// State observable without holding the connection lock.
struct Shared {
    alias: String,
    state: StdMutex<ConnectionState>,
    manifest: StdMutex<Option<Manifest>>,
    /// Latest value per telemetry key, merged across all samples.
    snapshot: StdMutex<HashMap<String, String>>,
    telemetry_tx: broadcast::Sender<TelemetrySample>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    fn fault(&self, reason: &str) {
        debug!(alias = %self.alias, reason, "connection faulted");
        self.set_state(ConnectionState::Faulted);
    }
}

/// Live halves of one TCP connection.
struct Connection {
    writer: OwnedWriteHalf,
    /// Oldest-first queue of waiters; the reader resolves them in order.
    pending: Arc<StdMutex<VecDeque<oneshot::Sender<String>>>>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn teardown(self) {
        self.reader.abort();
        // Pending waiters see a closed channel and report Disconnected.
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

/// Orchestrator-side handle to one node.
pub struct NodeClient {
    shared: Arc<Shared>,
    addr: String,
    /// `None` when disconnected. The async mutex doubles as the exchange
    /// serializer: at most one `RUN`/`STOP` is in flight per node.
    conn: Mutex<Option<Connection>>,
}

impl NodeClient {
    pub fn new(alias: &str, addr: &str) -> Self {
        let (telemetry_tx, _) = broadcast::channel(TELEMETRY_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                alias: alias.to_string(),
                state: StdMutex::new(ConnectionState::Disconnected),
                manifest: StdMutex::new(None),
                snapshot: StdMutex::new(HashMap::new()),
                telemetry_tx,
            }),
            addr: addr.to_string(),
            conn: Mutex::new(None),
        }
    }

    pub fn alias(&self) -> &str {
        &self.shared.alias
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> ConnectionState {
        self.shared
            .state
            .lock()
            .map(|state| *state)
            .unwrap_or(ConnectionState::Faulted)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The manifest fetched by [`fetch_manifest`](Self::fetch_manifest), if
    /// any.
    pub fn manifest(&self) -> Option<Manifest> {
        self.shared
            .manifest
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// Latest value per telemetry key seen on this connection.
    pub fn telemetry_snapshot(&self) -> HashMap<String, String> {
        self.shared
            .snapshot
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Live telemetry samples as they arrive.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetrySample> {
        self.shared.telemetry_tx.subscribe()
    }

    /// Dial the node and complete the `HELLO` handshake.
    ///
    /// # Errors
    ///
    /// [`ClientError::Disconnected`] when the dial fails or times out,
    /// [`ClientError::Handshake`] when the node answers `HELLO` with
    /// anything but `OK`.
    pub async fn connect(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        if let Some(old) = conn.take() {
            old.teardown();
        }
        self.shared.set_state(ConnectionState::Connecting);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                self.shared.fault("dial failed");
                return Err(ClientError::Disconnected(err.to_string()));
            }
            Err(_) => {
                self.shared.fault("dial timed out");
                return Err(ClientError::Disconnected(format!(
                    "connect to {} timed out",
                    self.addr
                )));
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(alias = %self.shared.alias, %err, "set_nodelay failed");
        }

        let (read_half, writer) = stream.into_split();
        let pending: Arc<StdMutex<VecDeque<oneshot::Sender<String>>>> =
            Arc::new(StdMutex::new(VecDeque::new()));
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&self.shared),
        ));
        *conn = Some(Connection {
            writer,
            pending,
            reader,
        });

        match exchange(&mut conn, &self.shared, &Request::Hello, timeout).await {
            Ok(Reply::Ok) => {
                self.shared.set_state(ConnectionState::Connected);
                debug!(alias = %self.shared.alias, addr = %self.addr, "handshake complete");
                Ok(())
            }
            Ok(other) => {
                if let Some(live) = conn.take() {
                    live.teardown();
                }
                self.shared.fault("unexpected handshake reply");
                Err(ClientError::Handshake(format!(
                    "expected OK, node said '{other}'"
                )))
            }
            Err(err) => {
                self.shared.fault("handshake exchange failed");
                Err(err)
            }
        }
    }

    /// Request, parse, and store the node's manifest.
    ///
    /// # Errors
    ///
    /// Connection faults as for [`run`](Self::run); additionally
    /// [`ClientError::Manifest`] when the payload fails validation and
    /// [`ClientError::Protocol`] when the node answers with a non-manifest
    /// line.
    pub async fn fetch_manifest(&self, timeout: Duration) -> Result<Manifest, ClientError> {
        let mut conn = self.conn.lock().await;
        let reply = exchange(&mut conn, &self.shared, &Request::ReadManifest, timeout).await?;
        let json = match reply {
            Reply::Manifest(json) => json,
            Reply::Err { code, detail } => return Err(ClientError::Command { code, detail }),
            other => {
                if let Some(live) = conn.take() {
                    live.teardown();
                }
                self.shared.fault("unexpected manifest reply");
                return Err(ClientError::Handshake(format!(
                    "expected MANIFEST, node said '{other}'"
                )));
            }
        };
        let manifest = Manifest::parse_and_validate(&json)?;
        if let Ok(mut slot) = self.shared.manifest.lock() {
            *slot = Some(manifest.clone());
        }
        Ok(manifest)
    }

    /// Send `RUN <token> <args>...` and wait for the reply.
    ///
    /// # Errors
    ///
    /// [`ClientError::Command`] when the node answers `ERR` (the connection
    /// stays up); [`ClientError::StepTimeout`] or
    /// [`ClientError::Disconnected`] on faults, which tear the connection
    /// down.
    pub async fn run(
        &self,
        token: &str,
        args: &[ArgValue],
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let request = Request::Run {
            token: token.to_uppercase(),
            args: args.iter().map(ArgValue::to_string).collect(),
        };
        let mut conn = self.conn.lock().await;
        match exchange(&mut conn, &self.shared, &request, timeout).await? {
            Reply::Ok => Ok(()),
            Reply::Err { code, detail } => Err(ClientError::Command { code, detail }),
            other => {
                if let Some(live) = conn.take() {
                    live.teardown();
                }
                self.shared.fault("unexpected run reply");
                Err(ClientError::Disconnected(format!(
                    "unexpected reply '{other}'"
                )))
            }
        }
    }

    /// Send `STOP` and wait for the reply. Works regardless of handshake
    /// state on the node side.
    pub async fn stop(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        match exchange(&mut conn, &self.shared, &Request::Stop, timeout).await? {
            Reply::Ok => Ok(()),
            Reply::Err { code, detail } => Err(ClientError::Command { code, detail }),
            other => {
                if let Some(live) = conn.take() {
                    live.teardown();
                }
                self.shared.fault("unexpected stop reply");
                Err(ClientError::Disconnected(format!(
                    "unexpected reply '{other}'"
                )))
            }
        }
    }

    /// Drop the connection without talking to the node.
    pub async fn disconnect(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(live) = conn.take() {
            live.teardown();
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

/// Run one request/reply exchange on the held connection.
///
/// On timeout or I/O failure the connection is torn down and the client
/// marked faulted; a stale reply from a timed-out exchange must never be
/// matched to a later request.
async fn exchange(
    conn: &mut Option<Connection>,
    shared: &Shared,
    request: &Request,
    timeout: Duration,
) -> Result<Reply, ClientError> {
    let live = conn.as_mut().ok_or(ClientError::NotConnected)?;

    let (tx, rx) = oneshot::channel();
    if let Ok(mut pending) = live.pending.lock() {
        pending.push_back(tx);
    }

    let line = format!("{request}\n");
    if let Err(err) = live.writer.write_all(line.as_bytes()).await {
        if let Some(dead) = conn.take() {
            dead.teardown();
        }
        shared.fault("write failed");
        return Err(ClientError::Disconnected(err.to_string()));
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(reply_line)) => Ok(Reply::parse(&reply_line)?),
        Ok(Err(_)) => {
            // Reader dropped the sender: the socket died under us.
            if let Some(dead) = conn.take() {
                dead.teardown();
            }
            shared.fault("reader closed");
            Err(ClientError::Disconnected("connection closed".to_string()))
        }
        Err(_) => {
            if let Some(dead) = conn.take() {
                dead.teardown();
            }
            shared.fault("reply timed out");
            Err(ClientError::StepTimeout)
        }
    }
}

/// Reader task: demultiplex inbound lines until EOF or error.
async fn read_loop(
    read_half: tokio::net::tcp::OwnedReadHalf,
    pending: Arc<StdMutex<VecDeque<oneshot::Sender<String>>>>,
    shared: Arc<Shared>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if Reply::is_telemetry_line(&line) {
                    match Reply::parse(&line) {
                        Ok(Reply::Telemetry(pairs)) => {
                            if let Ok(mut snapshot) = shared.snapshot.lock() {
                                for (key, value) in &pairs {
                                    snapshot.insert(key.clone(), value.clone());
                                }
                            }
                            for (key, value) in &pairs {
                                let _ = shared.telemetry_tx.send(TelemetrySample::now(
                                    &shared.alias,
                                    key,
                                    value,
                                ));
                            }
                        }
                        _ => warn!(alias = %shared.alias, %line, "malformed telemetry line"),
                    }
                    continue;
                }
                let waiter = pending
                    .lock()
                    .ok()
                    .and_then(|mut pending| pending.pop_front());
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(line);
                    }
                    None => {
                        warn!(alias = %shared.alias, %line, "unsolicited reply dropped");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(alias = %shared.alias, %err, "read failed");
                break;
            }
        }
    }
    // Waiters see a closed channel and surface Disconnected.
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    shared.fault("stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_node::{NodeServer, emulated};
    use maestro_types::ErrCode;
    use tokio::net::TcpListener;

    const T: Duration = Duration::from_secs(2);

    async fn spawn_base(telemetry: Option<Duration>) -> String {
        let runtime = emulated::drive_base_runtime("base", "base-1").unwrap();
        let mut server = NodeServer::new(runtime);
        if let Some(period) = telemetry {
            server = server.with_telemetry(period);
        }
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));
        addr.to_string()
    }

    #[tokio::test]
    async fn connect_handshake_and_fetch_manifest() {
        let addr = spawn_base(None).await;
        let client = NodeClient::new("base", &addr);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect(T).await.unwrap();
        assert!(client.is_connected());

        let manifest = client.fetch_manifest(T).await.unwrap();
        assert!(manifest.command("FWD").is_some());
        assert_eq!(client.manifest().unwrap().device.name, "base");
    }

    #[tokio::test]
    async fn run_returns_ok_and_command_errors() {
        let addr = spawn_base(None).await;
        let client = NodeClient::new("base", &addr);
        client.connect(T).await.unwrap();

        client.run("FWD", &[ArgValue::Float(0.6)], T).await.unwrap();

        let err = client
            .run("FWD", &[ArgValue::Float(9.9)], T)
            .await
            .unwrap_err();
        match err {
            ClientError::Command { code, .. } => assert_eq!(code, ErrCode::Range),
            other => panic!("expected Command error, got {other:?}"),
        }
        // A refused command leaves the connection healthy.
        assert!(client.is_connected());
        client.stop(T).await.unwrap();
    }

    #[tokio::test]
    async fn run_without_connect_is_rejected() {
        let client = NodeClient::new("base", "127.0.0.1:1");
        let err = client.run("FWD", &[ArgValue::Float(0.1)], T).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn telemetry_is_demultiplexed_from_replies() {
        let addr = spawn_base(Some(Duration::from_millis(20))).await;
        let client = NodeClient::new("base", &addr);
        let mut rx = client.subscribe();
        client.connect(T).await.unwrap();

        // Commands still resolve while telemetry streams in between.
        client.run("FWD", &[ArgValue::Float(0.3)], T).await.unwrap();

        let sample = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.node_alias, "base");

        tokio::time::sleep(Duration::from_millis(60)).await;
        let snapshot = client.telemetry_snapshot();
        assert!(snapshot.contains_key("uptime_ms"));
    }

    #[tokio::test]
    async fn server_disconnect_faults_the_client() {
        // A scripted peer that accepts the handshake then drops the socket
        // mid-exchange.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            // HELLO -> OK, then hang up on the next request.
            let _ = lines.next_line().await;
            write_half.write_all(b"OK\n").await.unwrap();
            let _ = lines.next_line().await;
        });

        let client = NodeClient::new("ghost", &addr);
        client.connect(T).await.unwrap();
        let err = client
            .run("FWD", &[ArgValue::Float(0.5)], T)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Disconnected(_)));
        assert_eq!(client.state(), ConnectionState::Faulted);

        // Subsequent calls fail fast.
        let err = client.stop(T).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let _ = lines.next_line().await;
            write_half.write_all(b"OK\n").await.unwrap();
            // Swallow everything after the handshake.
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let client = NodeClient::new("mute", &addr);
        client.connect(T).await.unwrap();
        let err = client
            .run("FWD", &[ArgValue::Float(0.5)], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::StepTimeout));
        assert_eq!(client.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn reconnect_after_fault() {
        let addr = spawn_base(None).await;
        let client = NodeClient::new("base", &addr);
        client.connect(T).await.unwrap();
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect(T).await.unwrap();
        client.run("FWD", &[ArgValue::Float(0.4)], T).await.unwrap();
    }
}
