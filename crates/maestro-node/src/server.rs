//! [`NodeServer`] – serves one [`NodeRuntime`] over TCP.
//!
//! One accept loop, one task per connection. Each connection gets a fresh
//! [`Session`]; the runtime itself (device + safety governor) is shared
//! behind a mutex because it guards a single physical actuator set. A
//! detached tick task drives the watchdog on a fixed period regardless of
//! protocol traffic, and an optional per-connection publisher streams
//! `TELEMETRY` lines.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use maestro_types::Reply;

use crate::device::Device;
use crate::runtime::{NodeRuntime, Session};

/// Fixed watchdog tick period, independent of protocol traffic.
const WATCHDOG_TICK: Duration = Duration::from_millis(50);

/// TCP front-end for one node runtime.
pub struct NodeServer<D: Device> {
    runtime: Arc<Mutex<NodeRuntime<D>>>,
    telemetry_period: Option<Duration>,
}

impl<D: Device> NodeServer<D> {
    pub fn new(runtime: NodeRuntime<D>) -> Self {
        Self {
            runtime: Arc::new(Mutex::new(runtime)),
            telemetry_period: None,
        }
    }

    /// Stream `TELEMETRY` lines to every connection at `period`
    /// (builder-style).
    pub fn with_telemetry(mut self, period: Duration) -> Self {
        self.telemetry_period = Some(period);
        self
    }

    /// Shared handle to the runtime, mainly for tests inspecting device
    /// state from outside the protocol.
    pub fn runtime(&self) -> Arc<Mutex<NodeRuntime<D>>> {
        Arc::clone(&self.runtime)
    }

    /// Accept connections on `listener` until the task is dropped.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(addr = %local, "node listening");

        // The watchdog must run even when no client is connected.
        let watchdog_runtime = Arc::clone(&self.runtime);
        let watchdog = tokio::spawn(async move {
            let mut tick = tokio::time::interval(WATCHDOG_TICK);
            loop {
                tick.tick().await;
                watchdog_runtime.lock().await.watchdog_tick(Instant::now());
            }
        });

        let result = loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let runtime = Arc::clone(&self.runtime);
                    let telemetry_period = self.telemetry_period;
                    tokio::spawn(async move {
                        if let Err(err) =
                            handle_connection(stream, peer, runtime, telemetry_period).await
                        {
                            debug!(%peer, %err, "connection closed with error");
                        }
                    });
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                    break Err(err);
                }
            }
        };
        watchdog.abort();
        result
    }
}

async fn handle_connection<D: Device>(
    stream: TcpStream,
    peer: SocketAddr,
    runtime: Arc<Mutex<NodeRuntime<D>>>,
    telemetry_period: Option<Duration>,
) -> io::Result<()> {
    debug!(%peer, "client connected");
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));

    let telemetry_task = telemetry_period.map(|period| {
        let runtime = Arc::clone(&runtime);
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                let pairs = runtime.lock().await.telemetry_pairs();
                if pairs.is_empty() {
                    continue;
                }
                let line = Reply::Telemetry(pairs).to_string();
                if write_line(&writer, &line).await.is_err() {
                    break;
                }
            }
        })
    });

    let mut session = Session::new();
    let mut lines = BufReader::new(read_half).lines();
    let result = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let reply = runtime
                    .lock()
                    .await
                    .handle_line(&mut session, &line, Instant::now());
                if let Err(err) = write_line(&writer, &reply.to_string()).await {
                    break Err(err);
                }
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    if let Some(task) = telemetry_task {
        task.abort();
    }
    debug!(%peer, "client disconnected");
    result
}

async fn write_line(writer: &Arc<Mutex<OwnedWriteHalf>>, line: &str) -> io::Result<()> {
    let mut guard = writer.lock().await;
    guard.write_all(line.as_bytes()).await?;
    guard.write_all(b"\n").await
}
