//! IPC Server / Command Dispatcher (spec.md §4.10, §6): a local Unix
//! stream socket speaking newline-delimited JSON `Envelope<Command>` in,
//! `Envelope<Event>` out.
//!
//! Grounded in `factory/ws.rs`'s `WsMessage` broadcaster: every connected
//! client gets a writer task fed by a bounded per-client queue plus a
//! shared board-state broadcast, reworked from a websocket frame onto a
//! `tokio::net::UnixListener` line protocol. Unlike a browser client, a
//! malformed or over-slow Fuel client is simply disconnected rather than
//! kept alive — spec.md §7 "a misbehaving client is disconnected and
//! cleaned up, the daemon continues."

mod dispatch;

pub use dispatch::{dispatch_command, CommandContext};

use crate::context::Context;
use crate::errors::IpcError;
use fuel_common::{Envelope, Event};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A `Command` that arrived off the socket, still tagged with the
/// client and `request_id` its response events should be correlated to.
#[derive(Debug)]
pub struct IncomingCommand {
    pub client_id: u64,
    pub request_id: Option<Uuid>,
    pub command: fuel_common::Command,
}

struct ClientHandle {
    tx: mpsc::Sender<String>,
    buffered_bytes: Arc<AtomicUsize>,
}

/// Fans daemon events out to every connected client, and targeted
/// responses back to the one that asked (spec.md §4.10 "Each client
/// receives a `Hello` on connect and an initial `Snapshot`").
pub struct Broadcaster {
    instance_id: Uuid,
    clients: dashmap::DashMap<u64, ClientHandle>,
    next_id: AtomicU64,
    client_buffer_bytes: usize,
}

impl Broadcaster {
    pub fn new(instance_id: Uuid, client_buffer_bytes: usize) -> Self {
        Self {
            instance_id,
            clients: dashmap::DashMap::new(),
            next_id: AtomicU64::new(1),
            client_buffer_bytes,
        }
    }

    fn register(&self, tx: mpsc::Sender<String>) -> (u64, Arc<AtomicUsize>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let buffered_bytes = Arc::new(AtomicUsize::new(0));
        self.clients.insert(id, ClientHandle { tx, buffered_bytes: Arc::clone(&buffered_bytes) });
        (id, buffered_bytes)
    }

    fn unregister(&self, id: u64) {
        self.clients.remove(&id);
    }

    /// Broadcasts `event` to every connected client (spec.md §4.10
    /// events: `TaskSpawned`, `TaskCompleted`, `Snapshot`, ...).
    pub fn broadcast(&self, event: &Event) {
        self.send_envelope(None, None, event);
    }

    /// Sends `event` to one client only, carrying `request_id` so the
    /// client can correlate it to the command it issued.
    pub fn send_to(&self, client_id: u64, request_id: Option<Uuid>, event: &Event) {
        self.send_envelope(Some(client_id), request_id, event);
    }

    fn send_envelope(&self, target: Option<u64>, request_id: Option<Uuid>, event: &Event) {
        let envelope = Envelope::new(self.instance_id, request_id, event.clone());
        let Ok(mut line) = serde_json::to_string(&envelope) else {
            warn!("failed to serialize outbound event, dropping");
            return;
        };
        line.push('\n');

        let targets: Vec<u64> = match target {
            Some(id) => vec![id],
            None => self.clients.iter().map(|entry| *entry.key()).collect(),
        };

        for id in targets {
            self.deliver(id, &line);
        }
    }

    /// Enqueues `line` for `id`, disconnecting the client instead of
    /// blocking when it has fallen more than `client_buffer_bytes`
    /// behind (spec.md §7 IpcError::BackpressureExceeded).
    fn deliver(&self, id: u64, line: &str) {
        let Some(client) = self.clients.get(&id) else { return };
        let projected = client.buffered_bytes.fetch_add(line.len(), Ordering::SeqCst) + line.len();
        if projected > self.client_buffer_bytes {
            client.buffered_bytes.fetch_sub(line.len(), Ordering::SeqCst);
            drop(client);
            warn!(client_id = id, limit = self.client_buffer_bytes, "client exceeded send buffer, disconnecting");
            self.unregister(id);
            return;
        }
        if client.tx.try_send(line.to_string()).is_err() {
            client.buffered_bytes.fetch_sub(line.len(), Ordering::SeqCst);
            drop(client);
            self.unregister(id);
        }
    }
}

const CLIENT_QUEUE_DEPTH: usize = 256;

/// The accept loop: binds the socket (removing a stale file first) and
/// spawns one reader/writer pair per connection.
pub struct IpcServer {
    listener: UnixListener,
    broadcaster: Arc<Broadcaster>,
}

impl IpcServer {
    /// Binds `ctx.socket_path`. spec.md §6: "The IPC socket file is
    /// removed on graceful shutdown" — on startup we remove it too, since
    /// its presence here means a prior ungraceful exit left it behind (a
    /// live daemon's PID is checked separately before we get this far).
    pub fn bind(ctx: &Context, instance_id: Uuid, client_buffer_bytes: usize) -> std::io::Result<Self> {
        if ctx.socket_path.exists() {
            std::fs::remove_file(&ctx.socket_path)?;
        }
        let listener = UnixListener::bind(&ctx.socket_path)?;
        Ok(Self { listener, broadcaster: Arc::new(Broadcaster::new(instance_id, client_buffer_bytes)) })
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Runs the accept loop until the socket is closed (daemon shutdown
    /// drops the `IpcServer`, which closes the listener). Every accepted
    /// command is forwarded to `commands_tx` for the daemon loop to
    /// dispatch; a `RequestSnapshot` is injected automatically on
    /// connect so the new client's initial `Snapshot` comes from the same
    /// dispatch path as any other (spec.md §4.10 "initial `Snapshot`").
    pub async fn serve(self, commands_tx: mpsc::Sender<IncomingCommand>) {
        loop {
            let (stream, _addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "ipc accept failed");
                    continue;
                }
            };
            let broadcaster = Arc::clone(&self.broadcaster);
            let commands_tx = commands_tx.clone();
            tokio::spawn(handle_client(stream, broadcaster, commands_tx));
        }
    }
}

async fn handle_client(stream: UnixStream, broadcaster: Arc<Broadcaster>, commands_tx: mpsc::Sender<IncomingCommand>) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE_DEPTH);
    let (client_id, buffered_bytes) = broadcaster.register(tx);

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let len = line.len();
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            buffered_bytes.fetch_sub(len.min(buffered_bytes.load(Ordering::SeqCst)), Ordering::SeqCst);
        }
        let _ = write_half.shutdown().await;
    });

    broadcaster.send_to(client_id, None, &Event::Hello { version: env!("CARGO_PKG_VERSION").to_string() });
    let _ = commands_tx
        .send(IncomingCommand { client_id, request_id: None, command: fuel_common::Command::RequestSnapshot })
        .await;

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match parse_command(&line) {
                Ok((request_id, command)) => {
                    if commands_tx.send(IncomingCommand { client_id, request_id, command }).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    broadcaster.send_to(client_id, None, &Event::Error { code: "BadRequest".into(), message: err.to_string() });
                }
            },
            Ok(None) => break,
            Err(e) => {
                debug!(client_id, error = %e, "ipc read error");
                break;
            }
        }
    }

    broadcaster.unregister(client_id);
    writer.abort();
}

/// Parses one line of input as `Envelope<Command>`. Partial/unterminated
/// JSON never reaches here: `BufReader::lines()` already buffers until a
/// newline (spec.md §6 "partial JSON is buffered until a terminating
/// newline").
fn parse_command(line: &str) -> Result<(Option<Uuid>, fuel_common::Command), IpcError> {
    #[derive(serde::Deserialize)]
    struct Raw {
        request_id: Option<Uuid>,
        #[serde(flatten)]
        command: fuel_common::Command,
    }
    let raw: Raw = serde_json::from_str(line).map_err(|e| IpcError::Malformed(e.to_string()))?;
    Ok((raw.request_id, raw.command))
}
