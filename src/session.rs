//! Session (C6, SocketUser): authentication, heartbeat/timeout, and the
//! owned outbound send path.
//!
//! Grounded on `users.py`'s `SocketUser` — heartbeat loop spawned eagerly on
//! construction, two-mode authentication checked in order, `on_client_activity`
//! only counting binary/welcome frames (never `pong`) toward the data-activity
//! clock that guards the timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::config::ServerContext;
use crate::engine::{TranscriptResult, TranscriptSink};
use crate::error::ServerError;
use crate::protocol::messages::ServerMessage;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn new_session_id() -> String {
    let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{n}-{ts}")
}

/// The sink handed to an engine so it can push transcripts/errors straight
/// to the session's outbound channel without needing `&mut Session`.
pub struct SessionSink {
    msg_id: AtomicU64,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl SessionSink {
    pub fn new(outbound: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            msg_id: AtomicU64::new(1),
            outbound,
        }
    }

    fn next_msg_id(&self) -> u64 {
        self.msg_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl TranscriptSink for SessionSink {
    async fn send_transcript(&self, result: TranscriptResult) {
        let msg = ServerMessage::from_transcript(self.next_msg_id(), result);
        let _ = self.outbound.send(msg);
    }

    async fn send_error(&self, error: ServerError) {
        let msg = ServerMessage::Error {
            msg_id: self.next_msg_id(),
            code: error.code(),
            name: error.name().to_string(),
            message: error.to_string(),
        };
        let _ = self.outbound.send(msg);
    }
}

/// Tracks the liveness clock shared between the receive loop and the
/// heartbeat task. `on_data_activity` is driven only by binary frames and
/// the initial `welcome` (§4.2); `pong` only suppresses the next ping via
/// `on_pong`, it never resets the data-activity timer.
#[derive(Clone)]
pub struct Liveness {
    last_activity: Arc<Mutex<Instant>>,
    alive: Arc<std::sync::atomic::AtomicBool>,
    close_code: Arc<AtomicU64>,
    notify: Arc<tokio::sync::Notify>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            last_activity: Arc::new(Mutex::new(Instant::now())),
            alive: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            close_code: Arc::new(AtomicU64::new(1000)),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn on_data_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn seconds_since_activity(&self) -> u64 {
        self.last_activity.lock().elapsed().as_secs()
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Marks the session dead, records the WebSocket close code the
    /// forward task should send, and wakes the receive loop so an idle
    /// client (no more inbound frames) still gets torn down promptly.
    pub fn request_close(&self, code: u16) {
        self.close_code.store(code as u64, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn close_code(&self) -> u16 {
        self.close_code.load(Ordering::SeqCst) as u16
    }

    pub async fn closed(&self) {
        self.notify.notified().await;
    }
}

/// Spawns the cooperative heartbeat task for one session. Returns its
/// `JoinHandle` so the owning task can abort it on socket close.
pub fn spawn_heartbeat(
    context: Arc<ServerContext>,
    liveness: Liveness,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    sink: Arc<SessionSink>,
) -> tokio::task::JoinHandle<()> {
    let heartbeat_delay = Duration::from_secs(context.config.heartbeat_delay);
    let timeout_seconds = context.config.timeout_seconds;

    tokio::spawn(async move {
        let mut ticker = interval(heartbeat_delay);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            ticker.tick().await;
            if !liveness.is_alive() {
                return;
            }

            if liveness.seconds_since_activity() > timeout_seconds {
                sink.send_error(ServerError::TimeoutMessage).await;
                liveness.request_close(1013);
                return;
            }

            let _ = outbound.send(ServerMessage::Ping {
                msg_id: 0,
                code: 200,
            });
        }
    })
}

/// Two-mode authentication: a shared common token, else a per-client_id
/// token table (§4.2). Checked in order.
pub fn authenticate(
    context: &ServerContext,
    client_id: Option<&str>,
    access_token: Option<&str>,
) -> bool {
    let Some(token) = access_token else {
        return false;
    };

    if let Some(common) = &context.config.auth.common_token {
        if token == common {
            return true;
        }
    }

    if let Some(client_id) = client_id {
        if let Some(expected) = context.config.auth.user_tokens.get(client_id) {
            return token == expected;
        }
    }

    false
}
