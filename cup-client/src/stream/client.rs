//! Notification stream client
//!
//! Maintains one server-push connection per authenticated session,
//! decodes frames, and routes them into the local store. Connection
//! lifecycle (capped exponential backoff, reset on confirmed open,
//! cancellation-safe teardown) lives in the supervisor task spawned by
//! [`NotificationStreamClient::connect`].

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use shared::StreamFrame;

use crate::backoff::ReconnectPolicy;
use crate::config::RealtimeConfig;
use crate::error::ClientError;
use crate::store::NotificationStore;
use crate::stream::transport::{SseConnector, StreamConnector, StreamTransport};

/// Ids for records synthesized from named channel events
///
/// Process-wide monotonic sequence: unique under arbitrary bursts,
/// unlike a wall-clock-derived value.
static LOCAL_ID_SEQ: AtomicI64 = AtomicI64::new(1);

fn next_local_id() -> i64 {
    LOCAL_ID_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Transport state as observed by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub reconnect_attempts: u32,
}

struct StreamState {
    connected: AtomicBool,
    /// A supervisor task is active (connected or dialing/backing off)
    running: AtomicBool,
    attempts: AtomicU32,
    cancel: Mutex<Option<CancellationToken>>,
}

/// Client for the unidirectional notification stream
pub struct NotificationStreamClient {
    connector: Arc<dyn StreamConnector>,
    store: Arc<NotificationStore>,
    policy: ReconnectPolicy,
    idle_timeout: Duration,
    state: Arc<StreamState>,
}

impl NotificationStreamClient {
    /// Create a client dialing the configured SSE endpoint
    pub fn new(config: RealtimeConfig, store: Arc<NotificationStore>) -> Self {
        let connector = Arc::new(SseConnector::new(config.clone()));
        Self::with_connector(&config, store, connector)
    }

    /// Create a client over a custom transport (tests, embedding)
    pub fn with_connector(
        config: &RealtimeConfig,
        store: Arc<NotificationStore>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        Self {
            connector,
            store,
            policy: ReconnectPolicy::from_config(config),
            idle_timeout: config.idle_timeout,
            state: Arc::new(StreamState {
                connected: AtomicBool::new(false),
                running: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                cancel: Mutex::new(None),
            }),
        }
    }

    /// Open the stream with the given auth token
    ///
    /// Fire-and-forget: spawns the supervisor and returns immediately.
    /// Idempotent — a second call while connected or while an attempt is
    /// in flight is a no-op. Establishment failures are never surfaced
    /// here; they feed the backoff loop and, past the attempt cap, leave
    /// the client observably disconnected.
    pub fn connect(&self, token: &str) {
        if self.state.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Stream connect ignored, already active");
            return;
        }
        self.state.attempts.store(0, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        *self.state.cancel.lock().unwrap() = Some(cancel.clone());

        let connector = Arc::clone(&self.connector);
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        let policy = self.policy;
        let idle_timeout = self.idle_timeout;
        let token = token.to_string();

        tokio::spawn(async move {
            supervise(connector, store, state, policy, idle_timeout, cancel, token).await;
        });
    }

    /// Close the stream and cancel any pending reconnect
    ///
    /// Safe to call at any point, including mid-backoff: the pending
    /// retry timer is cancelled, so nothing fires into a torn-down
    /// client. Safe to call when already disconnected.
    pub fn disconnect(&self) {
        if let Some(cancel) = self.state.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        self.state.running.store(false, Ordering::SeqCst);
        self.state.attempts.store(0, Ordering::SeqCst);
        if self.state.connected.swap(false, Ordering::SeqCst) {
            self.store.set_connected(false);
        }
        tracing::info!("Notification stream disconnected");
    }

    /// Whether the transport is currently open (no side effects)
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Consecutive failed attempts in the current epoch
    pub fn reconnect_attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState {
            connected: self.is_connected(),
            reconnect_attempts: self.reconnect_attempts(),
        }
    }

    /// The store this client writes into
    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }
}

enum ReadExit {
    Cancelled,
    Failed(ClientError),
}

async fn supervise(
    connector: Arc<dyn StreamConnector>,
    store: Arc<NotificationStore>,
    state: Arc<StreamState>,
    policy: ReconnectPolicy,
    idle_timeout: Duration,
    cancel: CancellationToken,
    token: String,
) {
    loop {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connector.connect(&token) => result,
        };

        match dialed {
            Ok(transport) => {
                // Confirmed open: only here does the counter reset.
                state.attempts.store(0, Ordering::SeqCst);
                state.connected.store(true, Ordering::SeqCst);
                store.set_connected(true);
                tracing::info!("Notification stream connected");

                let exit = read_loop(transport.as_ref(), &store, &cancel, idle_timeout).await;

                state.connected.store(false, Ordering::SeqCst);
                store.set_connected(false);

                match exit {
                    ReadExit::Cancelled => break,
                    ReadExit::Failed(e) => {
                        tracing::warn!("Notification stream lost: {}", e);
                    }
                }
            }
            Err(e) => tracing::warn!("Notification stream dial failed: {}", e),
        }

        let attempts_so_far = state.attempts.load(Ordering::SeqCst);
        if !policy.allows(attempts_so_far) {
            tracing::warn!(
                attempts = attempts_so_far,
                "Notification stream retry budget exhausted"
            );
            break;
        }
        let attempt = attempts_so_far + 1;
        state.attempts.store(attempt, Ordering::SeqCst);
        let delay = policy.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Stream reconnect scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    // On cancellation disconnect() already reset the flags; a stale
    // supervisor must not clobber a newer epoch's state.
    if !cancel.is_cancelled() {
        state.running.store(false, Ordering::SeqCst);
    }
}

async fn read_loop(
    transport: &dyn StreamTransport,
    store: &NotificationStore,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> ReadExit {
    loop {
        let received = if idle_timeout.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return ReadExit::Cancelled,
                result = transport.next_event() => result,
            }
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return ReadExit::Cancelled,
                timed = tokio::time::timeout(idle_timeout, transport.next_event()) => match timed {
                    Ok(result) => result,
                    Err(_) => return ReadExit::Failed(ClientError::IdleTimeout(idle_timeout)),
                },
            }
        };

        match received {
            Ok(raw) => route_frame(&raw.event, &raw.data, store),
            Err(e) => return ReadExit::Failed(e),
        }
    }
}

/// Classify one frame and apply it to the store
///
/// Malformed frames are logged and dropped; they never tear down the
/// connection or trigger a reconnect.
fn route_frame(event: &str, data: &str, store: &NotificationStore) {
    match StreamFrame::decode(event, data) {
        Err(e) => tracing::warn!("Dropping malformed stream frame: {}", e),
        Ok(StreamFrame::Ping) => tracing::trace!("Stream keep-alive"),
        Ok(StreamFrame::Notification { notification }) => store.add_notification(notification),
        Ok(StreamFrame::UnreadCount { count }) => store.set_unread_count(count),
        Ok(StreamFrame::OrderUpdate(update)) => {
            store.add_notification(update.into_record(next_local_id()));
        }
        Ok(StreamFrame::PaymentUpdate(update)) => {
            store.add_notification(update.into_record(next_local_id()));
        }
        Ok(StreamFrame::Promo(promo)) => {
            store.add_notification(promo.into_record(next_local_id()));
        }
        Ok(StreamFrame::Unknown) => tracing::debug!("Dropping unrecognized stream frame"),
    }
}
