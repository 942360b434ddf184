//! Order tracker
//!
//! Duplex socket for live per-order updates. Callers subscribe to order
//! ids and register callbacks; the tracker keeps the server-side topic
//! set in sync across reconnects by replaying every tracked id on each
//! successful open. Reconnection follows the same capped exponential
//! backoff as the notification stream, with its own counter.

use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shared::{TrackerEvent, TrackerRequest};

use crate::backoff::ReconnectPolicy;
use crate::config::RealtimeConfig;
use crate::error::ClientError;
use crate::tracker::transport::{SocketConnector, SocketTransport, WsConnector};

type UpdateCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

struct TrackerState {
    connected: AtomicBool,
    /// A supervisor task is active (connected or dialing/backing off)
    running: AtomicBool,
    attempts: AtomicU32,
    cancel: Mutex<Option<CancellationToken>>,
    /// Order ids replayed as subscribe frames on every open
    subscriptions: Mutex<BTreeSet<String>>,
    /// Per-order callbacks; the u64 is the removal key held by the guard
    listeners: Mutex<HashMap<String, Vec<(u64, UpdateCallback)>>>,
    listener_seq: AtomicU64,
    /// Sender into the live session loop; `None` while disconnected
    outbound: Mutex<Option<mpsc::UnboundedSender<TrackerRequest>>>,
}

impl TrackerState {
    fn send(&self, frame: TrackerRequest) {
        if let Some(tx) = &*self.outbound.lock().unwrap() {
            let _ = tx.send(frame);
        }
    }
}

/// Client for the order tracking socket
pub struct OrderTracker {
    connector: Arc<dyn SocketConnector>,
    policy: ReconnectPolicy,
    idle_timeout: Duration,
    heartbeat_interval: Duration,
    state: Arc<TrackerState>,
}

impl OrderTracker {
    /// Create a tracker dialing the configured WebSocket endpoint
    pub fn new(config: RealtimeConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.ws_url.clone()));
        Self::with_connector(&config, connector)
    }

    /// Create a tracker over a custom transport (tests, embedding)
    pub fn with_connector(config: &RealtimeConfig, connector: Arc<dyn SocketConnector>) -> Self {
        Self {
            connector,
            policy: ReconnectPolicy::from_config(config),
            idle_timeout: config.idle_timeout,
            heartbeat_interval: config.heartbeat_interval,
            state: Arc::new(TrackerState {
                connected: AtomicBool::new(false),
                running: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                cancel: Mutex::new(None),
                subscriptions: Mutex::new(BTreeSet::new()),
                listeners: Mutex::new(HashMap::new()),
                listener_seq: AtomicU64::new(1),
                outbound: Mutex::new(None),
            }),
        }
    }

    /// Open the socket
    ///
    /// Fire-and-forget and idempotent, like
    /// [`crate::stream::NotificationStreamClient::connect`]. On every
    /// successful open the tracked order set is replayed as subscribe
    /// frames before any inbound frame is processed.
    pub fn connect(&self) {
        if self.state.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Tracker connect ignored, already active");
            return;
        }
        self.state.attempts.store(0, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        *self.state.cancel.lock().unwrap() = Some(cancel.clone());

        let connector = Arc::clone(&self.connector);
        let state = Arc::clone(&self.state);
        let policy = self.policy;
        let idle_timeout = self.idle_timeout;
        let heartbeat = self.heartbeat_interval;

        tokio::spawn(async move {
            supervise(connector, state, policy, idle_timeout, heartbeat, cancel).await;
        });
    }

    /// Close the socket and forget all tracking state
    ///
    /// Hard reset: cancels the supervisor (including a pending backoff
    /// timer), clears the tracked order set and every registered
    /// callback. Safe to call when already disconnected.
    pub fn disconnect(&self) {
        if let Some(cancel) = self.state.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        self.state.running.store(false, Ordering::SeqCst);
        self.state.attempts.store(0, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        *self.state.outbound.lock().unwrap() = None;
        self.state.subscriptions.lock().unwrap().clear();
        self.state.listeners.lock().unwrap().clear();
        tracing::info!("Order tracker disconnected");
    }

    /// Track an order
    ///
    /// Sends a subscribe frame immediately when connected; otherwise the
    /// id is queued and replayed on the next open.
    pub fn subscribe_to_order(&self, order_id: &str) {
        let inserted = self
            .state
            .subscriptions
            .lock()
            .unwrap()
            .insert(order_id.to_string());
        if inserted && self.is_connected() {
            self.state.send(TrackerRequest::Subscribe {
                order_id: order_id.to_string(),
            });
        }
    }

    /// Stop tracking an order; no-op if it was never tracked
    pub fn unsubscribe_from_order(&self, order_id: &str) {
        let removed = self.state.subscriptions.lock().unwrap().remove(order_id);
        if removed && self.is_connected() {
            self.state.send(TrackerRequest::Unsubscribe {
                order_id: order_id.to_string(),
            });
        }
    }

    /// Register a callback for one order's updates
    ///
    /// The returned guard removes exactly this callback on
    /// [`ListenerGuard::dispose`] or drop. Registration is independent
    /// of [`Self::subscribe_to_order`]; updates only arrive for tracked
    /// orders.
    pub fn on_order_update(
        &self,
        order_id: &str,
        callback: impl Fn(&serde_json::Value) + Send + Sync + 'static,
    ) -> ListenerGuard {
        let id = self.state.listener_seq.fetch_add(1, Ordering::Relaxed);
        self.state
            .listeners
            .lock()
            .unwrap()
            .entry(order_id.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        ListenerGuard {
            state: Arc::clone(&self.state),
            order_id: order_id.to_string(),
            id,
        }
    }

    /// Send a liveness probe; silently skipped when disconnected
    pub fn ping(&self) {
        if self.is_connected() {
            self.state.send(TrackerRequest::Ping);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Consecutive failed attempts in the current epoch
    pub fn reconnect_attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Currently tracked order ids, sorted
    pub fn subscribed_orders(&self) -> Vec<String> {
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }
}

/// Removes one registered callback when disposed or dropped
#[must_use = "dropping the guard unregisters the callback"]
pub struct ListenerGuard {
    state: Arc<TrackerState>,
    order_id: String,
    id: u64,
}

impl ListenerGuard {
    /// Unregister the callback now
    pub fn dispose(self) {}
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let mut listeners = self.state.listeners.lock().unwrap();
        if let Some(entries) = listeners.get_mut(&self.order_id) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                listeners.remove(&self.order_id);
            }
        }
    }
}

enum SessionExit {
    Cancelled,
    Failed(ClientError),
}

async fn supervise(
    connector: Arc<dyn SocketConnector>,
    state: Arc<TrackerState>,
    policy: ReconnectPolicy,
    idle_timeout: Duration,
    heartbeat: Duration,
    cancel: CancellationToken,
) {
    loop {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connector.connect() => result,
        };

        match dialed {
            Ok(transport) => match open_session(
                transport.as_ref(),
                &state,
                &cancel,
                idle_timeout,
                heartbeat,
            )
            .await
            {
                SessionExit::Cancelled => break,
                SessionExit::Failed(e) => {
                    tracing::warn!("Order tracker session lost: {}", e);
                }
            },
            Err(e) => tracing::warn!("Order tracker dial failed: {}", e),
        }

        let attempts_so_far = state.attempts.load(Ordering::SeqCst);
        if !policy.allows(attempts_so_far) {
            tracing::warn!(
                attempts = attempts_so_far,
                "Order tracker retry budget exhausted"
            );
            break;
        }
        let attempt = attempts_so_far + 1;
        state.attempts.store(attempt, Ordering::SeqCst);
        let delay = policy.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Tracker reconnect scheduled");

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

/// Replay subscriptions, mark the socket open, run it until it dies
async fn open_session(
    transport: &dyn SocketTransport,
    state: &TrackerState,
    cancel: &CancellationToken,
    idle_timeout: Duration,
    heartbeat: Duration,
) -> SessionExit {
    // Every tracked order is re-announced before any inbound frame is
    // processed, so the server topic set matches across reconnects.
    let replayed: Vec<String> = state.subscriptions.lock().unwrap().iter().cloned().collect();
    for order_id in &replayed {
        if let Err(e) = transport
            .send(&TrackerRequest::Subscribe {
                order_id: order_id.clone(),
            })
            .await
        {
            return SessionExit::Failed(e);
        }
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    *state.outbound.lock().unwrap() = Some(out_tx);
    state.attempts.store(0, Ordering::SeqCst);
    state.connected.store(true, Ordering::SeqCst);

    // An order subscribed while the replay was in flight saw neither the
    // snapshot nor a live connection. Announce the difference; a
    // duplicate subscribe is idempotent on the wire.
    let replayed: BTreeSet<String> = replayed.into_iter().collect();
    let missed: Vec<String> = state
        .subscriptions
        .lock()
        .unwrap()
        .iter()
        .filter(|id| !replayed.contains(id.as_str()))
        .cloned()
        .collect();
    for order_id in missed {
        if let Err(e) = transport
            .send(&TrackerRequest::Subscribe { order_id })
            .await
        {
            state.connected.store(false, Ordering::SeqCst);
            *state.outbound.lock().unwrap() = None;
            return SessionExit::Failed(e);
        }
    }
    tracing::info!("Order tracker connected");

    let mut heartbeat = if heartbeat.is_zero() {
        None
    } else {
        let start = tokio::time::Instant::now() + heartbeat;
        Some(tokio::time::interval_at(start, heartbeat))
    };

    let exit = loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break SessionExit::Cancelled,
            Some(frame) = out_rx.recv() => {
                if let Err(e) = transport.send(&frame).await {
                    break SessionExit::Failed(e);
                }
                continue;
            }
            _ = heartbeat_tick(&mut heartbeat) => {
                if let Err(e) = transport.send(&TrackerRequest::Ping).await {
                    break SessionExit::Failed(e);
                }
                continue;
            }
            received = next_inbound(transport, idle_timeout) => received,
        };

        match received {
            Ok(text) => dispatch(&text, state),
            Err(e) => break SessionExit::Failed(e),
        }
    };

    state.connected.store(false, Ordering::SeqCst);
    *state.outbound.lock().unwrap() = None;
    exit
}

/// Tick the heartbeat interval, or park forever when disabled
async fn heartbeat_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_inbound(
    transport: &dyn SocketTransport,
    idle_timeout: Duration,
) -> Result<String, ClientError> {
    if idle_timeout.is_zero() {
        transport.next_text().await
    } else {
        match tokio::time::timeout(idle_timeout, transport.next_text()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::IdleTimeout(idle_timeout)),
        }
    }
}

/// Parse one inbound frame and fan out to listeners
///
/// Malformed and unknown frames are logged and dropped. A panicking
/// callback is isolated; its siblings still run.
fn dispatch(text: &str, state: &TrackerState) {
    let event = match serde_json::from_str::<TrackerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Dropping malformed tracker frame: {}", e);
            return;
        }
    };

    match event {
        TrackerEvent::Connected => tracing::debug!("Tracker acknowledged by server"),
        TrackerEvent::Subscribed { order_id } => {
            tracing::debug!(order_id = %order_id, "Order subscription acknowledged");
        }
        TrackerEvent::Pong => tracing::trace!("Tracker pong"),
        TrackerEvent::Unknown => tracing::debug!("Dropping unrecognized tracker frame"),
        TrackerEvent::OrderUpdate { order_id, data } => {
            // Snapshot under the lock, invoke outside it, so a callback
            // may register or dispose listeners without deadlocking.
            let callbacks: Vec<UpdateCallback> = state
                .listeners
                .lock()
                .unwrap()
                .get(&order_id)
                .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default();

            for callback in callbacks {
                if catch_unwind(AssertUnwindSafe(|| callback(&data))).is_err() {
                    tracing::error!(order_id = %order_id, "Order update listener panicked");
                }
            }
        }
    }
}
