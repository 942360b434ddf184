//! Local notification store
//!
//! Single source of truth for notification records, the unread counter,
//! and the stream's connection flag. Written only by the stream client,
//! read by any number of UI observers. Mutations are synchronous (plain
//! mutex, no await) and every call is applied — nothing is coalesced.
//!
//! Contents live for the process session only; rehydration after a
//! restart is a separate REST concern and not handled here.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::broadcast;

use shared::NotificationRecord;

/// Change event delivered to store observers
#[derive(Debug, Clone)]
pub enum StoreEvent {
    NotificationAdded(NotificationRecord),
    NotificationRead(i64),
    NotificationRemoved(i64),
    UnreadChanged(u32),
    ConnectionChanged(bool),
    Cleared,
}

struct StoreInner {
    /// Most-recent-first
    notifications: VecDeque<NotificationRecord>,
    unread: u32,
    connected: bool,
}

/// Observable in-memory notification collection
pub struct NotificationStore {
    inner: Mutex<StoreInner>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(StoreInner {
                notifications: VecDeque::new(),
                unread: 0,
                connected: false,
            }),
            events,
        }
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine; the store is still queryable.
        if let Err(e) = self.events.send(event) {
            tracing::trace!("No store observers: {}", e);
        }
    }

    // ==================== Mutators (stream client) ====================

    /// Insert a record at the head (most-recent-first)
    ///
    /// Duplicate ids are not deduplicated here; that responsibility, if
    /// needed, belongs to the caller.
    pub fn add_notification(&self, record: NotificationRecord) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.notifications.push_front(record.clone());
        }
        self.emit(StoreEvent::NotificationAdded(record));
    }

    /// Authoritative unread counter overwrite
    pub fn set_unread_count(&self, count: u32) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.unread = count;
        }
        self.emit(StoreEvent::UnreadChanged(count));
    }

    /// Reflect transport state for UI indicators
    pub fn set_connected(&self, connected: bool) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.connected = connected;
        }
        self.emit(StoreEvent::ConnectionChanged(connected));
    }

    // ==================== Mutators (user actions) ====================

    /// Mark one record as read (local only, idempotent)
    ///
    /// Returns true if the record existed and actually flipped. The
    /// unread counter is decremented locally; the server remains
    /// authoritative via `unread_count` frames.
    pub fn mark_read(&self, id: i64) -> bool {
        let (flipped, unread) = {
            let mut inner = self.inner.lock().unwrap();
            let flipped = inner
                .notifications
                .iter_mut()
                .find(|n| n.id == id)
                .map(|n| n.mark_read(Utc::now()))
                .unwrap_or(false);
            if flipped {
                inner.unread = inner.unread.saturating_sub(1);
            }
            (flipped, inner.unread)
        };
        if flipped {
            self.emit(StoreEvent::NotificationRead(id));
            self.emit(StoreEvent::UnreadChanged(unread));
        }
        flipped
    }

    /// Mark every record as read and zero the unread counter
    pub fn mark_all_read(&self) {
        let read_ids: Vec<i64> = {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();
            let ids = inner
                .notifications
                .iter_mut()
                .filter(|n| !n.is_read)
                .map(|n| {
                    n.mark_read(now);
                    n.id
                })
                .collect();
            inner.unread = 0;
            ids
        };
        for id in &read_ids {
            self.emit(StoreEvent::NotificationRead(*id));
        }
        self.emit(StoreEvent::UnreadChanged(0));
    }

    /// Delete one record (explicit user action)
    pub fn remove(&self, id: i64) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.notifications.len();
            inner.notifications.retain(|n| n.id != id);
            inner.notifications.len() != before
        };
        if removed {
            self.emit(StoreEvent::NotificationRemoved(id));
        }
        removed
    }

    /// Drop every record and zero the counter
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.notifications.clear();
            inner.unread = 0;
        }
        self.emit(StoreEvent::Cleared);
        self.emit(StoreEvent::UnreadChanged(0));
    }

    // ==================== Readers ====================

    /// Snapshot of all records, most-recent-first
    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.inner
            .lock()
            .unwrap()
            .notifications
            .iter()
            .cloned()
            .collect()
    }

    pub fn unread_count(&self) -> u32 {
        self.inner.lock().unwrap().unread
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
