//! Notification record model
//!
//! The in-memory representation of a single customer-facing notification,
//! as delivered over the push stream or synthesized from channel events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==================== Notification Kind ====================

/// Notification classification
///
/// An open tag, not a closed set: servers may introduce new kinds at any
/// time, which deserialize into [`NotificationKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Order lifecycle (placed, preparing, out for delivery, ...)
    Order,
    /// Payment results
    Payment,
    /// Promotions and Happy Hour announcements
    Promo,
    /// General information
    #[default]
    Info,
    /// A kind this client version does not know about
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Order => write!(f, "order"),
            Self::Payment => write!(f, "payment"),
            Self::Promo => write!(f, "promo"),
            Self::Info => write!(f, "info"),
            Self::Other(tag) => write!(f, "{}", tag),
        }
    }
}

// ==================== Notification Record ====================

/// A single notification as held by the local store
///
/// Server-pushed notifications arrive with an `id` assigned by the
/// notification source; records synthesized from channel events get a
/// locally sequenced id instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique id, monotonic per source
    #[serde(default)]
    pub id: i64,
    /// Classification tag, defaults to `info` when the server omits it
    #[serde(default, rename = "type")]
    pub kind: NotificationKind,
    /// Display title
    pub title: String,
    /// Display body
    pub message: String,
    /// Opaque payload, shape depends on `kind` (e.g. `{orderId, status}`)
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
    /// Presentation hint
    #[serde(default)]
    pub icon: String,
    /// Optional navigation target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// Read flag, true exactly when `read_at` is set
    #[serde(default)]
    pub is_read: bool,
    /// Set once, on the transition to read
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// Arrival time; local clock when the server omits it
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl NotificationRecord {
    /// Create an unread record with the given kind
    pub fn new(
        id: i64,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            title: title.into(),
            message: message.into(),
            data: empty_object(),
            icon: String::new(),
            action_url: None,
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    /// Create an unread informational record
    pub fn info(id: i64, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, NotificationKind::Info, title, message)
    }

    /// Attach an opaque payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Attach a navigation target
    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    /// Attach a presentation icon
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    /// Transition to read, stamping `read_at` exactly once
    ///
    /// Returns true if the record actually flipped (i.e. it was unread).
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(at);
        true
    }
}
