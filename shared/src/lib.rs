//! Shared wire types for the DailyCup realtime layer
//!
//! Frame definitions and the notification record model, shared between
//! the stream client, the order tracker, and any embedding application.

pub mod notification;
pub mod stream;
pub mod tracker;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use notification::{NotificationKind, NotificationRecord};
pub use stream::{OrderUpdate, PaymentUpdate, PromoEvent, StreamFrame};
pub use tracker::{TrackerEvent, TrackerRequest};
