//! DailyCup realtime client
//!
//! Client-side realtime layer for the DailyCup storefront: a server-push
//! notification stream feeding a local notification store, and a duplex
//! order tracking socket. Both channels reconnect with capped exponential
//! backoff and are torn down cleanly on disconnect.

pub mod backoff;
pub mod config;
pub mod error;
pub mod store;
pub mod stream;
pub mod tracker;

pub use backoff::ReconnectPolicy;
pub use config::RealtimeConfig;
pub use error::{ClientError, ClientResult};
pub use store::{NotificationStore, StoreEvent};
pub use stream::{ConnectionState, NotificationStreamClient};
pub use tracker::{ListenerGuard, OrderTracker};

// Re-export shared wire types for convenience
pub use shared::{NotificationKind, NotificationRecord, StreamFrame, TrackerEvent, TrackerRequest};
