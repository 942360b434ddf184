//! Notification stream (server-push channel)

pub mod client;
pub mod transport;

pub use client::{ConnectionState, NotificationStreamClient};
pub use transport::{
    ChannelConnector, RawStreamEvent, SseConnector, StreamConnector, StreamHandle,
    StreamTransport,
};
