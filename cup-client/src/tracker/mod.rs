//! Order tracking socket (duplex channel)

pub mod client;
pub mod transport;

pub use client::{ListenerGuard, OrderTracker};
pub use transport::{
    ChannelSocketConnector, SocketConnector, SocketHandle, SocketTransport, WsConnector,
};
