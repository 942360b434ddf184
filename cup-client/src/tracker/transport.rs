//! Order socket transport abstraction
//!
//! The tracker needs a duplex connection: outbound subscribe/unsubscribe/
//! ping frames, inbound text frames. [`WsConnector`] dials the real
//! WebSocket endpoint; [`ChannelSocketConnector`] is an in-memory double
//! that records outbound frames for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use shared::{TrackerEvent, TrackerRequest};

use crate::error::{ClientError, ClientResult};

/// An open duplex order socket
#[async_trait]
pub trait SocketTransport: Send + Sync {
    /// Send one outbound frame
    async fn send(&self, frame: &TrackerRequest) -> ClientResult<()>;
    /// Wait for the next inbound text frame; `Err` means the connection
    /// is gone
    async fn next_text(&self) -> ClientResult<String>;
}

/// Dials the order socket
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self) -> ClientResult<Box<dyn SocketTransport>>;
}

// ==================== WebSocket (production) ====================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the order tracking WebSocket endpoint
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self) -> ClientResult<Box<dyn SocketTransport>> {
        let (ws, _response) = connect_async(&self.url).await?;
        let (sink, stream) = ws.split();
        Ok(Box::new(WsTransport {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }))
    }
}

/// WebSocket transport, split so reads never block writes
pub struct WsTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

#[async_trait]
impl SocketTransport for WsTransport {
    async fn send(&self, frame: &TrackerRequest) -> ClientResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.to_json())).await?;
        Ok(())
    }

    async fn next_text(&self) -> ClientResult<String> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                None => return Err(ClientError::Closed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Close(_))) => return Err(ClientError::Closed),
                // Ping/pong are handled at the protocol layer; binary
                // frames are not part of this wire contract.
                Some(Ok(_)) => continue,
            }
        }
    }
}

// ==================== Channel (in-memory) ====================

enum ScriptedDial {
    Refuse,
    Open {
        inbound: mpsc::UnboundedReceiver<String>,
        sent: Arc<StdMutex<Vec<TrackerRequest>>>,
    },
}

/// In-memory connector for tests
///
/// Mirrors [`crate::stream::ChannelConnector`]: dial outcomes are
/// scripted, sessions are fed and inspected through a
/// [`SocketHandle`].
#[derive(Default)]
pub struct ChannelSocketConnector {
    script: StdMutex<VecDeque<ScriptedDial>>,
    dials: StdMutex<Vec<tokio::time::Instant>>,
}

impl ChannelSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next dial to fail
    pub fn refuse_next(&self) {
        self.script.lock().unwrap().push_back(ScriptedDial::Refuse);
    }

    /// Script the next dial to succeed
    pub fn expect_session(&self) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        self.script.lock().unwrap().push_back(ScriptedDial::Open {
            inbound: rx,
            sent: Arc::clone(&sent),
        });
        SocketHandle {
            tx: StdMutex::new(Some(tx)),
            sent,
        }
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    pub fn dial_instants(&self) -> Vec<tokio::time::Instant> {
        self.dials.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocketConnector for ChannelSocketConnector {
    async fn connect(&self) -> ClientResult<Box<dyn SocketTransport>> {
        self.dials.lock().unwrap().push(tokio::time::Instant::now());

        match self.script.lock().unwrap().pop_front() {
            Some(ScriptedDial::Open { inbound, sent }) => Ok(Box::new(ChannelSocket {
                rx: Mutex::new(inbound),
                sent,
            })),
            Some(ScriptedDial::Refuse) | None => Err(ClientError::Connection(
                "connection refused (scripted)".to_string(),
            )),
        }
    }
}

/// Feeds and inspects one scripted socket session
pub struct SocketHandle {
    tx: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    sent: Arc<StdMutex<Vec<TrackerRequest>>>,
}

impl SocketHandle {
    /// Deliver an inbound event to the client
    pub fn send_event(&self, event: &TrackerEvent) {
        self.send_raw(&serde_json::to_string(event).expect("tracker event serialization"));
    }

    /// Deliver an arbitrary inbound text frame
    pub fn send_raw(&self, text: &str) {
        if let Some(tx) = &*self.tx.lock().unwrap() {
            let _ = tx.send(text.to_string());
        }
    }

    /// Everything the client sent on this session, in order
    pub fn sent(&self) -> Vec<TrackerRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// Drop the server end; the client sees the connection close
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }
}

struct ChannelSocket {
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    sent: Arc<StdMutex<Vec<TrackerRequest>>>,
}

#[async_trait]
impl SocketTransport for ChannelSocket {
    async fn send(&self, frame: &TrackerRequest) -> ClientResult<()> {
        self.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn next_text(&self) -> ClientResult<String> {
        self.rx.lock().await.recv().await.ok_or(ClientError::Closed)
    }
}
