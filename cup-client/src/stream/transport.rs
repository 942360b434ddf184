//! Stream transport abstraction
//!
//! The notification stream is server-push only. A transport yields raw
//! `(event, data)` pairs; the client decodes and routes them. Two
//! implementations: [`SseConnector`] dials the real `text/event-stream`
//! endpoint, [`ChannelConnector`] is an in-memory double for tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};

use crate::config::RealtimeConfig;
use crate::error::{ClientError, ClientResult};

/// One raw event off the stream, before frame decoding
///
/// `event` is the SSE event name; empty for the default channel.
#[derive(Debug, Clone)]
pub struct RawStreamEvent {
    pub event: String,
    pub data: String,
}

/// An open server-push connection
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Wait for the next event; `Err` means the connection is gone
    async fn next_event(&self) -> ClientResult<RawStreamEvent>;
}

/// Dials the push stream
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, token: &str) -> ClientResult<Box<dyn StreamTransport>>;
}

// ==================== SSE (production) ====================

/// Connects to the `text/event-stream` notification endpoint
pub struct SseConnector {
    http: reqwest::Client,
    config: RealtimeConfig,
}

impl SseConnector {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl StreamConnector for SseConnector {
    async fn connect(&self, token: &str) -> ClientResult<Box<dyn StreamTransport>> {
        let url = self.config.stream_url(token)?;

        let response = self
            .http
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Connection(format!("Stream HTTP {}", status)));
        }

        let bytes = response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()));
        Ok(Box::new(SseTransport {
            inner: Mutex::new(SseInner {
                bytes: Box::pin(bytes),
                buf: Vec::new(),
                event_name: String::new(),
                data_buf: String::new(),
            }),
        }))
    }
}

struct SseInner {
    bytes: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>,
    /// Raw bytes; chunk boundaries may fall inside a multi-byte character
    buf: Vec<u8>,
    event_name: String,
    data_buf: String,
}

impl SseInner {
    /// Consume buffered lines until a complete event is assembled
    ///
    /// Lines are split at the byte level and decoded only once complete,
    /// so a character straddling two chunks is reassembled first.
    fn drain_event(&mut self) -> Option<RawStreamEvent> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                // Blank line dispatches the accumulated event.
                if !self.data_buf.is_empty() {
                    let event = RawStreamEvent {
                        event: std::mem::take(&mut self.event_name),
                        data: std::mem::take(&mut self.data_buf),
                    };
                    return Some(event);
                }
                self.event_name.clear();
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event_name = strip_field_space(rest).to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !self.data_buf.is_empty() {
                    self.data_buf.push('\n');
                }
                self.data_buf.push_str(strip_field_space(rest));
            }
            // ':' comment lines and id:/retry: fields are ignored.
        }
        None
    }
}

/// A field value is verbatim apart from one optional space after the colon
fn strip_field_space(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}

/// SSE transport: reqwest byte stream + incremental line parser
pub struct SseTransport {
    inner: Mutex<SseInner>,
}

#[async_trait]
impl StreamTransport for SseTransport {
    async fn next_event(&self) -> ClientResult<RawStreamEvent> {
        let mut inner = self.inner.lock().await;
        loop {
            if let Some(event) = inner.drain_event() {
                return Ok(event);
            }
            match inner.bytes.next().await {
                Some(Ok(chunk)) => {
                    inner.buf.extend_from_slice(&chunk);
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ClientError::Closed),
            }
        }
    }
}

// ==================== Channel (in-memory) ====================

enum ScriptedDial {
    Refuse,
    Open(mpsc::UnboundedReceiver<RawStreamEvent>),
}

/// In-memory connector for tests
///
/// Dial outcomes are scripted up front: [`ChannelConnector::refuse_next`]
/// makes the next dial fail, [`ChannelConnector::expect_session`] makes
/// it succeed and hands back a [`StreamHandle`] feeding that session.
/// An unscripted dial is refused. Every dial is recorded with its
/// (tokio) timestamp, so backoff schedules can be asserted under paused
/// time.
#[derive(Default)]
pub struct ChannelConnector {
    script: StdMutex<VecDeque<ScriptedDial>>,
    dials: StdMutex<Vec<tokio::time::Instant>>,
    tokens: StdMutex<Vec<String>>,
}

impl ChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next dial to fail
    pub fn refuse_next(&self) {
        self.script.lock().unwrap().push_back(ScriptedDial::Refuse);
    }

    /// Script the next dial to succeed; feed the session via the handle
    pub fn expect_session(&self) -> StreamHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedDial::Open(rx));
        StreamHandle {
            tx: StdMutex::new(Some(tx)),
        }
    }

    /// How many times the client dialed
    pub fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    /// When each dial happened
    pub fn dial_instants(&self) -> Vec<tokio::time::Instant> {
        self.dials.lock().unwrap().clone()
    }

    /// Tokens presented at each dial, in order
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamConnector for ChannelConnector {
    async fn connect(&self, token: &str) -> ClientResult<Box<dyn StreamTransport>> {
        self.dials.lock().unwrap().push(tokio::time::Instant::now());
        self.tokens.lock().unwrap().push(token.to_string());

        match self.script.lock().unwrap().pop_front() {
            Some(ScriptedDial::Open(rx)) => Ok(Box::new(ChannelTransport {
                rx: Mutex::new(rx),
            })),
            Some(ScriptedDial::Refuse) | None => Err(ClientError::Connection(
                "connection refused (scripted)".to_string(),
            )),
        }
    }
}

/// Feeds one scripted session
pub struct StreamHandle {
    tx: StdMutex<Option<mpsc::UnboundedSender<RawStreamEvent>>>,
}

impl StreamHandle {
    /// Deliver a raw event to the client
    pub fn send(&self, event: &str, data: &str) {
        if let Some(tx) = &*self.tx.lock().unwrap() {
            let _ = tx.send(RawStreamEvent {
                event: event.to_string(),
                data: data.to_string(),
            });
        }
    }

    /// Deliver a default-channel JSON frame
    pub fn send_json(&self, data: serde_json::Value) {
        self.send("", &data.to_string());
    }

    /// Drop the server end; the client sees the connection close
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }
}

struct ChannelTransport {
    rx: Mutex<mpsc::UnboundedReceiver<RawStreamEvent>>,
}

#[async_trait]
impl StreamTransport for ChannelTransport {
    async fn next_event(&self) -> ClientResult<RawStreamEvent> {
        self.rx.lock().await.recv().await.ok_or(ClientError::Closed)
    }
}
