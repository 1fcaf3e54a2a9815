use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bpfq_core::submission::{ConnectionState, QueryConnection, TransportError};
use bpfq_core::transport::{EventSource, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Connection state shared between the socket task and the engine side.
#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(encode_state(state))))
    }

    fn load(&self) -> ConnectionState {
        decode_state(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: ConnectionState) {
        self.0.store(encode_state(state), Ordering::Release);
    }
}

fn encode_state(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Connecting => 0,
        ConnectionState::Open => 1,
        ConnectionState::Closed => 2,
        ConnectionState::Failed => 3,
    }
}

fn decode_state(raw: u8) -> ConnectionState {
    match raw {
        0 => ConnectionState::Connecting,
        1 => ConnectionState::Open,
        2 => ConnectionState::Closed,
        _ => ConnectionState::Failed,
    }
}

/// Outbound half of a websocket: hands query text to the socket task.
#[derive(Debug)]
pub struct WsConnection {
    url: String,
    state: SharedState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: JoinHandle<()>,
}

impl WsConnection {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Asks the socket task to send a close frame. The event source still
    /// yields its single `Closed` event once the socket has shut down.
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!(url = %self.url, "closing websocket");
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl QueryConnection for WsConnection {
    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let state = self.state.load();
        if !state.is_open() {
            return Err(TransportError::new(format!(
                "websocket is not open ({state:?})"
            )));
        }
        let Some(outbound) = &self.outbound else {
            return Err(TransportError::new("websocket is closing"));
        };
        outbound
            .send(text.to_string())
            .map_err(|_| TransportError::new("websocket task has stopped"))
    }
}

/// Inbound half of a websocket.
#[derive(Debug)]
pub struct WsEventSource {
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    fn try_next_event(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }
}

/// Starts connecting to `url` in the background and returns both halves
/// immediately. The event source yields `Opened` once the handshake
/// completes and exactly one `Closed` when the socket ends or fails.
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn connect(url: impl Into<String>) -> (WsConnection, WsEventSource) {
    let url = url.into();
    let state = SharedState::new(ConnectionState::Connecting);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(run_socket(
        url.clone(),
        state.clone(),
        outbound_rx,
        events_tx,
    ));

    (
        WsConnection {
            url,
            state,
            outbound: Some(outbound_tx),
            task,
        },
        WsEventSource { events: events_rx },
    )
}

async fn run_socket(
    url: String,
    state: SharedState,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(error) => {
            warn!(%url, %error, "websocket connect failed");
            state.store(ConnectionState::Failed);
            let _ = events.send(TransportEvent::Closed {
                reason: Some(error.to_string()),
            });
            return;
        }
    };

    info!(%url, "websocket connected");
    state.store(ConnectionState::Open);
    if events.send(TransportEvent::Opened).is_err() {
        return;
    }

    let (mut write, mut read) = stream.split();
    let reason = loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    debug!(bytes = text.len(), "sending query");
                    if let Err(error) = write.send(Message::text(text)).await {
                        break Some(error.to_string());
                    }
                }
                None => {
                    let _ = write.close().await;
                    break None;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Message(text.to_string())).is_err() {
                        break None;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => break Some(error.to_string()),
                None => break None,
            },
        }
    };

    info!(%url, reason = reason.as_deref().unwrap_or(""), "websocket closed");
    state.store(ConnectionState::Closed);
    let _ = events.send(TransportEvent::Closed { reason });
}
