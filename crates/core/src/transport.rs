use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::submission::{ConnectionState, QueryConnection, TransportError};

/// What the connection reports to the single-threaded engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { reason: Option<String> },
}

/// Inbound half of the connection.
#[async_trait]
pub trait EventSource: Send {
    /// Waits for the next event; `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Non-blocking variant for loops that poll between UI input.
    fn try_next_event(&mut self) -> Option<TransportEvent>;
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read replay file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Canned event stream: an open, one message per non-blank line, a close.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    events: VecDeque<TransportEvent>,
}

impl ReplaySource {
    #[must_use]
    pub fn from_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events = VecDeque::new();
        events.push_back(TransportEvent::Opened);
        events.extend(messages.into_iter().map(|message| TransportEvent::Message(message.into())));
        events.push_back(TransportEvent::Closed {
            reason: Some("replay finished".to_string()),
        });
        Self { events }
    }

    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let raw = fs::read_to_string(path).map_err(|source| ReplayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_messages(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        ))
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    fn try_next_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}

/// Outbound side paired with [`ReplaySource`]: always open, records sends.
#[derive(Debug, Clone)]
pub struct ReplayConnection {
    state: ConnectionState,
    sent: Vec<String>,
}

impl Default for ReplayConnection {
    fn default() -> Self {
        Self {
            state: ConnectionState::Open,
            sent: Vec::new(),
        }
    }
}

impl ReplayConnection {
    #[must_use]
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

impl QueryConnection for ReplayConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.state.is_open() {
            return Err(TransportError::new("replay connection is closed"));
        }
        self.sent.push(text.to_string());
        Ok(())
    }
}
