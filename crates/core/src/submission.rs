use thiserror::Error;
use tracing::{debug, info};

use crate::events::QueryRequest;
use crate::live_view::QueryEditor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outbound half of the connection to the query backend. Sends are
/// fire-and-forget.
pub trait QueryConnection {
    fn state(&self) -> ConnectionState;
    fn send(&mut self, text: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    NotOpen(ConnectionState),
    SendFailed(TransportError),
    /// This connection already received its open-time submission.
    AlreadySubmitted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent { submission: u64 },
    Abandoned(AbandonReason),
}

impl SubmitOutcome {
    #[must_use]
    pub fn was_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionStatus {
    pub submissions: u64,
    pub awaiting_schema: bool,
    pub last_sent: Option<String>,
}

#[derive(Debug, Default)]
pub struct SubmissionController {
    submissions: u64,
    awaiting_schema: bool,
    submitted_since_open: bool,
    last_sent: Option<String>,
}

impl SubmissionController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> SubmissionStatus {
        SubmissionStatus {
            submissions: self.submissions,
            awaiting_schema: self.awaiting_schema,
            last_sent: self.last_sent.clone(),
        }
    }

    /// Sends the editor's current text. A closed or not-yet-open connection
    /// abandons the attempt; the next edit or the next open retries.
    pub fn submit<E, C>(&mut self, editor: &E, connection: &mut C) -> SubmitOutcome
    where
        E: QueryEditor + ?Sized,
        C: QueryConnection + ?Sized,
    {
        let state = connection.state();
        if !state.is_open() {
            debug!(?state, "submission abandoned: connection not open");
            return SubmitOutcome::Abandoned(AbandonReason::NotOpen(state));
        }

        let request = QueryRequest::new(editor.value());
        if let Err(error) = connection.send(request.wire_text()) {
            debug!(%error, "submission abandoned: send failed");
            return SubmitOutcome::Abandoned(AbandonReason::SendFailed(error));
        }

        self.submissions += 1;
        self.awaiting_schema = true;
        self.last_sent = Some(request.wire_text().to_string());
        debug!(submission = self.submissions, "query submitted");
        SubmitOutcome::Sent {
            submission: self.submissions,
        }
    }

    /// Submits once per connection open.
    pub fn on_connection_open<E, C>(&mut self, editor: &E, connection: &mut C) -> SubmitOutcome
    where
        E: QueryEditor + ?Sized,
        C: QueryConnection + ?Sized,
    {
        if self.submitted_since_open {
            return SubmitOutcome::Abandoned(AbandonReason::AlreadySubmitted);
        }
        info!("connection open, submitting current query");
        let outcome = self.submit(editor, connection);
        self.submitted_since_open = outcome.was_sent();
        outcome
    }

    pub fn on_connection_closed(&mut self) {
        self.submitted_since_open = false;
        self.awaiting_schema = false;
    }

    pub fn on_schema_received(&mut self) {
        self.awaiting_schema = false;
    }

    /// Rows are only accepted once the newest submission's schema arrived;
    /// anything earlier belongs to a superseded query.
    #[must_use]
    pub fn accepts_rows(&self) -> bool {
        !self.awaiting_schema
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{ConnectionState, QueryConnection, TransportError};

    #[derive(Debug)]
    pub struct FakeConnection {
        pub state: ConnectionState,
        pub sent: Vec<String>,
        pub fail_sends: bool,
    }

    impl FakeConnection {
        pub fn open() -> Self {
            Self::with_state(ConnectionState::Open)
        }

        pub fn with_state(state: ConnectionState) -> Self {
            Self {
                state,
                sent: Vec::new(),
                fail_sends: false,
            }
        }
    }

    impl QueryConnection for FakeConnection {
        fn state(&self) -> ConnectionState {
            self.state
        }

        fn send(&mut self, text: &str) -> Result<(), TransportError> {
            if self.fail_sends {
                return Err(TransportError::new("socket closed mid-send"));
            }
            self.sent.push(text.to_string());
            Ok(())
        }
    }
}
