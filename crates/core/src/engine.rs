use std::time::Duration;

use tracing::{debug, info, warn};

use crate::events::{decode_event, Scalar, ServerEvent};
use crate::live_view::{DatasetChange, LiveViewController, QueryEditor, ResultGrid, ViewError};
use crate::presets::{LinkState, PresetCatalog, PresetController};
use crate::render_scheduler::{
    CancellationToken, RenderScheduler, TickOutcome, DEFAULT_RENDER_PERIOD,
};
use crate::row_buffer::RowBuffer;
use crate::schema_tracker::SchemaTracker;
use crate::status::StatusLine;
use crate::submission::{QueryConnection, SubmissionController, SubmissionStatus, SubmitOutcome};
use crate::transport::TransportEvent;

/// Everything the engine reacts to, from all three event sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineInput {
    ConnectionOpened,
    ConnectionClosed { reason: Option<String> },
    Message(String),
    RenderTick,
    EditorChanged,
    PresetSelected(String),
    Teardown,
}

impl From<TransportEvent> for EngineInput {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::Opened => Self::ConnectionOpened,
            TransportEvent::Message(text) => Self::Message(text),
            TransportEvent::Closed { reason } => Self::ConnectionClosed { reason },
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub render_period: Duration,
    pub max_buffered_rows: Option<usize>,
    pub presets: PresetCatalog,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            render_period: DEFAULT_RENDER_PERIOD,
            max_buffered_rows: None,
            presets: PresetCatalog::builtin(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineCounters {
    pub messages: u64,
    pub decode_errors: u64,
    pub unknown_events: u64,
    pub backend_errors: u64,
    pub orphan_rows_dropped: u64,
    pub stale_rows_dropped: u64,
}

/// Owns every piece of synchronization state and dispatches inputs to it.
pub struct SyncEngine<E, G, C, L>
where
    E: QueryEditor,
    G: ResultGrid,
    C: QueryConnection,
    L: LinkState,
{
    editor: E,
    connection: C,
    link: L,
    schema: SchemaTracker,
    buffer: RowBuffer,
    scheduler: RenderScheduler,
    view: LiveViewController<G>,
    submission: SubmissionController,
    presets: PresetController,
    status: StatusLine,
    counters: EngineCounters,
    torn_down: bool,
}

impl<E, G, C, L> SyncEngine<E, G, C, L>
where
    E: QueryEditor,
    G: ResultGrid,
    C: QueryConnection,
    L: LinkState,
{
    #[must_use]
    pub fn new(editor: E, grid: G, connection: C, link: L, options: EngineOptions) -> Self {
        let buffer = match options.max_buffered_rows {
            Some(capacity) if capacity > 0 => RowBuffer::bounded(capacity),
            _ => RowBuffer::unbounded(),
        };
        Self {
            editor,
            connection,
            link,
            schema: SchemaTracker::new(),
            buffer,
            scheduler: RenderScheduler::new(options.render_period),
            view: LiveViewController::new(grid),
            submission: SubmissionController::new(),
            presets: PresetController::new(options.presets),
            status: StatusLine::default(),
            counters: EngineCounters::default(),
            torn_down: false,
        }
    }

    pub fn handle(&mut self, input: EngineInput) {
        if self.torn_down {
            debug!(?input, "input ignored after teardown");
            return;
        }

        match input {
            EngineInput::ConnectionOpened => self.on_connection_opened(),
            EngineInput::ConnectionClosed { reason } => self.on_connection_closed(reason),
            EngineInput::Message(text) => self.on_message(&text),
            EngineInput::RenderTick => self.on_render_tick(),
            EngineInput::EditorChanged => self.on_editor_changed(),
            EngineInput::PresetSelected(name) => self.on_preset_selected(&name),
            EngineInput::Teardown => self.teardown(),
        }
    }

    /// Applies the preset named by the link state, if it names a known one.
    pub fn apply_link_preset(&mut self) -> Option<String> {
        let name = self.presets.preset_from_link(&self.link)?;
        self.on_preset_selected(&name);
        Some(name)
    }

    #[must_use]
    pub fn render_period(&self) -> Duration {
        self.scheduler.period()
    }

    /// Token cancelled on teardown; async tick drivers watch it.
    #[must_use]
    pub fn render_cancellation(&self) -> CancellationToken {
        self.scheduler.cancellation().clone()
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    #[must_use]
    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    #[must_use]
    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    #[must_use]
    pub fn link(&self) -> &L {
        &self.link
    }

    #[must_use]
    pub fn view(&self) -> &LiveViewController<G> {
        &self.view
    }

    #[must_use]
    pub fn grid(&self) -> &G {
        self.view.grid()
    }

    pub fn grid_mut(&mut self) -> &mut G {
        self.view.grid_mut()
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaTracker {
        &self.schema
    }

    #[must_use]
    pub fn buffer(&self) -> &RowBuffer {
        &self.buffer
    }

    #[must_use]
    pub fn presets(&self) -> &PresetController {
        &self.presets
    }

    #[must_use]
    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    #[must_use]
    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    #[must_use]
    pub fn submission_status(&self) -> SubmissionStatus {
        self.submission.status()
    }

    fn on_connection_opened(&mut self) {
        self.schema.clear();
        self.buffer.reset(self.schema.epoch());
        self.initialize_view();
        self.status.normal("Connected");
        self.submission
            .on_connection_open(&self.editor, &mut self.connection);
    }

    fn on_connection_closed(&mut self, reason: Option<String>) {
        self.submission.on_connection_closed();
        let text = match reason {
            Some(reason) => format!("Disconnected: {reason}"),
            None => "Disconnected".to_string(),
        };
        info!(status = %text, "connection closed");
        self.status.warning(text);
    }

    fn on_message(&mut self, text: &str) {
        self.counters.messages += 1;
        self.initialize_view();

        match decode_event(text) {
            Ok(event) => self.apply_event(event),
            Err(error) => {
                self.counters.decode_errors += 1;
                warn!(%error, "undecodable message");
                self.status.warning(format!("Undecodable message: {error}"));
            }
        }
    }

    fn apply_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SchemaAndSummary {
                output_text,
                headers,
            } => {
                let epoch = self.schema.on_schema(headers, output_text.as_str());
                self.buffer.reset(epoch);
                self.submission.on_schema_received();
                self.status.normal(output_text);
                if let Err(error) = self.view.reset_to_placeholder(&mut self.editor) {
                    self.report_view_error(&error);
                }
            }
            ServerEvent::Error { message } => {
                self.counters.backend_errors += 1;
                info!(%message, "backend reported an error");
                self.status.error(message);
            }
            ServerEvent::ResultRows { rows } => self.buffer_rows(rows),
            ServerEvent::Unknown { msg_type } => {
                self.counters.unknown_events += 1;
                warn!(%msg_type, "unknown message type");
                self.status
                    .warning(format!("Unknown message type: {msg_type}"));
            }
        }
    }

    fn buffer_rows(&mut self, rows: Vec<Vec<Scalar>>) {
        if rows.is_empty() {
            return;
        }

        if !self.submission.accepts_rows() {
            self.counters.stale_rows_dropped += rows.len() as u64;
            debug!(rows = rows.len(), "rows dropped: awaiting schema of newer query");
            return;
        }

        for row in rows {
            if !self.buffer.on_row(self.schema.layout(), row) {
                self.counters.orphan_rows_dropped += 1;
            }
        }
    }

    fn on_render_tick(&mut self) {
        let TickOutcome::Flush(rows) = self.scheduler.tick(&self.buffer) else {
            return;
        };

        match self.view.replace_dataset(&rows, &mut self.editor) {
            Ok(DatasetChange::Skipped) => {}
            Ok(_) => self.apply_pending_preset_visual(),
            Err(error) => self.report_view_error(&error),
        }
    }

    fn apply_pending_preset_visual(&mut self) {
        if !self.submission.accepts_rows() {
            return;
        }
        let Some(visual) = self.presets.take_pending_visual() else {
            return;
        };
        if let Err(error) = self.view.apply_preset_visual(&visual, &mut self.editor) {
            self.report_view_error(&error);
        }
    }

    fn on_editor_changed(&mut self) {
        let outcome = self.submission.submit(&self.editor, &mut self.connection);
        if let SubmitOutcome::Abandoned(reason) = outcome {
            debug!(?reason, "edit not submitted");
        }
    }

    fn on_preset_selected(&mut self, name: &str) {
        let applied = self
            .presets
            .apply_preset(name, &mut self.editor, &mut self.link)
            .map(|_| ());
        match applied {
            Ok(()) => {
                self.status.normal(format!("Preset `{name}` applied"));
                self.on_editor_changed();
            }
            Err(error) => {
                warn!(%error, "preset not applied");
                self.status.error(error.to_string());
            }
        }
    }

    fn teardown(&mut self) {
        self.scheduler.stop();
        self.submission.on_connection_closed();
        self.schema.clear();
        self.buffer.reset(self.schema.epoch());
        self.torn_down = true;
        info!("sync engine torn down");
    }

    fn initialize_view(&mut self) {
        if let Err(error) = self.view.ensure_initialized(&mut self.editor) {
            self.report_view_error(&error);
        }
    }

    fn report_view_error(&mut self, error: &ViewError) {
        warn!(%error, "results view operation failed");
        self.status.warning(error.to_string());
    }
}
