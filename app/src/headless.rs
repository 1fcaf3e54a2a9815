use std::future::Future;
use std::io::{self, Write};
use std::path::Path;

use bpfq_adapters::export::{
    export_records_to_csv, export_records_to_json, scalar_text, ExportError,
};
use bpfq_adapters::ticker::RenderTicker;
use bpfq_adapters::websocket;
use bpfq_core::engine::{EngineInput, SyncEngine};
use bpfq_core::live_view::{DatasetOptions, GridError, QueryEditor, ResultGrid, VisualConfig};
use bpfq_core::presets::DeepLink;
use bpfq_core::row_buffer::Record;
use bpfq_core::submission::QueryConnection;
use bpfq_core::transport::{
    EventSource, ReplayConnection, ReplayError, ReplaySource, TransportEvent,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{build_engine, Settings};

#[derive(Debug, Error)]
pub enum HeadlessError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeadlessSummary {
    pub snapshots: u64,
    pub rows: usize,
    pub exported: Option<usize>,
}

/// Query text is fixed for the whole run; only presets change it.
#[derive(Debug, Default)]
pub struct FixedEditor {
    text: String,
}

impl QueryEditor for FixedEditor {
    fn value(&self) -> String {
        self.text.clone()
    }

    fn set_value(&mut self, text: &str) {
        self.text = text.to_string();
    }

    fn has_focus(&self) -> bool {
        false
    }

    fn focus(&mut self) {}
}

/// Keeps the latest dataset and counts how often it changed.
#[derive(Debug, Default)]
pub struct SnapshotGrid {
    rows: Vec<Record>,
    version: u64,
}

impl SnapshotGrid {
    fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for record in &self.rows {
            for key in record.fields().keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }
}

impl ResultGrid for SnapshotGrid {
    type Dataset = Vec<Record>;

    fn construct_dataset(
        &mut self,
        rows: &[Record],
        _options: &DatasetOptions,
    ) -> Result<Self::Dataset, GridError> {
        Ok(rows.to_vec())
    }

    fn load(&mut self, dataset: Self::Dataset) -> Result<(), GridError> {
        self.rows = dataset;
        self.version += 1;
        Ok(())
    }

    fn replace(&mut self, rows: &[Record]) -> Result<(), GridError> {
        self.rows = rows.to_vec();
        self.version += 1;
        Ok(())
    }

    fn restore(&mut self, _config: &VisualConfig) -> Result<(), GridError> {
        Ok(())
    }
}

type HeadlessEngine<C> = SyncEngine<FixedEditor, SnapshotGrid, C, DeepLink>;

pub(crate) async fn run(
    settings: &Settings,
    replay: Option<&Path>,
    export: Option<&Path>,
) -> Result<HeadlessSummary, HeadlessError> {
    let editor = FixedEditor {
        text: settings.query.clone(),
    };
    let grid = SnapshotGrid::default();
    let mut stdout = io::stdout();
    let shutdown = interrupted(tokio::signal::ctrl_c());

    match replay {
        Some(path) => {
            let source = ReplaySource::load(path)?;
            let engine = build_engine(editor, grid, ReplayConnection::default(), settings);
            drive(engine, source, shutdown, export, &mut stdout).await
        }
        None => {
            let (connection, source) = websocket::connect(settings.server_url.clone());
            let engine = build_engine(editor, grid, connection, settings);
            drive(engine, source, shutdown, export, &mut stdout).await
        }
    }
}

/// Resolves once `signal` fires. A failed registration never resolves, so
/// the run still ends when the connection closes.
async fn interrupted<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("interrupted"),
        Err(error) => {
            warn!(%error, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}

/// Pumps transport events and render ticks until the connection closes or
/// `shutdown` resolves, printing every changed dataset to `out`.
async fn drive<C, S, F, W>(
    mut engine: HeadlessEngine<C>,
    mut source: S,
    shutdown: F,
    export: Option<&Path>,
    out: &mut W,
) -> Result<HeadlessSummary, HeadlessError>
where
    C: QueryConnection,
    S: EventSource,
    F: Future<Output = ()>,
    W: Write,
{
    let mut ticker = RenderTicker::new(engine.render_period(), engine.render_cancellation());
    let mut summary = HeadlessSummary::default();
    let mut printed_version = 0;
    let mut reported_error = None;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = source.next_event() => {
                let Some(event) = event else { break };
                let closed = matches!(event, TransportEvent::Closed { .. });
                engine.handle(EngineInput::from(event));
                report_error(&engine, &mut reported_error, out)?;
                if closed {
                    break;
                }
            }
            ticked = ticker.next_tick() => {
                if !ticked {
                    break;
                }
                engine.handle(EngineInput::RenderTick);
                print_if_changed(&engine, &mut printed_version, &mut summary, out)?;
            }
            () = &mut shutdown => break,
        }
    }

    engine.handle(EngineInput::RenderTick);
    print_if_changed(&engine, &mut printed_version, &mut summary, out)?;

    summary.rows = engine.buffer().len();
    if let Some(path) = export {
        summary.exported = Some(export_dataset(&engine, path)?);
    }
    engine.handle(EngineInput::Teardown);
    Ok(summary)
}

/// Backend errors go to the output once each, as they arrive.
fn report_error<C, W>(
    engine: &HeadlessEngine<C>,
    reported: &mut Option<String>,
    out: &mut W,
) -> io::Result<()>
where
    C: QueryConnection,
    W: Write,
{
    let status = engine.status();
    if !status.is_error() || reported.as_deref() == Some(status.text()) {
        return Ok(());
    }
    *reported = Some(status.text().to_string());
    writeln!(out, "error: {}", status.text())
}

fn print_if_changed<C, W>(
    engine: &HeadlessEngine<C>,
    printed_version: &mut u64,
    summary: &mut HeadlessSummary,
    out: &mut W,
) -> io::Result<()>
where
    C: QueryConnection,
    W: Write,
{
    let grid = engine.grid();
    if grid.version == *printed_version {
        return Ok(());
    }
    *printed_version = grid.version;
    summary.snapshots += 1;

    let columns = grid.columns();
    writeln!(
        out,
        "-- {} | {} rows --",
        engine.schema().epoch(),
        grid.rows.len()
    )?;
    writeln!(out, "{}", columns.join(" | "))?;
    for record in &grid.rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| record.get(column).map(scalar_text).unwrap_or_default())
            .collect();
        writeln!(out, "{}", cells.join(" | "))?;
    }
    out.flush()
}

fn export_dataset<C: QueryConnection>(
    engine: &HeadlessEngine<C>,
    path: &Path,
) -> Result<usize, ExportError> {
    let records = engine.buffer().snapshot();
    let headers = engine
        .schema()
        .current_headers()
        .map_or_else(|| engine.grid().columns(), <[String]>::to_vec);

    let is_json = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    if is_json {
        export_records_to_json(path, &headers, &records)
    } else {
        export_records_to_csv(path, &headers, &records)
    }
}
