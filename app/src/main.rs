mod headless;

use std::error::Error;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use bpfq_adapters::websocket;
use bpfq_core::config::{self, ClientConfig};
use bpfq_core::engine::{EngineOptions, SyncEngine};
use bpfq_core::live_view::{QueryEditor, ResultGrid};
use bpfq_core::presets::{DeepLink, LinkState, PresetCatalog};
use bpfq_core::submission::QueryConnection;
use bpfq_core::transport::{ReplayConnection, ReplaySource};
use bpfq_tui::editor::TextEditor;
use bpfq_tui::grid::TableGrid;
use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "BPFQ_LOG";

/// Live bpftrace query client.
#[derive(Parser, Debug, Default)]
#[command(version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the query server.
    #[arg(long, value_name = "URL")]
    server: Option<String>,
    /// Preset to apply at start-up.
    #[arg(long, value_name = "NAME")]
    preset: Option<String>,
    /// Shared link carrying `?preset=<name>`.
    #[arg(long, value_name = "URL")]
    link: Option<String>,
    /// Initial query text instead of the configured default.
    #[arg(long, value_name = "TEXT")]
    query: Option<String>,
    /// Print result snapshots to stdout instead of opening the terminal UI.
    #[arg(long)]
    headless: bool,
    /// Newline-delimited wire events to play back instead of connecting.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
    /// Write the final dataset to this path (`.json` or CSV) in headless mode.
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "MS")]
    render_period_ms: Option<u64>,
}

#[derive(Debug, Clone)]
struct Settings {
    server_url: String,
    render_period: Duration,
    max_buffered_rows: Option<usize>,
    presets: PresetCatalog,
    link: DeepLink,
    query: String,
}

impl Settings {
    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            render_period: self.render_period,
            max_buffered_rows: self.max_buffered_rows,
            presets: self.presets.clone(),
        }
    }
}

fn resolve_settings(args: &Args) -> Result<Settings, Box<dyn Error>> {
    let mut client_config = match &args.config {
        Some(path) => config::load_from_path(path)?,
        None => config::load_default()?,
    };
    if let Some(server) = &args.server {
        client_config.server_url.clone_from(server);
    }
    if let Some(period) = args.render_period_ms {
        client_config.render_period_ms = period;
    }

    let presets_path = presets_path(&client_config, args.config.as_deref())?;
    let presets = PresetCatalog::load_with_overrides(&presets_path)?;

    let mut link = match &args.link {
        Some(raw) => DeepLink::parse(raw)?,
        None => DeepLink::default(),
    };
    if let Some(name) = &args.preset {
        link.set_preset_param(name);
    }

    Ok(Settings {
        server_url: client_config.server_url.clone(),
        render_period: client_config.render_period(),
        max_buffered_rows: client_config.max_buffered_rows,
        presets,
        link,
        query: args
            .query
            .clone()
            .unwrap_or_else(|| client_config.default_query.clone()),
    })
}

/// An explicit `--config` file keeps its presets beside it.
fn presets_path(
    client_config: &ClientConfig,
    config_path: Option<&Path>,
) -> Result<PathBuf, config::ConfigError> {
    match (&client_config.presets_path, config_path) {
        (Some(path), _) => Ok(path.clone()),
        (None, Some(config_path)) => Ok(config_path.with_file_name("presets.toml")),
        (None, None) => client_config.resolved_presets_path(),
    }
}

fn build_engine<E, G, C>(
    editor: E,
    grid: G,
    connection: C,
    settings: &Settings,
) -> SyncEngine<E, G, C, DeepLink>
where
    E: QueryEditor,
    G: ResultGrid,
    C: QueryConnection,
{
    let mut engine = SyncEngine::new(
        editor,
        grid,
        connection,
        settings.link.clone(),
        settings.engine_options(),
    );
    if let Some(name) = engine.apply_link_preset() {
        info!(preset = %name, "preset from link applied");
    }
    engine
}

/// The terminal belongs to the UI, so interactive runs log to a file.
fn init_logging(headless: bool) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    if headless {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return Ok(());
    }

    let log_path = config::default_log_path()?;
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Ok(())
}

fn run_tui(settings: &Settings, replay: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let editor = TextEditor::new(&settings.query);
    match replay {
        Some(path) => {
            let source = ReplaySource::load(path)?;
            let engine = build_engine(editor, TableGrid::new(), ReplayConnection::default(), settings);
            bpfq_tui::run(engine, source, &format!("replay: {}", path.display()))?;
        }
        None => {
            let (connection, source) = websocket::connect(settings.server_url.clone());
            let engine = build_engine(editor, TableGrid::new(), connection, settings);
            bpfq_tui::run(engine, source, &settings.server_url)?;
        }
    }
    Ok(())
}

fn run_app(
    args: &Args,
    run_tui: impl FnOnce(&Settings, Option<&Path>) -> Result<(), Box<dyn Error>>,
) -> Result<(), Box<dyn Error>> {
    let settings = resolve_settings(args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if args.headless {
        let summary = runtime.block_on(headless::run(
            &settings,
            args.replay.as_deref(),
            args.export.as_deref(),
        ))?;
        info!(
            snapshots = summary.snapshots,
            rows = summary.rows,
            "headless run finished"
        );
        return Ok(());
    }

    let _guard = runtime.enter();
    run_tui(&settings, args.replay.as_deref())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.headless)?;
    run_app(&args, run_tui)
}
