pub mod editor;
pub mod grid;

use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use bpfq_core::engine::{EngineInput, SyncEngine};
use bpfq_core::live_view::QueryEditor;
use bpfq_core::presets::DeepLink;
use bpfq_core::status::StatusTone;
use bpfq_core::submission::QueryConnection;
use bpfq_core::transport::EventSource;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tracing::info;
use tui_textarea::Input;

use crate::editor::TextEditor;
use crate::grid::TableGrid;

const TICK_RATE: Duration = Duration::from_millis(50);

pub type TuiEngine<C> = SyncEngine<TextEditor, TableGrid, C, DeepLink>;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Editor,
    Results,
    Palette,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    TogglePalette,
    ClosePalette,
    PaletteMove(DirectionKey),
    PaletteConfirm,
    Edit(Input),
    Scroll(DirectionKey),
    RenderTick,
}

struct TuiApp<C: QueryConnection> {
    engine: TuiEngine<C>,
    server_label: String,
    show_help: bool,
    palette: Option<usize>,
    should_quit: bool,
}

impl<C: QueryConnection> TuiApp<C> {
    fn new(engine: TuiEngine<C>, server_label: String) -> Self {
        Self {
            engine,
            server_label,
            show_help: false,
            palette: None,
            should_quit: false,
        }
    }

    fn input_mode(&self) -> InputMode {
        if self.palette.is_some() {
            InputMode::Palette
        } else if self.show_help {
            InputMode::Help
        } else if self.engine.editor().has_focus() {
            InputMode::Editor
        } else {
            InputMode::Results
        }
    }

    fn preset_names(&self) -> Vec<String> {
        self.engine
            .presets()
            .catalog()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextPane => {
                let editor = self.engine.editor_mut();
                if editor.has_focus() {
                    editor.blur();
                } else {
                    editor.focus();
                }
            }
            Msg::TogglePalette => {
                self.palette = match self.palette {
                    Some(_) => None,
                    None => Some(0),
                };
            }
            Msg::ClosePalette => self.palette = None,
            Msg::PaletteMove(direction) => {
                let count = self.preset_names().len();
                if let Some(selected) = self.palette.as_mut() {
                    *selected = match direction {
                        DirectionKey::Up => selected.saturating_sub(1),
                        DirectionKey::Down => (*selected + 1).min(count.saturating_sub(1)),
                    };
                }
            }
            Msg::PaletteConfirm => {
                let Some(selected) = self.palette.take() else {
                    return;
                };
                if let Some(name) = self.preset_names().into_iter().nth(selected) {
                    self.engine.editor_mut().focus();
                    self.engine.handle(EngineInput::PresetSelected(name));
                }
            }
            Msg::Edit(input) => {
                if self.engine.editor_mut().input(input) {
                    self.engine.handle(EngineInput::EditorChanged);
                }
            }
            Msg::Scroll(direction) => {
                let delta = match direction {
                    DirectionKey::Up => -1,
                    DirectionKey::Down => 1,
                };
                self.engine.grid_mut().scroll_by(delta);
            }
            Msg::RenderTick => self.engine.handle(EngineInput::RenderTick),
        }
    }
}

#[must_use]
pub fn ui_name() -> &'static str {
    "bpfq-tui"
}

/// Runs the terminal UI until the operator quits. Transport events are
/// drained from `source` between key presses; the engine is torn down on
/// exit.
pub fn run<C, S>(engine: TuiEngine<C>, source: S, server_label: &str) -> Result<(), TuiError>
where
    C: QueryConnection,
    S: EventSource,
{
    let mut terminal = setup_terminal()?;
    let mut app = TuiApp::new(engine, server_label.to_string());
    let run_result = run_loop(&mut terminal, &mut app, source);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<B, C, S>(
    terminal: &mut Terminal<B>,
    app: &mut TuiApp<C>,
    mut source: S,
) -> Result<(), TuiError>
where
    B: Backend,
    C: QueryConnection,
    S: EventSource,
{
    let render_period = app.engine.render_period();
    let mut last_render = Instant::now();

    loop {
        while let Some(transport_event) = source.try_next_event() {
            app.engine.handle(EngineInput::from(transport_event));
        }

        terminal.draw(|frame| render(frame, app))?;

        let until_render = render_period
            .checked_sub(last_render.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(until_render.min(TICK_RATE))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.input_mode()) {
                        app.handle(message);
                    }
                }
            }
        }

        if last_render.elapsed() >= render_period {
            app.handle(Msg::RenderTick);
            last_render = Instant::now();
        }

        if app.should_quit {
            app.engine.handle(EngineInput::Teardown);
            info!("terminal ui closed");
            break;
        }
    }

    Ok(())
}

fn render<C: QueryConnection>(frame: &mut Frame<'_>, app: &TuiApp<C>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[1]);
    render_editor(frame, app, body[0]);
    render_results(frame, app, body[1]);
    render_status(frame, app, chunks[2]);

    match app.input_mode() {
        InputMode::Palette => render_palette(frame, app),
        InputMode::Help => render_help_popup(frame),
        InputMode::Editor | InputMode::Results => {}
    }
}

fn render_header<C: QueryConnection>(frame: &mut Frame<'_>, app: &TuiApp<C>, area: Rect) {
    let engine = &app.engine;
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" {} ", app.server_label),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("Connection: {:?}", engine.connection().state())),
        Span::raw(" | "),
        Span::raw(engine.schema().epoch().to_string()),
        Span::raw(" | "),
        Span::raw(format!("Rows: {}", engine.buffer().len())),
        Span::raw(" | "),
        Span::raw(format!(
            "Preset: {}",
            engine.presets().active().unwrap_or("-")
        )),
    ]))
    .block(Block::default().borders(Borders::ALL).title("bpfq"));
    frame.render_widget(header, area);
}

fn pane_block(title: &str, focused: bool) -> Block<'_> {
    let style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(style)
        .title(title)
}

fn render_editor<C: QueryConnection>(frame: &mut Frame<'_>, app: &TuiApp<C>, area: Rect) {
    let editor = app.engine.editor();
    let textarea = editor.widget(pane_block("Query", editor.has_focus()));
    frame.render_widget(&textarea, area);
}

fn render_results<C: QueryConnection>(frame: &mut Frame<'_>, app: &TuiApp<C>, area: Rect) {
    let grid = app.engine.grid();
    let view = grid.view();
    let visible = usize::from(area.height.saturating_sub(3)).max(1);

    let header = Row::new(view.header.iter().map(|column| Cell::from(column.as_str())))
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows = view
        .rows
        .iter()
        .skip(grid.scroll_offset())
        .take(visible)
        .map(|row| Row::new(row.iter().map(|value| Cell::from(value.as_str()))));
    let widths = vec![Constraint::Fill(1); view.header.len().max(1)];

    let table = Table::new(rows, widths)
        .header(header)
        .block(pane_block(&view.title, !app.engine.editor().has_focus()));
    frame.render_widget(table, area);
}

fn render_status<C: QueryConnection>(frame: &mut Frame<'_>, app: &TuiApp<C>, area: Rect) {
    let status = app.engine.status();
    let style = match status.tone() {
        StatusTone::Normal => Style::default(),
        StatusTone::Warning => Style::default().fg(Color::Yellow),
        StatusTone::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    };
    let footer = Paragraph::new(vec![
        Line::from(Span::styled(status.text().to_string(), style)),
        Line::from("Tab: switch pane | Ctrl+P: presets | F1: help | Esc: quit"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(footer, area);
}

fn render_palette<C: QueryConnection>(frame: &mut Frame<'_>, app: &TuiApp<C>) {
    let area = centered_rect(40, 50, frame.area());
    frame.render_widget(Clear, area);
    let selected = app.palette.unwrap_or_default();
    let mut lines = vec![Line::from("Enter: apply | Esc: close"), Line::from("")];
    for (index, name) in app.preset_names().into_iter().enumerate() {
        let marker = if index == selected { ">" } else { " " };
        lines.push(Line::from(format!("{marker} {name}")));
    }
    let palette =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Presets"));
    frame.render_widget(palette, area);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("Esc / Ctrl+C: quit"),
        Line::from("F1: toggle help"),
        Line::from("Tab: switch between query and results"),
        Line::from("Ctrl+P: preset palette"),
        Line::from("Editing the query resubmits it immediately"),
        Line::from("Up/Down or j/k in results: scroll"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent, mode: InputMode) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => return Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('p')) => return Some(Msg::TogglePalette),
        (_, KeyCode::F(1)) => return Some(Msg::ToggleHelp),
        _ => {}
    }

    match mode {
        InputMode::Palette => match key.code {
            KeyCode::Esc => Some(Msg::ClosePalette),
            KeyCode::Up => Some(Msg::PaletteMove(DirectionKey::Up)),
            KeyCode::Down => Some(Msg::PaletteMove(DirectionKey::Down)),
            KeyCode::Enter => Some(Msg::PaletteConfirm),
            _ => None,
        },
        InputMode::Help => match key.code {
            KeyCode::Esc => Some(Msg::ToggleHelp),
            _ => None,
        },
        InputMode::Editor => match (key.modifiers, key.code) {
            (_, KeyCode::Esc) => Some(Msg::Quit),
            (_, KeyCode::Tab) => Some(Msg::NextPane),
            _ => Some(Msg::Edit(Input::from(key))),
        },
        InputMode::Results => match key.code {
            KeyCode::Esc => Some(Msg::Quit),
            KeyCode::Tab => Some(Msg::NextPane),
            KeyCode::Up | KeyCode::Char('k') => Some(Msg::Scroll(DirectionKey::Up)),
            KeyCode::Down | KeyCode::Char('j') => Some(Msg::Scroll(DirectionKey::Down)),
            _ => None,
        },
    }
}
