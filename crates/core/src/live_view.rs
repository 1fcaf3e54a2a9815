use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::events::Scalar;
use crate::row_buffer::Record;
use crate::schema_tracker::ID_COLUMN;

pub const DEFAULT_PLUGIN: &str = "Datagrid";
pub const DEFAULT_THEME: &str = "Pro Light";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PluginConfig {
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub scroll_lock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterSpec {
    pub column: String,
    pub op: String,
    pub value: Scalar,
}

/// Saved layout of the results surface: plugin, theme, visible columns,
/// grouping, sorting and filters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VisualConfig {
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub plugin_config: PluginConfig,
    #[serde(default)]
    pub settings: bool,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub split_by: Vec<String>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(default)]
    pub filter: Vec<FilterSpec>,
}

impl VisualConfig {
    /// Configuration applied when the surface is first built: read-only,
    /// scroll-locked, light theme, no settings panel and no filters.
    #[must_use]
    pub fn placeholder_default() -> Self {
        Self {
            plugin: Some(DEFAULT_PLUGIN.to_string()),
            plugin_config: PluginConfig {
                editable: false,
                scroll_lock: true,
            },
            settings: false,
            theme: Some(DEFAULT_THEME.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasetOptions {
    pub index: Option<String>,
}

impl DatasetOptions {
    #[must_use]
    pub fn indexed_by(column: impl Into<String>) -> Self {
        Self {
            index: Some(column.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GridError {
    message: String,
}

impl GridError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Tabular rendering surface.
pub trait ResultGrid {
    type Dataset;

    fn construct_dataset(
        &mut self,
        rows: &[Record],
        options: &DatasetOptions,
    ) -> Result<Self::Dataset, GridError>;
    fn load(&mut self, dataset: Self::Dataset) -> Result<(), GridError>;
    fn replace(&mut self, rows: &[Record]) -> Result<(), GridError>;
    fn restore(&mut self, config: &VisualConfig) -> Result<(), GridError>;
}

/// Query editing surface. Content changes reach the engine as
/// `EngineInput::EditorChanged`.
pub trait QueryEditor {
    fn value(&self) -> String;
    fn set_value(&mut self, text: &str);
    fn has_focus(&self) -> bool;
    fn focus(&mut self);
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("results view is not initialized yet")]
    NotInitialized,
    #[error("results view failed: {0}")]
    Grid(#[source] GridError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Uninitialized,
    Placeholder,
    Indexed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetChange {
    Skipped,
    Indexed,
    Replaced,
}

#[derive(Debug)]
pub struct LiveViewController<G: ResultGrid> {
    grid: G,
    state: ViewState,
    index_builds: u64,
}

impl<G: ResultGrid> LiveViewController<G> {
    #[must_use]
    pub fn new(grid: G) -> Self {
        Self {
            grid,
            state: ViewState::Uninitialized,
            index_builds: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ViewState {
        self.state
    }

    #[must_use]
    pub fn grid(&self) -> &G {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut G {
        &mut self.grid
    }

    /// Number of Placeholder→Indexed transitions so far.
    #[must_use]
    pub fn index_builds(&self) -> u64 {
        self.index_builds
    }

    /// Builds the placeholder surface on first use. Returns `true` when this
    /// call did the construction.
    pub fn ensure_initialized<E: QueryEditor + ?Sized>(
        &mut self,
        editor: &mut E,
    ) -> Result<bool, ViewError> {
        if self.state != ViewState::Uninitialized {
            return Ok(false);
        }
        self.load_placeholder(editor)?;
        info!("results view initialized with placeholder dataset");
        Ok(true)
    }

    /// Drops back to the placeholder so the next non-empty batch builds a
    /// fresh indexed dataset for the new epoch.
    pub fn reset_to_placeholder<E: QueryEditor + ?Sized>(
        &mut self,
        editor: &mut E,
    ) -> Result<(), ViewError> {
        self.load_placeholder(editor)
    }

    pub fn replace_dataset<E: QueryEditor + ?Sized>(
        &mut self,
        rows: &[Record],
        editor: &mut E,
    ) -> Result<DatasetChange, ViewError> {
        match self.state {
            ViewState::Uninitialized => Err(ViewError::NotInitialized),
            _ if rows.is_empty() => Ok(DatasetChange::Skipped),
            ViewState::Placeholder => {
                let grid = &mut self.grid;
                with_focus_preserved(editor, || {
                    let dataset = grid
                        .construct_dataset(rows, &DatasetOptions::indexed_by(ID_COLUMN))
                        .map_err(ViewError::Grid)?;
                    grid.load(dataset).map_err(ViewError::Grid)
                })?;
                self.state = ViewState::Indexed;
                self.index_builds += 1;
                debug!(rows = rows.len(), "indexed dataset loaded");
                Ok(DatasetChange::Indexed)
            }
            ViewState::Indexed => {
                let grid = &mut self.grid;
                with_focus_preserved(editor, || grid.replace(rows).map_err(ViewError::Grid))?;
                Ok(DatasetChange::Replaced)
            }
        }
    }

    /// Restores a saved layout in full. Only presets go through here; the
    /// dataset path never touches layout, grouping or filters.
    pub fn apply_preset_visual<E: QueryEditor + ?Sized>(
        &mut self,
        config: &VisualConfig,
        editor: &mut E,
    ) -> Result<(), ViewError> {
        if self.state == ViewState::Uninitialized {
            return Err(ViewError::NotInitialized);
        }
        let grid = &mut self.grid;
        with_focus_preserved(editor, || grid.restore(config).map_err(ViewError::Grid))
    }

    fn load_placeholder<E: QueryEditor + ?Sized>(&mut self, editor: &mut E) -> Result<(), ViewError> {
        let grid = &mut self.grid;
        with_focus_preserved(editor, || {
            let dataset = grid
                .construct_dataset(&[placeholder_record()], &DatasetOptions::default())
                .map_err(ViewError::Grid)?;
            grid.load(dataset).map_err(ViewError::Grid)?;
            grid.restore(&VisualConfig::placeholder_default())
                .map_err(ViewError::Grid)
        })?;
        self.state = ViewState::Placeholder;
        Ok(())
    }
}

fn placeholder_record() -> Record {
    let mut fields = Map::new();
    fields.insert("Loading".to_string(), Value::from("Data"));
    Record::new(0, fields)
}

fn with_focus_preserved<E, T>(editor: &mut E, operation: impl FnOnce() -> T) -> T
where
    E: QueryEditor + ?Sized,
{
    let had_focus = editor.has_focus();
    let outcome = operation();
    if had_focus && !editor.has_focus() {
        editor.focus();
    }
    outcome
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use serde_json::Value;

    use super::{DatasetOptions, GridError, QueryEditor, ResultGrid, VisualConfig};
    use crate::row_buffer::Record;

    #[derive(Debug, Clone, PartialEq)]
    pub enum GridCall {
        Construct { rows: usize, index: Option<String> },
        Load,
        Replace(Vec<Value>),
        Restore(VisualConfig),
    }

    /// Shared focus flag: loading a dataset into the grid steals focus from
    /// the editor, the way a real widget does.
    #[derive(Debug, Clone, Default)]
    pub struct FocusFlag(pub Rc<Cell<bool>>);

    #[derive(Debug, Default)]
    pub struct FakeGrid {
        pub calls: Rc<RefCell<Vec<GridCall>>>,
        pub focus: FocusFlag,
        pub fail_replace: bool,
    }

    impl FakeGrid {
        pub fn replace_count(&self) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|call| matches!(call, GridCall::Replace(_)))
                .count()
        }

        pub fn indexed_constructs(&self) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|call| matches!(call, GridCall::Construct { index: Some(_), .. }))
                .count()
        }

        pub fn restores(&self) -> Vec<VisualConfig> {
            self.calls
                .borrow()
                .iter()
                .filter_map(|call| match call {
                    GridCall::Restore(config) => Some(config.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl ResultGrid for FakeGrid {
        type Dataset = usize;

        fn construct_dataset(
            &mut self,
            rows: &[Record],
            options: &DatasetOptions,
        ) -> Result<Self::Dataset, GridError> {
            self.calls.borrow_mut().push(GridCall::Construct {
                rows: rows.len(),
                index: options.index.clone(),
            });
            Ok(rows.len())
        }

        fn load(&mut self, _dataset: Self::Dataset) -> Result<(), GridError> {
            self.focus.0.set(false);
            self.calls.borrow_mut().push(GridCall::Load);
            Ok(())
        }

        fn replace(&mut self, rows: &[Record]) -> Result<(), GridError> {
            if self.fail_replace {
                return Err(GridError::new("replace rejected"));
            }
            self.focus.0.set(false);
            self.calls
                .borrow_mut()
                .push(GridCall::Replace(rows.iter().map(Record::to_json).collect()));
            Ok(())
        }

        fn restore(&mut self, config: &VisualConfig) -> Result<(), GridError> {
            self.calls
                .borrow_mut()
                .push(GridCall::Restore(config.clone()));
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeEditor {
        pub text: String,
        pub focus: FocusFlag,
        pub focus_calls: usize,
    }

    impl FakeEditor {
        pub fn with_text(text: &str) -> Self {
            Self {
                text: text.to_string(),
                ..Self::default()
            }
        }

        pub fn sharing_focus_with(grid: &FakeGrid, text: &str) -> Self {
            Self {
                text: text.to_string(),
                focus: grid.focus.clone(),
                focus_calls: 0,
            }
        }
    }

    impl QueryEditor for FakeEditor {
        fn value(&self) -> String {
            self.text.clone()
        }

        fn set_value(&mut self, text: &str) {
            self.text = text.to_string();
        }

        fn has_focus(&self) -> bool {
            self.focus.0.get()
        }

        fn focus(&mut self) {
            self.focus_calls += 1;
            self.focus.0.set(true);
        }
    }
}
