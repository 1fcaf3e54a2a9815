use std::collections::HashSet;
use std::fmt;

use tracing::info;

/// Name of the synthetic identity column that always leads the header set.
pub const ID_COLUMN: &str = "id";

/// Generation counter for result shapes. Epoch 0 means no schema has been
/// received yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl Epoch {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

/// Normalized header set plus where each column sits on the wire.
///
/// Backend headers may repeat a name or carry `id` anywhere; rows are still
/// positional against the backend's list, so every column remembers the wire
/// position of its first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLayout {
    columns: Vec<String>,
    positions: Vec<Option<usize>>,
    backend_width: usize,
}

impl SchemaLayout {
    fn from_backend(headers: Vec<String>) -> Self {
        let backend_width = headers.len();
        let mut columns = vec![ID_COLUMN.to_string()];
        let mut positions = vec![None];
        let mut seen = HashSet::with_capacity(backend_width + 1);

        for (position, header) in headers.into_iter().enumerate() {
            if header == ID_COLUMN {
                if positions[0].is_none() {
                    positions[0] = Some(position);
                }
                continue;
            }
            if seen.insert(header.clone()) {
                columns.push(header);
                positions.push(Some(position));
            }
        }

        Self {
            columns,
            positions,
            backend_width,
        }
    }

    /// Column names with `id` first and no repeats.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of `column` among the backend's headers. `None` for the
    /// synthetic `id` and for unknown names.
    #[must_use]
    pub fn wire_position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|index| self.positions[index])
    }

    /// Whether the backend named an `id` column itself.
    #[must_use]
    pub fn backend_supplies_id(&self) -> bool {
        self.positions[0].is_some()
    }

    /// Number of headers the backend announced, repeats included.
    #[must_use]
    pub fn backend_width(&self) -> usize {
        self.backend_width
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (&String, Option<usize>)> {
        self.columns.iter().zip(self.positions.iter().copied())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaTracker {
    layout: Option<SchemaLayout>,
    summary: String,
    epoch: Epoch,
}

impl SchemaTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active header set wholesale and starts a new epoch.
    ///
    /// `id` always leads the normalized columns; repeated names keep their
    /// first position only.
    pub fn on_schema(&mut self, headers: Vec<String>, output_text: impl Into<String>) -> Epoch {
        let layout = SchemaLayout::from_backend(headers);
        self.summary = output_text.into();
        self.epoch = self.epoch.next();
        info!(
            epoch = self.epoch.get(),
            columns = layout.columns().len(),
            "schema epoch started"
        );
        self.layout = Some(layout);
        self.epoch
    }

    #[must_use]
    pub fn layout(&self) -> Option<&SchemaLayout> {
        self.layout.as_ref()
    }

    #[must_use]
    pub fn current_headers(&self) -> Option<&[String]> {
        self.layout.as_ref().map(SchemaLayout::columns)
    }

    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Forgets the header set, e.g. when the connection is torn down. The
    /// epoch keeps counting so stale data can never match a later epoch.
    pub fn clear(&mut self) {
        self.layout = None;
        self.summary.clear();
    }
}
