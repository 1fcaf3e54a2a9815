use std::collections::VecDeque;

use serde_json::{Map, Value};
use tracing::debug;

use crate::events::Scalar;
use crate::schema_tracker::{Epoch, SchemaLayout, ID_COLUMN};

/// One result row keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    seq: u64,
    fields: Map<String, Scalar>,
}

impl Record {
    #[must_use]
    pub fn new(seq: u64, fields: Map<String, Scalar>) -> Self {
        Self { seq, fields }
    }

    /// Arrival position within the epoch, starting at 0.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn id(&self) -> Option<&Scalar> {
        self.fields.get(ID_COLUMN)
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.fields.get(column)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Scalar> {
        &self.fields
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Change-detection token: identical marks mean identical buffer content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferMark {
    pub epoch: Epoch,
    pub rows_seen: u64,
}

#[derive(Debug, Clone)]
pub struct RowBuffer {
    capacity: Option<usize>,
    rows: VecDeque<Record>,
    total_rows_seen: u64,
    epoch: Epoch,
}

impl Default for RowBuffer {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RowBuffer {
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            rows: VecDeque::new(),
            total_rows_seen: 0,
            epoch: Epoch::default(),
        }
    }

    /// Keeps at most `capacity` records, evicting the oldest first.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        assert!(
            capacity > 0,
            "row buffer capacity must be greater than 0"
        );
        Self {
            capacity: Some(capacity),
            rows: VecDeque::with_capacity(capacity),
            total_rows_seen: 0,
            epoch: Epoch::default(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn total_rows_seen(&self) -> u64 {
        self.total_rows_seen
    }

    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[must_use]
    pub fn mark(&self) -> BufferMark {
        BufferMark {
            epoch: self.epoch,
            rows_seen: self.total_rows_seen,
        }
    }

    /// Maps positional `values` onto the active layout and appends the record.
    ///
    /// Returns `false` without buffering anything when no schema is active.
    /// The `id` comes from the backend's own `id` header when it has one,
    /// otherwise from a leading slot ahead of the announced headers, and
    /// falls back to the arrival sequence number when the row has no such
    /// slot. Missing values become `null`.
    pub fn on_row(&mut self, layout: Option<&SchemaLayout>, values: Vec<Scalar>) -> bool {
        let Some(layout) = layout else {
            debug!(values = values.len(), "row dropped: no active header set");
            return false;
        };

        let seq = self.total_rows_seen;
        let leading_id_slot = !layout.backend_supplies_id() && values.len() > layout.backend_width();
        let offset = usize::from(leading_id_slot);
        let value_at = |position: usize| values.get(position).cloned().unwrap_or(Value::Null);

        let mut fields = Map::with_capacity(layout.columns().len());
        for (column, position) in layout.slots() {
            let value = match position {
                Some(position) => value_at(position + offset),
                None if leading_id_slot => value_at(0),
                None => Value::from(seq),
            };
            fields.insert(column.clone(), value);
        }

        let surplus = values.len().saturating_sub(layout.backend_width() + offset);
        if surplus > 0 {
            debug!(seq, surplus, "row carried more values than headers");
        }

        self.push(Record::new(seq, fields));
        true
    }

    /// Returns every buffered record of the current epoch. Unlike a queue
    /// drain, the buffer keeps its content.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Record> {
        self.rows.iter().cloned().collect()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Record> {
        self.rows.get(index)
    }

    /// Empties the buffer for a new schema epoch.
    pub fn reset(&mut self, epoch: Epoch) {
        self.rows.clear();
        self.total_rows_seen = 0;
        self.epoch = epoch;
    }

    fn push(&mut self, record: Record) {
        if self.capacity == Some(self.rows.len()) {
            self.rows.pop_front();
        }
        self.rows.push_back(record);
        self.total_rows_seen += 1;
    }
}
