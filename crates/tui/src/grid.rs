use std::cmp::Ordering;
use std::collections::BTreeMap;

use bpfq_adapters::export::scalar_text;
use bpfq_core::live_view::{DatasetOptions, FilterSpec, GridError, ResultGrid, VisualConfig};
use bpfq_core::row_buffer::Record;
use serde_json::Value;

const COUNT_COLUMN: &str = "count";

#[derive(Debug, Clone, PartialEq)]
pub struct GridDataset {
    columns: Vec<String>,
    rows: Vec<Record>,
    index: Option<String>,
}

/// What the results pane draws: filtered, sorted, projected and grouped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridView {
    pub title: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct TableGrid {
    columns: Vec<String>,
    rows: Vec<Record>,
    index: Option<String>,
    visual: VisualConfig,
    scroll: usize,
}

impl TableGrid {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    #[must_use]
    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    #[must_use]
    pub fn visual(&self) -> &VisualConfig {
        &self.visual
    }

    #[must_use]
    pub fn scroll_offset(&self) -> usize {
        self.scroll
    }

    pub fn scroll_by(&mut self, delta: isize) {
        let max = self.view().rows.len().saturating_sub(1);
        self.scroll = self.scroll.saturating_add_signed(delta).min(max);
    }

    #[must_use]
    pub fn view(&self) -> GridView {
        let mut rows: Vec<&Record> = self
            .rows
            .iter()
            .filter(|record| self.visual.filter.iter().all(|filter| matches_filter(record, filter)))
            .collect();

        for sort in self.visual.sort.iter().rev() {
            rows.sort_by(|left, right| {
                let ordering = compare_scalars(left.get(&sort.column), right.get(&sort.column));
                if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let title = self.title(rows.len());
        if !self.visual.group_by.is_empty() {
            return self.grouped_view(title, &rows);
        }

        let header = self.projected_columns();
        let rows = rows
            .into_iter()
            .map(|record| {
                header
                    .iter()
                    .map(|column| record.get(column).map(scalar_text).unwrap_or_default())
                    .collect()
            })
            .collect();
        GridView {
            title,
            header,
            rows,
        }
    }

    fn projected_columns(&self) -> Vec<String> {
        if self.visual.columns.is_empty() {
            return self.columns.clone();
        }
        self.visual
            .columns
            .iter()
            .filter(|column| self.columns.contains(column))
            .cloned()
            .collect()
    }

    fn grouped_view(&self, title: String, rows: &[&Record]) -> GridView {
        let mut groups: BTreeMap<Vec<String>, usize> = BTreeMap::new();
        for record in rows {
            let key = self
                .visual
                .group_by
                .iter()
                .map(|column| record.get(column).map(scalar_text).unwrap_or_default())
                .collect();
            *groups.entry(key).or_default() += 1;
        }

        let mut header = self.visual.group_by.clone();
        header.push(COUNT_COLUMN.to_string());
        let rows = groups
            .into_iter()
            .map(|(mut key, count)| {
                key.push(count.to_string());
                key
            })
            .collect();
        GridView {
            title,
            header,
            rows,
        }
    }

    fn title(&self, visible: usize) -> String {
        let mut title = format!(
            "{} ({visible}/{} rows)",
            self.visual.plugin.as_deref().unwrap_or("Datagrid"),
            self.rows.len()
        );
        if !self.visual.group_by.is_empty() {
            title.push_str(&format!(" grouped by {}", self.visual.group_by.join(", ")));
        }
        if !self.visual.split_by.is_empty() {
            title.push_str(&format!(" split by {}", self.visual.split_by.join(", ")));
        }
        title
    }
}

impl ResultGrid for TableGrid {
    type Dataset = GridDataset;

    fn construct_dataset(
        &mut self,
        rows: &[Record],
        options: &DatasetOptions,
    ) -> Result<Self::Dataset, GridError> {
        let columns = collect_columns(&[], rows);
        if let Some(index) = &options.index {
            if !columns.contains(index) {
                return Err(GridError::new(format!(
                    "index column `{index}` is missing from the dataset"
                )));
            }
        }
        Ok(GridDataset {
            columns,
            rows: rows.to_vec(),
            index: options.index.clone(),
        })
    }

    fn load(&mut self, dataset: Self::Dataset) -> Result<(), GridError> {
        self.columns = dataset.columns;
        self.rows = dataset.rows;
        self.index = dataset.index;
        self.scroll = 0;
        Ok(())
    }

    fn replace(&mut self, rows: &[Record]) -> Result<(), GridError> {
        if self.index.is_none() {
            return Err(GridError::new("replace needs an indexed dataset"));
        }
        self.columns = collect_columns(&self.columns, rows);
        self.rows = rows.to_vec();
        self.scroll = self.scroll.min(self.rows.len().saturating_sub(1));
        Ok(())
    }

    fn restore(&mut self, config: &VisualConfig) -> Result<(), GridError> {
        self.visual = config.clone();
        Ok(())
    }
}

/// Known columns first, then new keys in first-seen order.
fn collect_columns(known: &[String], rows: &[Record]) -> Vec<String> {
    let mut columns = known.to_vec();
    for record in rows {
        for key in record.fields().keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn matches_filter(record: &Record, filter: &FilterSpec) -> bool {
    let value = record.get(&filter.column).unwrap_or(&Value::Null);
    match filter.op.as_str() {
        "==" => value == &filter.value,
        "!=" => value != &filter.value,
        "contains" => scalar_text(value).contains(&scalar_text(&filter.value)),
        ">" => compare_scalars(Some(value), Some(&filter.value)) == Ordering::Greater,
        "<" => compare_scalars(Some(value), Some(&filter.value)) == Ordering::Less,
        _ => true,
    }
}

fn compare_scalars(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Number(left)), Some(Value::Number(right))) => left
            .as_f64()
            .partial_cmp(&right.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(left), Some(right)) => scalar_text(left).cmp(&scalar_text(right)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use bpfq_core::live_view::{DatasetOptions, FilterSpec, ResultGrid, SortSpec, VisualConfig};
    use bpfq_core::row_buffer::Record;
    use serde_json::{json, Map, Value};

    use super::TableGrid;

    fn record(seq: u64, comm: &str, probe: &str) -> Record {
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::from(seq));
        fields.insert("comm".to_string(), json!(comm));
        fields.insert("probe".to_string(), json!(probe));
        Record::new(seq, fields)
    }

    fn loaded_grid() -> TableGrid {
        let rows = vec![
            record(0, "bash", "sys_enter_open"),
            record(1, "sh", "sys_enter_read"),
            record(2, "bash", "sys_enter_read"),
        ];
        let mut grid = TableGrid::new();
        let dataset = grid
            .construct_dataset(&rows, &DatasetOptions::indexed_by("id"))
            .expect("dataset should build");
        grid.load(dataset).expect("dataset should load");
        grid
    }

    #[test]
    fn columns_follow_record_field_order() {
        let grid = loaded_grid();
        assert_eq!(grid.columns(), ["id", "comm", "probe"]);
        assert_eq!(grid.index(), Some("id"));

        let view = grid.view();
        assert_eq!(view.rows[1], vec!["1", "sh", "sys_enter_read"]);
    }

    #[test]
    fn index_column_must_exist() {
        let mut grid = TableGrid::new();
        let rows = vec![record(0, "bash", "open")];
        assert!(grid
            .construct_dataset(&rows, &DatasetOptions::indexed_by("pid"))
            .is_err());
    }

    #[test]
    fn replace_requires_indexed_dataset() {
        let mut grid = TableGrid::new();
        let dataset = grid
            .construct_dataset(&[record(0, "bash", "open")], &DatasetOptions::default())
            .expect("dataset should build");
        grid.load(dataset).expect("dataset should load");

        assert!(grid.replace(&[record(1, "sh", "read")]).is_err());
        assert_eq!(loaded_grid().replace(&[record(5, "zsh", "close")]), Ok(()));
    }

    #[test]
    fn visual_config_filters_sorts_and_projects() {
        let mut grid = loaded_grid();
        grid.restore(&VisualConfig {
            columns: vec!["id".to_string(), "probe".to_string()],
            sort: vec![SortSpec {
                column: "id".to_string(),
                descending: true,
            }],
            filter: vec![FilterSpec {
                column: "comm".to_string(),
                op: "==".to_string(),
                value: json!("bash"),
            }],
            ..VisualConfig::placeholder_default()
        })
        .expect("restore should succeed");

        let view = grid.view();
        assert_eq!(view.header, vec!["id", "probe"]);
        assert_eq!(
            view.rows,
            vec![
                vec!["2".to_string(), "sys_enter_read".to_string()],
                vec!["0".to_string(), "sys_enter_open".to_string()],
            ]
        );
        assert!(view.title.contains("2/3 rows"));
    }

    #[test]
    fn group_by_counts_rows_per_key() {
        let mut grid = loaded_grid();
        grid.restore(&VisualConfig {
            group_by: vec!["comm".to_string()],
            split_by: vec!["probe".to_string()],
            ..VisualConfig::placeholder_default()
        })
        .expect("restore should succeed");

        let view = grid.view();
        assert_eq!(view.header, vec!["comm", "count"]);
        assert_eq!(
            view.rows,
            vec![
                vec!["bash".to_string(), "2".to_string()],
                vec!["sh".to_string(), "1".to_string()],
            ]
        );
        assert!(view.title.contains("split by probe"));
    }

    #[test]
    fn scrolling_is_clamped_to_visible_rows() {
        let mut grid = loaded_grid();
        grid.scroll_by(10);
        assert_eq!(grid.scroll_offset(), 2);
        grid.scroll_by(-5);
        assert_eq!(grid.scroll_offset(), 0);
    }
}
