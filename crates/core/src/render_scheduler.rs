use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crate::row_buffer::{BufferMark, Record, RowBuffer};

pub const DEFAULT_RENDER_PERIOD: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Stopped,
    Unchanged,
    /// The buffer changed but holds no rows (a fresh epoch); nothing to show.
    Emptied,
    Flush(Vec<Record>),
}

/// Time-sliced flush policy: on every tick the whole buffer is handed over,
/// but only when it changed since the previous tick.
#[derive(Debug)]
pub struct RenderScheduler {
    period: Duration,
    last_mark: BufferMark,
    flushes: u64,
    cancellation: CancellationToken,
}

impl RenderScheduler {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self::with_cancellation(period, CancellationToken::new())
    }

    #[must_use]
    pub fn with_cancellation(period: Duration, cancellation: CancellationToken) -> Self {
        Self {
            period,
            last_mark: BufferMark::default(),
            flushes: 0,
            cancellation,
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn stop(&mut self) {
        self.cancellation.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn tick(&mut self, buffer: &RowBuffer) -> TickOutcome {
        if self.is_stopped() {
            return TickOutcome::Stopped;
        }

        let mark = buffer.mark();
        if mark == self.last_mark {
            return TickOutcome::Unchanged;
        }
        self.last_mark = mark;

        if buffer.is_empty() {
            return TickOutcome::Emptied;
        }
        self.flushes += 1;
        TickOutcome::Flush(buffer.snapshot())
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{CancellationToken, RenderScheduler, TickOutcome, DEFAULT_RENDER_PERIOD};
    use crate::row_buffer::RowBuffer;
    use crate::schema_tracker::SchemaTracker;

    fn buffer_with_rows(count: usize) -> (SchemaTracker, RowBuffer) {
        let mut tracker = SchemaTracker::new();
        let epoch = tracker.on_schema(vec!["v".to_string()], "");
        let mut buffer = RowBuffer::unbounded();
        buffer.reset(epoch);
        for index in 0..count {
            buffer.on_row(tracker.layout(), vec![json!(index)]);
        }
        (tracker, buffer)
    }

    #[test]
    fn first_tick_on_empty_session_is_a_no_op() {
        let mut scheduler = RenderScheduler::default();
        let buffer = RowBuffer::unbounded();

        assert_eq!(scheduler.period(), DEFAULT_RENDER_PERIOD);
        assert_eq!(scheduler.tick(&buffer), TickOutcome::Unchanged);
        assert_eq!(scheduler.flush_count(), 0);
    }

    #[test]
    fn unchanged_buffer_between_ticks_flushes_once() {
        let (_tracker, buffer) = buffer_with_rows(3);
        let mut scheduler = RenderScheduler::new(Duration::from_millis(10));

        let TickOutcome::Flush(rows) = scheduler.tick(&buffer) else {
            panic!("first tick after rows should flush");
        };
        assert_eq!(rows.len(), 3);
        assert_eq!(scheduler.tick(&buffer), TickOutcome::Unchanged);
        assert_eq!(scheduler.tick(&buffer), TickOutcome::Unchanged);
        assert_eq!(scheduler.flush_count(), 1);
    }

    #[test]
    fn growth_triggers_full_dataset_flush() {
        let (tracker, mut buffer) = buffer_with_rows(1);
        let mut scheduler = RenderScheduler::default();
        assert!(matches!(scheduler.tick(&buffer), TickOutcome::Flush(_)));

        buffer.on_row(tracker.layout(), vec![json!("late")]);
        let TickOutcome::Flush(rows) = scheduler.tick(&buffer) else {
            panic!("growth should flush");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("v"), Some(&json!("late")));
    }

    #[test]
    fn new_epoch_with_no_rows_is_reported_as_emptied() {
        let (mut tracker, mut buffer) = buffer_with_rows(2);
        let mut scheduler = RenderScheduler::default();
        assert!(matches!(scheduler.tick(&buffer), TickOutcome::Flush(_)));

        let epoch = tracker.on_schema(vec!["w".to_string()], "");
        buffer.reset(epoch);
        assert_eq!(scheduler.tick(&buffer), TickOutcome::Emptied);
        assert_eq!(scheduler.tick(&buffer), TickOutcome::Unchanged);
    }

    #[test]
    fn stopped_scheduler_never_flushes() {
        let (_tracker, buffer) = buffer_with_rows(2);
        let token = CancellationToken::new();
        let mut scheduler = RenderScheduler::with_cancellation(Duration::from_secs(1), token.clone());

        token.cancel();
        assert!(scheduler.is_stopped());
        assert_eq!(scheduler.tick(&buffer), TickOutcome::Stopped);
        assert_eq!(scheduler.flush_count(), 0);
    }
}
