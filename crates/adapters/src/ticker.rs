use std::time::Duration;

use bpfq_core::render_scheduler::CancellationToken;
use tokio::time::{self, Interval, MissedTickBehavior};

/// Async clock for render ticks. A slow render skips missed ticks instead of
/// bursting to catch up.
#[derive(Debug)]
pub struct RenderTicker {
    interval: Interval,
    cancellation: CancellationToken,
}

impl RenderTicker {
    #[must_use]
    pub fn new(period: Duration, cancellation: CancellationToken) -> Self {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            cancellation,
        }
    }

    /// Waits for the next tick. Returns `false` once cancelled.
    pub async fn next_tick(&mut self) -> bool {
        if self.cancellation.is_cancelled() {
            return false;
        }
        self.interval.tick().await;
        !self.cancellation.is_cancelled()
    }
}
