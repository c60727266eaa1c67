//! Time-boxed batching and request pacing.
//!
//! The scheduler splits candidates into fixed-size batches and keeps the
//! run-wide deadline. The budget is soft: the pipeline asks
//! [`BatchWindow::is_over_budget`] at batch and record boundaries, so an
//! in-flight record always finishes before the run stops.

use crate::models::ArticleRecord;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// One batch of candidates together with the deadline it runs under.
#[derive(Debug)]
pub struct BatchWindow<'a> {
    pub index: usize,
    pub start_time: Instant,
    pub deadline: Option<Instant>,
    pub items: &'a [ArticleRecord],
}

impl BatchWindow<'_> {
    /// Whether the run deadline has passed.
    pub fn is_over_budget(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Splits the candidate list into batches and owns the run clock.
///
/// Also spaces classifier calls at least `request_delay` apart.
#[derive(Debug)]
pub struct BatchScheduler {
    batch_size: usize,
    time_budget: Option<Duration>,
    request_delay: Duration,
    run_started: Instant,
    calls_made: usize,
}

impl BatchScheduler {
    /// The run clock starts when the scheduler is created.
    pub fn new(batch_size: usize, time_budget: Option<Duration>, request_delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            time_budget,
            request_delay,
            run_started: Instant::now(),
            calls_made: 0,
        }
    }

    /// Contiguous batches of at most `batch_size`; the last may be shorter.
    pub fn partition<'a>(
        &self,
        items: &'a [ArticleRecord],
    ) -> impl Iterator<Item = &'a [ArticleRecord]> + use<'a> {
        items.chunks(self.batch_size)
    }

    /// Instant after which no new record may start; `None` without a budget.
    pub fn deadline(&self) -> Option<Instant> {
        self.time_budget.map(|b| self.run_started + b)
    }

    /// Time since the scheduler was created.
    pub fn elapsed(&self) -> Duration {
        self.run_started.elapsed()
    }

    /// Start the window for batch `index`, stamped with the run deadline.
    pub fn open<'a>(&self, index: usize, items: &'a [ArticleRecord]) -> BatchWindow<'a> {
        BatchWindow {
            index,
            start_time: Instant::now(),
            deadline: self.deadline(),
            items,
        }
    }

    /// Wait out the minimum gap before the next classifier call.
    ///
    /// The first call of a run goes out immediately.
    pub async fn pace(&mut self) {
        if self.calls_made > 0 && !self.request_delay.is_zero() {
            debug!(delay = ?self.request_delay, "Pacing before next request");
            sleep(self.request_delay).await;
        }
        self.calls_made += 1;
    }
}
