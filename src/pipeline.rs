//! The categorization run: dedup, batch, classify with backoff, persist.
//!
//! Each candidate moves through
//!
//! ```text
//! Pending ─► Skipped                                  (key already stored)
//! Pending ─► Classifying ─► Succeeded                 (stored and flushed)
//! Pending ─► Classifying ─► Retrying ─► Classifying … ─► Failed
//! ```
//!
//! Every success is flushed before the next candidate starts, so an
//! interruption loses at most the one record that was in flight.

use crate::backoff::BackoffPolicy;
use crate::classifier::Classifier;
use crate::config::AppConfig;
use crate::error::{PipelineError, RetryError};
use crate::models::{AnnotatedRecord, ArticleRecord, RunSummary, StopReason};
use crate::scheduler::BatchScheduler;
use crate::store::ResultStore;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Terminal state of one candidate within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Skipped,
    Succeeded,
    Failed,
    /// Shutdown arrived while the record was in flight; nothing was stored.
    Abandoned,
}

/// Owns the result store for the duration of a run.
#[derive(Debug)]
pub struct Pipeline<'c, C> {
    classifier: &'c C,
    backoff: BackoffPolicy,
    scheduler: BatchScheduler,
    store: ResultStore,
    shutdown: CancellationToken,
}

impl<'c, C: Classifier> Pipeline<'c, C> {
    /// Assemble a pipeline from its parts; the run clock is the scheduler's.
    pub fn new(
        classifier: &'c C,
        store: ResultStore,
        backoff: BackoffPolicy,
        scheduler: BatchScheduler,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            classifier,
            backoff,
            scheduler,
            store,
            shutdown,
        }
    }

    /// Wire a pipeline from the loaded configuration. Starts the run clock.
    pub fn from_config(
        config: &AppConfig,
        classifier: &'c C,
        store: ResultStore,
        shutdown: CancellationToken,
    ) -> Self {
        let scheduler = BatchScheduler::new(
            config.batch.size,
            config.time_budget(),
            config.request_delay(),
        );
        Self::new(
            classifier,
            store,
            config.backoff_policy(),
            scheduler,
            shutdown,
        )
    }

    /// Results so far, including those loaded from earlier runs.
    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Categorize every candidate that is not stored yet, in input order.
    ///
    /// Per-record failures are logged and counted. Only a failure to persist
    /// the store ends the run with an error. On budget exhaustion or
    /// shutdown the store is flushed and a partial summary is returned.
    ///
    /// # Arguments
    /// * `candidates` - Feed articles in the order they should be visited.
    ///
    /// # Returns
    /// A [`RunSummary`] whose `stop` says why the run ended, or
    /// [`PipelineError::Persist`] if a flush failed.
    #[instrument(level = "info", skip_all, fields(candidates = candidates.len()))]
    pub async fn run(&mut self, candidates: &[ArticleRecord]) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary {
            processed: 0,
            skipped: 0,
            failed: 0,
            remaining: 0,
            stop: StopReason::Completed,
        };

        'batches: for (index, batch) in self.scheduler.partition(candidates).enumerate() {
            let window = self.scheduler.open(index, batch);
            if window.is_over_budget() {
                info!(
                    batch = window.index,
                    elapsed = ?self.scheduler.elapsed(),
                    "Time budget exhausted; leaving the rest for the next run"
                );
                summary.stop = StopReason::BudgetExhausted;
                break;
            }
            debug!(batch = window.index, size = window.items.len(), "Starting batch");

            for (position, article) in window.items.iter().enumerate() {
                if self.shutdown.is_cancelled() {
                    summary.stop = StopReason::Interrupted;
                    break 'batches;
                }
                if position > 0 && window.is_over_budget() {
                    info!(
                        batch = window.index,
                        elapsed = ?self.scheduler.elapsed(),
                        "Time budget exhausted mid-batch; leaving the rest for the next run"
                    );
                    summary.stop = StopReason::BudgetExhausted;
                    break 'batches;
                }

                match self.process(article).await? {
                    RecordState::Skipped => summary.skipped += 1,
                    RecordState::Succeeded => summary.processed += 1,
                    RecordState::Failed => summary.failed += 1,
                    RecordState::Abandoned => {
                        summary.stop = StopReason::Interrupted;
                        break 'batches;
                    }
                }
            }
            debug!(
                batch = window.index,
                elapsed_ms_batch = window.start_time.elapsed().as_millis(),
                "Finished batch"
            );
        }

        summary.remaining = candidates.len() - summary.visited();
        self.store.flush()?;

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            remaining = summary.remaining,
            stored = self.store.len(),
            stop = ?summary.stop,
            "Run finished"
        );
        Ok(summary)
    }

    async fn process(&mut self, article: &ArticleRecord) -> Result<RecordState, PipelineError> {
        let key = article.dedup_key();
        if self.store.contains(&key) {
            debug!(%key, "Already categorized; skipping");
            return Ok(RecordState::Skipped);
        }
        debug!(%key, title = %article.original_title, "Classifying");

        let classifier = self.classifier;
        let backoff = self.backoff;
        let scheduler = &mut self.scheduler;
        let attempt = async move {
            scheduler.pace().await;
            backoff
                .run_with_retry(|| classifier.classify(article))
                .await
        };

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                warn!(%key, "Shutdown requested; abandoning in-flight record");
                return Ok(RecordState::Abandoned);
            }
            result = attempt => result,
        };

        match result {
            Ok(retried) => {
                info!(
                    %key,
                    category = %retried.value.category,
                    retries = retried.retries,
                    waited = ?retried.waited,
                    "Categorized"
                );
                self.store
                    .add(AnnotatedRecord::new(article.clone(), retried.value))?;
                self.store.flush()?;
                Ok(RecordState::Succeeded)
            }
            Err(RetryError::Terminal { cause }) => {
                warn!(%key, error = %cause, "Classification failed; skipping record");
                Ok(RecordState::Failed)
            }
            Err(e @ RetryError::MaxRetriesExceeded { .. }) => {
                warn!(%key, error = %e, "Maximum retries reached; skipping record");
                Ok(RecordState::Failed)
            }
        }
    }
}

/// How many candidates a run would send to the classifier.
///
/// Counts each new key once, so repeated links in the feed are not
/// double-counted.
pub fn pending_count(store: &ResultStore, candidates: &[ArticleRecord]) -> usize {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .map(ArticleRecord::dedup_key)
        .filter(|key| !store.contains(key) && seen.insert(key.clone()))
        .count()
}
