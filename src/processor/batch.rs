use super::{SheetProcessor, SheetSubmission};
use crate::budget::CancellationToken;
use crate::result::SheetResult;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Called once per finished sheet, from worker threads, in completion order.
pub trait BatchProgress: Send + Sync {
    /// Return `false` to cancel every sheet that has not finished yet.
    fn on_sheet_done(&self, index: usize, result: &SheetResult, completed: usize, total: usize)
        -> bool;
}

pub struct NoProgress;

impl BatchProgress for NoProgress {
    fn on_sheet_done(&self, _: usize, _: &SheetResult, _: usize, _: usize) -> bool {
        true
    }
}

impl<F> BatchProgress for F
where
    F: Fn(usize, &SheetResult, usize, usize) -> bool + Send + Sync,
{
    fn on_sheet_done(&self, index: usize, result: &SheetResult, completed: usize, total: usize) -> bool {
        self(index, result, completed, total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Failed over attempted; cancelled sheets are not attempts.
    pub error_rate: f64,
    pub max_error_rate: f64,
    pub error_rate_exceeded: bool,
    pub elapsed_seconds: f64,
}

impl BatchStats {
    pub fn from_results(results: &[SheetResult], max_error_rate: f64, elapsed_seconds: f64) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let cancelled = results.iter().filter(|r| r.is_cancelled()).count();
        let failed = results.len() - succeeded - cancelled;
        let attempted = results.len() - cancelled;
        let error_rate = if attempted == 0 {
            0.0
        } else {
            failed as f64 / attempted as f64
        };
        Self {
            total: results.len(),
            succeeded,
            failed,
            cancelled,
            error_rate,
            max_error_rate,
            error_rate_exceeded: error_rate > max_error_rate,
            elapsed_seconds,
        }
    }
}

/// Results in input order plus the batch totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<SheetResult>,
    pub stats: BatchStats,
}

impl SheetProcessor {
    /// One result per item, in input order. A failing item never affects its siblings.
    pub fn process_batch(&self, items: &[SheetSubmission]) -> Vec<SheetResult> {
        self.process_batch_with(items, &CancellationToken::new(), NoProgress)
            .results
    }

    pub fn process_batch_with<P: BatchProgress>(
        &self,
        items: &[SheetSubmission],
        token: &CancellationToken,
        progress: P,
    ) -> BatchReport {
        let started = Instant::now();
        let total = items.len();
        let completed = AtomicUsize::new(0);
        info!(
            "🚀 Processing batch of {} sheets on {} workers",
            total,
            self.pool.current_num_threads()
        );

        // Unstarted sheets see the cancelled token at their first checkpoint.
        let results: Vec<SheetResult> = self.pool.install(|| {
            items
                .par_iter()
                .enumerate()
                .map(|(index, item)| {
                    let result = self.process_with_token(item, token);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if !progress.on_sheet_done(index, &result, done, total) {
                        token.cancel();
                    }
                    result
                })
                .collect()
        });

        let stats = BatchStats::from_results(
            &results,
            self.config.processing.max_error_rate,
            started.elapsed().as_secs_f64(),
        );
        if stats.error_rate_exceeded {
            warn!(
                "⚠️  Batch error rate {:.2}% exceeds the {:.2}% tolerance ({} of {} sheets failed)",
                stats.error_rate * 100.0,
                stats.max_error_rate * 100.0,
                stats.failed,
                stats.total - stats.cancelled
            );
        }
        info!(
            "✅ Batch done in {:.2}s: {} succeeded, {} failed, {} cancelled",
            stats.elapsed_seconds, stats.succeeded, stats.failed, stats.cancelled
        );
        BatchReport { results, stats }
    }
}
