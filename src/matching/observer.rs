//! Progress reporting for the recalculation driver.
//!
//! The driver never logs directly; it reports through a [`RecalcObserver`]
//! so tests can capture events and the binary can route them to tracing.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::driver::{RecalcOutcome, RecalcSummary};
use super::error::RecalcError;
use crate::data::models::UserId;
use crate::utils::fmt_duration;

#[allow(unused_variables)]
pub trait RecalcObserver: Send + Sync {
    fn chunk_scored(&self, user_id: UserId, chunk: usize, chunks: usize, scored: usize) {}

    fn user_finished(&self, user_id: UserId, outcome: &RecalcOutcome, elapsed: Duration) {}

    fn user_failed(&self, user_id: UserId, error: &RecalcError) {}

    /// The per-user task panicked; counted as a failure.
    fn user_panicked(&self, user_id: UserId, message: &str) {}

    fn batch_finished(&self, batch: usize, batches: usize, succeeded: usize, failed: usize) {}

    fn run_finished(&self, summary: &RecalcSummary, elapsed: Duration) {}
}

/// Default observer: emits tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RecalcObserver for TracingObserver {
    fn chunk_scored(&self, user_id: UserId, chunk: usize, chunks: usize, scored: usize) {
        debug!(user_id, chunk, chunks, scored, "Chunk scored");
    }

    fn user_finished(&self, user_id: UserId, outcome: &RecalcOutcome, elapsed: Duration) {
        match outcome {
            RecalcOutcome::Completed { candidates, written } => debug!(
                user_id,
                candidates,
                written,
                duration = fmt_duration(elapsed),
                "Recalculated user"
            ),
            RecalcOutcome::Skipped(reason) => {
                debug!(user_id, reason = ?reason, "Skipped user")
            }
            RecalcOutcome::Cancelled => info!(user_id, "Recalculation cancelled"),
        }
    }

    fn user_failed(&self, user_id: UserId, error: &RecalcError) {
        // Previous rows are still served after a failed write
        if error.is_cache_write() {
            error!(user_id, error = ?error, "Cache write failed, keeping previous scores");
        } else {
            warn!(user_id, error = ?error, "Recalculation failed");
        }
    }

    fn user_panicked(&self, user_id: UserId, message: &str) {
        error!(user_id, message, "Recalculation task panicked");
    }

    fn batch_finished(&self, batch: usize, batches: usize, succeeded: usize, failed: usize) {
        info!(batch, batches, succeeded, failed, "Batch complete");
    }

    fn run_finished(&self, summary: &RecalcSummary, elapsed: Duration) {
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            batches = summary.batches,
            cancelled = summary.cancelled,
            duration = fmt_duration(elapsed),
            "Recalculation run finished"
        );
    }
}
