//! Recalculation driver: selects, enriches, scores and caches.
//!
//! [`RecalcDriver::recalculate_one`] handles a single user in fixed-size
//! chunks with bounded concurrency per chunk and a delay between chunks.
//! [`RecalcDriver::recalculate_all`] walks every target user in batches,
//! running each batch concurrently on a [`JoinSet`] so that one user's
//! failure (or panic) never reaches its siblings.
//!
//! Cancellation is observed between chunks and between batches only. A cache
//! write that has started always runs to completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::MatchingConfig;
use super::engine::{CacheWriteMode, EngineTuning, MissingUserPolicy, ScoringEngine};
use super::enrich::{EnrichedCandidate, enrich_many};
use super::error::RecalcError;
use super::observer::{RecalcObserver, TracingObserver};
use super::selector;
use crate::data::models::{ScoreCacheEntry, UserId};
use crate::data::source::{ProfileSource, ScoreCache};

/// Per-call overrides for a single-user run. `None` uses the engine default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalculateOptions {
    pub chunk_size: Option<usize>,
    pub chunk_delay: Option<Duration>,
    pub missing_user: Option<MissingUserPolicy>,
}

impl RecalculateOptions {
    /// Options used by invalidation triggers: a missing user is never an error.
    pub fn for_trigger() -> Self {
        Self {
            missing_user: Some(MissingUserPolicy::Ignore),
            ..Self::default()
        }
    }
}

/// Overrides for an all-users run. `None` uses the driver configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalculateAllOptions {
    pub limit: Option<i64>,
    pub batch_size: Option<usize>,
    pub batch_delay: Option<Duration>,
    pub per_user: RecalculateOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UserNotFound,
    /// The user's role is never matched (coordinators).
    NotScorable,
    /// Candidate selection or enrichment failed; the cache was left as is.
    UpstreamUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcOutcome {
    Completed { candidates: usize, written: usize },
    Skipped(SkipReason),
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecalcSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub batches: usize,
    pub cancelled: bool,
}

/// Drives one scoring engine against one store.
pub struct RecalcDriver<S> {
    store: Arc<S>,
    engine: Arc<dyn ScoringEngine>,
    observer: Arc<dyn RecalcObserver>,
    cancel: CancellationToken,
    dormancy_window: Duration,
    batch_size: usize,
    batch_delay: Duration,
}

impl<S> Clone for RecalcDriver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            engine: Arc::clone(&self.engine),
            observer: Arc::clone(&self.observer),
            cancel: self.cancel.clone(),
            dormancy_window: self.dormancy_window,
            batch_size: self.batch_size,
            batch_delay: self.batch_delay,
        }
    }
}

impl<S> RecalcDriver<S>
where
    S: ProfileSource + ScoreCache + 'static,
{
    pub fn new(store: Arc<S>, engine: Arc<dyn ScoringEngine>, config: &MatchingConfig) -> Self {
        Self {
            store,
            engine,
            observer: Arc::new(TracingObserver),
            cancel: CancellationToken::new(),
            dormancy_window: config.dormancy_window,
            batch_size: config.batch_size,
            batch_delay: config.batch_delay,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RecalcObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Share a cancellation token; cancelling it stops new work from starting.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn algorithm_version(&self) -> &str {
        self.engine.algorithm_version()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn effective_tuning(&self, options: &RecalculateOptions) -> EngineTuning {
        let defaults = self.engine.tuning();
        EngineTuning {
            chunk_size: options.chunk_size.unwrap_or(defaults.chunk_size).max(1),
            chunk_delay: options.chunk_delay.unwrap_or(defaults.chunk_delay),
        }
    }

    /// Sleep for `delay`, returning `false` if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if delay.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Recompute and cache every score for `user_id`.
    ///
    /// Returns `Err` only for cache write failures and, under
    /// [`MissingUserPolicy::Fail`], for a missing user. Store read failures
    /// are reported to the observer and surface as
    /// [`SkipReason::UpstreamUnavailable`]. A soft-deleted user has its own
    /// cached rows removed and is then treated as missing.
    #[instrument(skip_all, fields(user_id = user_id, engine = self.engine.algorithm_version()))]
    pub async fn recalculate_one(
        &self,
        user_id: UserId,
        options: &RecalculateOptions,
    ) -> Result<RecalcOutcome, RecalcError> {
        let start = Instant::now();
        let result = self.run_one(user_id, options).await;
        match &result {
            Ok(outcome) => self
                .observer
                .user_finished(user_id, outcome, start.elapsed()),
            Err(e) => self.observer.user_failed(user_id, e),
        }
        result
    }

    async fn run_one(
        &self,
        user_id: UserId,
        options: &RecalculateOptions,
    ) -> Result<RecalcOutcome, RecalcError> {
        if self.cancel.is_cancelled() {
            return Ok(RecalcOutcome::Cancelled);
        }

        let policy = options
            .missing_user
            .unwrap_or_else(|| self.engine.missing_user_policy());
        let not_found = || match policy {
            MissingUserPolicy::Fail => Err(RecalcError::UserNotFound(user_id)),
            MissingUserPolicy::Ignore => Ok(RecalcOutcome::Skipped(SkipReason::UserNotFound)),
        };

        let user = match self.store.get_user(user_id).await {
            Ok(Some(user)) if user.is_soft_deleted() => {
                self.clear_cache(user_id).await?;
                return not_found();
            }
            Ok(Some(user)) => user,
            Ok(None) => return not_found(),
            Err(e) => return Ok(self.upstream_unavailable(user_id, e)),
        };

        if user.role.opposite().is_none() {
            return Ok(RecalcOutcome::Skipped(SkipReason::NotScorable));
        }

        let candidate_ids = match selector::candidates(
            self.store.as_ref(),
            &user,
            self.dormancy_window,
            self.engine.requires_active_flag(),
        )
        .await
        {
            Ok(ids) => ids,
            Err(e) => return Ok(self.upstream_unavailable(user_id, e)),
        };

        // Source and candidates are enriched together to keep the query count fixed
        let mut ids = Vec::with_capacity(candidate_ids.len() + 1);
        ids.push(user_id);
        ids.extend_from_slice(&candidate_ids);
        let mut enriched = match enrich_many(self.store.as_ref(), &ids).await {
            Ok(enriched) => enriched,
            Err(e) => return Ok(self.upstream_unavailable(user_id, e)),
        };

        let source = match enriched.iter().position(|c| c.id() == user_id) {
            Some(index) => enriched.swap_remove(index),
            None => return not_found(),
        };

        self.score_and_write(&source, &enriched, self.effective_tuning(options))
            .await
    }

    /// Drop every row this engine cached for a user that no longer exists.
    async fn clear_cache(&self, user_id: UserId) -> Result<(), RecalcError> {
        self.store
            .replace(user_id, self.engine.algorithm_version(), &[])
            .await
            .map_err(|source| RecalcError::CacheWrite { user_id, source })
    }

    fn upstream_unavailable(&self, user_id: UserId, source: anyhow::Error) -> RecalcOutcome {
        self.observer
            .user_failed(user_id, &RecalcError::Upstream { user_id, source });
        RecalcOutcome::Skipped(SkipReason::UpstreamUnavailable)
    }

    async fn score_and_write(
        &self,
        source: &EnrichedCandidate,
        candidates: &[EnrichedCandidate],
        tuning: EngineTuning,
    ) -> Result<RecalcOutcome, RecalcError> {
        let user_id = source.id();
        let version = self.engine.algorithm_version();
        let mode = self.engine.write_mode();
        let calculated_at = Utc::now();

        let chunks: Vec<&[EnrichedCandidate]> = candidates.chunks(tuning.chunk_size).collect();
        let mut accumulated: Vec<ScoreCacheEntry> = Vec::with_capacity(candidates.len());
        let mut written = 0;

        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 && !self.pause(tuning.chunk_delay).await {
                return Ok(RecalcOutcome::Cancelled);
            }

            // Futures are created up front; a chunk never exceeds chunk_size
            let scored: Vec<ScoreCacheEntry> = join_all(chunk.iter().map(|candidate| {
                let pending = self.engine.score(source, candidate);
                let recommended_user_id = candidate.id();
                let algorithm_version = version.to_owned();
                async move {
                    let pair = pending.await;
                    ScoreCacheEntry {
                        source_user_id: user_id,
                        recommended_user_id,
                        score: pair.score,
                        explanation: pair.explanation,
                        algorithm_version,
                        calculated_at,
                    }
                }
            }))
            .await;

            self.observer
                .chunk_scored(user_id, index + 1, chunks.len(), scored.len());

            match mode {
                CacheWriteMode::ReplacePerUser => accumulated.extend(scored),
                CacheWriteMode::UpsertPerChunk => {
                    self.store
                        .upsert(user_id, version, &scored)
                        .await
                        .map_err(|source| RecalcError::CacheWrite { user_id, source })?;
                    written += scored.len();
                }
            }
        }

        match mode {
            CacheWriteMode::ReplacePerUser => {
                self.store
                    .replace(user_id, version, &accumulated)
                    .await
                    .map_err(|source| RecalcError::CacheWrite { user_id, source })?;
                written = accumulated.len();
            }
            CacheWriteMode::UpsertPerChunk => {
                let keep: Vec<UserId> = candidates.iter().map(EnrichedCandidate::id).collect();
                self.store
                    .retain(user_id, version, &keep)
                    .await
                    .map_err(|source| RecalcError::CacheWrite { user_id, source })?;
            }
        }

        Ok(RecalcOutcome::Completed {
            candidates: candidates.len(),
            written,
        })
    }

    /// Recalculate every mentor and mentee, batch by batch.
    ///
    /// Only a failure to list the targets is returned as an error; per-user
    /// failures are counted in the summary.
    #[instrument(skip_all, fields(engine = self.engine.algorithm_version()))]
    pub async fn recalculate_all(&self, options: &RecalculateAllOptions) -> Result<RecalcSummary> {
        let start = Instant::now();
        let targets = self
            .store
            .list_recalculation_targets(options.limit)
            .await
            .context("failed to list recalculation targets")?;

        let batch_size = options.batch_size.unwrap_or(self.batch_size).max(1);
        let batch_delay = options.batch_delay.unwrap_or(self.batch_delay);
        let batches: Vec<&[UserId]> = targets.chunks(batch_size).collect();

        let mut summary = RecalcSummary {
            total: targets.len(),
            ..RecalcSummary::default()
        };

        for (index, batch) in batches.iter().enumerate() {
            let proceed = if index == 0 {
                !self.cancel.is_cancelled()
            } else {
                self.pause(batch_delay).await
            };
            if !proceed {
                summary.cancelled = true;
                break;
            }

            let (succeeded, failed) = self.run_batch(batch, &options.per_user, &mut summary).await;
            summary.batches += 1;
            self.observer
                .batch_finished(index + 1, batches.len(), succeeded, failed);
        }

        self.observer.run_finished(&summary, start.elapsed());
        Ok(summary)
    }

    /// Run one batch concurrently. Returns this batch's (succeeded, failed).
    async fn run_batch(
        &self,
        batch: &[UserId],
        per_user: &RecalculateOptions,
        summary: &mut RecalcSummary,
    ) -> (usize, usize) {
        let mut set = JoinSet::new();
        let mut task_users = HashMap::with_capacity(batch.len());
        for &user_id in batch {
            let driver = self.clone();
            let options = *per_user;
            let handle = set.spawn(async move { driver.recalculate_one(user_id, &options).await });
            task_users.insert(handle.id(), user_id);
        }

        let (mut succeeded, mut failed) = (0, 0);
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, Ok(RecalcOutcome::Completed { .. }))) => succeeded += 1,
                Ok((_, Ok(RecalcOutcome::Skipped(SkipReason::UpstreamUnavailable)))) => failed += 1,
                Ok((_, Ok(RecalcOutcome::Skipped(_)))) => summary.skipped += 1,
                Ok((_, Ok(RecalcOutcome::Cancelled))) => summary.cancelled = true,
                Ok((_, Err(RecalcError::UserNotFound(_)))) => summary.skipped += 1,
                Ok((_, Err(_))) => failed += 1,
                Err(join_error) => {
                    failed += 1;
                    if let Some(&user_id) = task_users.get(&join_error.id()) {
                        self.observer.user_panicked(user_id, &join_error.to_string());
                    }
                }
            }
        }

        summary.succeeded += succeeded;
        summary.failed += failed;
        (succeeded, failed)
    }
}
