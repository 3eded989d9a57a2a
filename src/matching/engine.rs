//! The pluggable scoring-engine contract consumed by the driver.

use std::time::Duration;

use async_trait::async_trait;

use super::enrich::EnrichedCandidate;
use super::explanation::MatchExplanation;

/// Score and explanation for one ordered pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPair {
    pub score: f64,
    pub explanation: MatchExplanation,
}

/// Chunking parameters for a single-user recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTuning {
    /// Candidates per chunk; also the bound on concurrent scoring calls.
    pub chunk_size: usize,
    /// Sleep between chunks. Not applied after the last chunk.
    pub chunk_delay: Duration,
}

/// How a single-user run persists its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWriteMode {
    /// Accumulate every chunk, then one atomic replace for the user.
    ReplacePerUser,
    /// Upsert after each chunk, then drop rows outside the candidate set.
    UpsertPerChunk,
}

/// What a direct `recalculate_one` call does when the user does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingUserPolicy {
    /// Return [`RecalcError::UserNotFound`](super::error::RecalcError::UserNotFound).
    Fail,
    /// Return a skipped outcome without error.
    Ignore,
}

#[async_trait]
pub trait ScoringEngine: Send + Sync {
    /// Tag written to every cache row this engine produces.
    fn algorithm_version(&self) -> &str;

    fn tuning(&self) -> EngineTuning;

    fn write_mode(&self) -> CacheWriteMode;

    fn missing_user_policy(&self) -> MissingUserPolicy;

    /// Whether candidate pools must also satisfy the explicit `is_active` flag.
    fn requires_active_flag(&self) -> bool;

    /// Score `source` against `candidate`.
    ///
    /// Never fails: engines that depend on fallible I/O degrade to a zero
    /// score with a fallback explanation.
    async fn score(&self, source: &EnrichedCandidate, candidate: &EnrichedCandidate) -> ScoredPair;
}
