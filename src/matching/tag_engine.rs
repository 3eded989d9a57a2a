//! Deterministic tag/attribute scoring engine.
//!
//! Score out of 100, built from three terms that are summed unrounded and
//! rounded once at the end:
//!
//! | Term  | Points | Rule |
//! |-------|--------|------|
//! | tags  | 60     | Jaccard ratio of effective tag slugs |
//! | stage | 20     | closest stage pair: same 20, adjacent 10, else 0 |
//! | tier  | 20     | same reputation tier 20, neighbouring 10, else 0 |
//!
//! Missing stage or tier data scores 0 for that term.

use std::collections::HashSet;

use async_trait::async_trait;

use super::engine::{CacheWriteMode, EngineTuning, MissingUserPolicy, ScoredPair, ScoringEngine};
use super::enrich::EnrichedCandidate;
use super::explanation::{
    MAX_SHARED_TAGS, MatchExplanation, MatchStrength, ScoreBreakdown, shared_tags, summarize,
};
use crate::data::models::{ReputationTier, Stage, Tag};

pub const ALGORITHM_VERSION: &str = "tag_overlap_v1";

pub const TAG_POINTS: f64 = 60.0;
pub const STAGE_POINTS: f64 = 20.0;
pub const TIER_POINTS: f64 = 20.0;

/// Tag-overlap term: `|shared| / |union|` scaled to [`TAG_POINTS`].
///
/// Returns 0 when the union is empty.
pub fn overlap_score(a: &[Tag], b: &[Tag]) -> f64 {
    let a: HashSet<&str> = a.iter().map(|t| t.slug.as_str()).collect();
    let b: HashSet<&str> = b.iter().map(|t| t.slug.as_str()).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    shared as f64 / union as f64 * TAG_POINTS
}

/// Smallest distance between any stage of `a` and any stage of `b`.
fn closest_stage_distance(a: &[Stage], b: &[Stage]) -> Option<u8> {
    a.iter()
        .flat_map(|x| b.iter().map(move |y| x.distance(*y)))
        .min()
}

/// Full points for distance 0, half for distance 1, nothing otherwise.
fn proximity_points(distance: Option<u8>, full: f64) -> f64 {
    match distance {
        Some(0) => full,
        Some(1) => full / 2.0,
        _ => 0.0,
    }
}

fn tier_distance(a: Option<ReputationTier>, b: Option<ReputationTier>) -> Option<u8> {
    Some(a?.distance(b?))
}

/// Score a pair without going through the engine trait.
pub fn score_pair(a: &EnrichedCandidate, b: &EnrichedCandidate) -> ScoredPair {
    if a.tags.is_empty() && b.tags.is_empty() {
        return ScoredPair {
            score: 0.0,
            explanation: MatchExplanation::no_shared_tags(),
        };
    }

    let tag_points = overlap_score(&a.tags, &b.tags);

    let stage_distance = closest_stage_distance(&a.stages(), &b.stages());
    let stage_points = proximity_points(stage_distance, STAGE_POINTS);

    let tier = tier_distance(a.profile.reputation_tier, b.profile.reputation_tier);
    let tier_points = proximity_points(tier, TIER_POINTS);

    let score = (tag_points + stage_points + tier_points).round();
    let strength = MatchStrength::from_score(score);

    let (shared, total_shared) = shared_tags(&a.tags, &b.tags, MAX_SHARED_TAGS);

    let mut notes = Vec::new();
    match stage_distance {
        Some(0) => notes.push("same stage"),
        Some(1) => notes.push("adjacent stage"),
        _ => {}
    }
    match tier {
        Some(0) => notes.push("same reputation tier"),
        Some(1) => notes.push("neighbouring reputation tier"),
        _ => {}
    }

    ScoredPair {
        score,
        explanation: MatchExplanation {
            summary: summarize(strength, &shared, total_shared, &notes),
            shared_tags: shared,
            stage_compatible: stage_points > 0.0,
            tier_compatible: tier_points > 0.0,
            strength,
            breakdown: Some(ScoreBreakdown {
                tags: tag_points,
                stage: stage_points,
                tier: tier_points,
            }),
        },
    }
}

/// Default engine: pure, cheap, safe to run with wide chunks.
#[derive(Debug, Clone)]
pub struct TagEngine {
    tuning: EngineTuning,
}

impl TagEngine {
    pub fn new(tuning: EngineTuning) -> Self {
        Self { tuning }
    }
}

#[async_trait]
impl ScoringEngine for TagEngine {
    fn algorithm_version(&self) -> &str {
        ALGORITHM_VERSION
    }

    fn tuning(&self) -> EngineTuning {
        self.tuning
    }

    fn write_mode(&self) -> CacheWriteMode {
        CacheWriteMode::ReplacePerUser
    }

    fn missing_user_policy(&self) -> MissingUserPolicy {
        MissingUserPolicy::Fail
    }

    fn requires_active_flag(&self) -> bool {
        true
    }

    async fn score(&self, source: &EnrichedCandidate, candidate: &EnrichedCandidate) -> ScoredPair {
        score_pair(source, candidate)
    }
}
