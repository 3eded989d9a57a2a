//! Remote scoring engine backed by a text-completion service.
//!
//! Each pair costs one network call, so this engine runs with small chunks,
//! a long inter-chunk delay and a hard per-call timeout. Every failure mode
//! degrades to a zero score with a fallback explanation; nothing propagates
//! to the driver.

pub mod client;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

pub use client::{CompletionClient, CompletionError, OpenAiClient};

use super::engine::{CacheWriteMode, EngineTuning, MissingUserPolicy, ScoredPair, ScoringEngine};
use super::enrich::EnrichedCandidate;
use super::explanation::{MAX_SHARED_TAGS, MatchExplanation, MatchStrength, shared_tags};
use crate::data::models::Role;

pub const ALGORITHM_VERSION: &str = "llm_v1";

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

pub const MISSING_TEXT_SUMMARY: &str = "Not enough profile detail to evaluate this match";
pub const UNAVAILABLE_SUMMARY: &str = "Match analysis unavailable";

#[derive(Debug, Deserialize)]
struct Verdict {
    score: f64,
    #[serde(default)]
    reasoning: String,
}

/// Free-text fields the prompt needs, or `None` if either is missing.
///
/// The mentor side uses expertise, falling back to bio. The mentee side uses
/// the linked company description, falling back to bio.
fn prompt_inputs<'a>(
    source: &'a EnrichedCandidate,
    candidate: &'a EnrichedCandidate,
) -> Option<(&'a str, &'a str)> {
    let (mentor, mentee) = match (source.role(), candidate.role()) {
        (Role::Mentor, Role::Mentee) => (source, candidate),
        (Role::Mentee, Role::Mentor) => (candidate, source),
        _ => return None,
    };

    let mentor_text = non_blank(&mentor.profile.expertise).or(non_blank(&mentor.profile.bio))?;
    let mentee_text =
        non_blank(&mentee.profile.company_description).or(non_blank(&mentee.profile.bio))?;
    Some((mentor_text, mentee_text))
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn build_prompt(mentor_text: &str, mentee_text: &str) -> String {
    format!(
        "Rate how well this mentor could help this mentee on a scale of 0 to 100.\n\n\
         Mentor expertise:\n{mentor_text}\n\n\
         Mentee context:\n{mentee_text}\n\n\
         Reply with a single JSON object: {{\"score\": <0-100>, \"reasoning\": \"<one sentence>\"}}"
    )
}

/// Extract the verdict object from a completion, tolerating code fences and
/// surrounding prose.
fn parse_verdict(text: &str) -> Result<Verdict, CompletionError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(CompletionError::Malformed("no JSON object in completion".into())),
    };
    serde_json::from_str(json).map_err(|e| CompletionError::Malformed(e.to_string()))
}

/// Clamp into `[MIN_SCORE, MAX_SCORE]`. Non-finite values become the minimum.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(MIN_SCORE, MAX_SCORE)
    } else {
        MIN_SCORE
    }
}

fn fallback(summary: &str) -> ScoredPair {
    ScoredPair {
        score: 0.0,
        explanation: MatchExplanation::fallback(summary),
    }
}

pub struct LlmEngine {
    client: Arc<dyn CompletionClient>,
    timeout: Duration,
    tuning: EngineTuning,
}

impl LlmEngine {
    pub fn new(client: Arc<dyn CompletionClient>, timeout: Duration, tuning: EngineTuning) -> Self {
        Self {
            client,
            timeout,
            tuning,
        }
    }

    async fn request_verdict(&self, prompt: &str) -> Result<Verdict, CompletionError> {
        // Throttling is not part of the per-call time limit
        self.client.ready().await;
        let text = tokio::time::timeout(self.timeout, self.client.complete(prompt))
            .await
            .map_err(|_| CompletionError::Timeout)??;
        parse_verdict(&text)
    }
}

#[async_trait]
impl ScoringEngine for LlmEngine {
    fn algorithm_version(&self) -> &str {
        ALGORITHM_VERSION
    }

    fn tuning(&self) -> EngineTuning {
        self.tuning
    }

    fn write_mode(&self) -> CacheWriteMode {
        CacheWriteMode::UpsertPerChunk
    }

    fn missing_user_policy(&self) -> MissingUserPolicy {
        MissingUserPolicy::Ignore
    }

    fn requires_active_flag(&self) -> bool {
        false
    }

    async fn score(&self, source: &EnrichedCandidate, candidate: &EnrichedCandidate) -> ScoredPair {
        let Some((mentor_text, mentee_text)) = prompt_inputs(source, candidate) else {
            return fallback(MISSING_TEXT_SUMMARY);
        };

        let prompt = build_prompt(mentor_text, mentee_text);
        let verdict = match self.request_verdict(&prompt).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    source_user_id = source.id(),
                    candidate_user_id = candidate.id(),
                    error = %e,
                    "Remote scoring failed, using fallback"
                );
                return fallback(UNAVAILABLE_SUMMARY);
            }
        };

        let score = clamp_score(verdict.score);
        let strength = MatchStrength::from_score(score);
        let (shared, _) = shared_tags(&source.tags, &candidate.tags, MAX_SHARED_TAGS);
        let reasoning = verdict.reasoning.trim();
        let summary = if reasoning.is_empty() {
            strength.label().to_owned()
        } else {
            format!("{}: {reasoning}", strength.label())
        };

        ScoredPair {
            score,
            explanation: MatchExplanation {
                shared_tags: shared,
                strength,
                summary,
                ..MatchExplanation::default()
            },
        }
    }
}
