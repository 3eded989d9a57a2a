//! Human-readable match explanations stored alongside each cached score.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::data::models::{Tag, TagCategory};

/// Maximum number of shared tags listed in an explanation.
pub const MAX_SHARED_TAGS: usize = 5;

/// Scores at or above this are labelled "Strong match".
pub const STRONG_MATCH_THRESHOLD: f64 = 70.0;

/// Scores at or above this (and below strong) are labelled "Moderate match".
pub const MODERATE_MATCH_THRESHOLD: f64 = 40.0;

/// Three-tier qualitative label derived from the numeric score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrength {
    Strong,
    Moderate,
    #[default]
    Weak,
}

impl MatchStrength {
    pub fn from_score(score: f64) -> Self {
        if score >= STRONG_MATCH_THRESHOLD {
            MatchStrength::Strong
        } else if score >= MODERATE_MATCH_THRESHOLD {
            MatchStrength::Moderate
        } else {
            MatchStrength::Weak
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MatchStrength::Strong => "Strong match",
            MatchStrength::Moderate => "Moderate match",
            MatchStrength::Weak => "Weak match",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedTag {
    pub slug: String,
    pub category: TagCategory,
}

/// Points contributed by each scoring term, before final rounding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub tags: f64,
    pub stage: f64,
    pub tier: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchExplanation {
    /// Up to [`MAX_SHARED_TAGS`] tags present on both sides, in the source
    /// user's tag order.
    pub shared_tags: Vec<SharedTag>,
    pub stage_compatible: bool,
    pub tier_compatible: bool,
    pub strength: MatchStrength,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,
}

impl MatchExplanation {
    /// Explanation for a pair with no tags on either side.
    pub fn no_shared_tags() -> Self {
        Self {
            summary: "No shared tags".to_owned(),
            ..Self::default()
        }
    }

    /// Explanation used when an engine could not produce a real score.
    pub fn fallback(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }
}

/// Tags of `a` whose slug also appears in `b`, in `a`'s order.
///
/// Returns the capped list and the uncapped count.
pub fn shared_tags(a: &[Tag], b: &[Tag], cap: usize) -> (Vec<SharedTag>, usize) {
    let other: HashSet<&str> = b.iter().map(|t| t.slug.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let matching: Vec<&Tag> = a
        .iter()
        .filter(|t| other.contains(t.slug.as_str()) && seen.insert(t.slug.as_str()))
        .collect();
    let total = matching.len();
    let listed = matching
        .into_iter()
        .take(cap)
        .map(|t| SharedTag {
            slug: t.slug.clone(),
            category: t.category,
        })
        .collect();
    (listed, total)
}

/// Build the one-line summary, e.g.
/// `Strong match: 3 shared tags (react, fintech, seed); same stage`.
pub fn summarize(
    strength: MatchStrength,
    shared: &[SharedTag],
    total_shared: usize,
    notes: &[&str],
) -> String {
    let mut summary = String::from(strength.label());
    summary.push_str(": ");

    if shared.is_empty() {
        summary.push_str("no shared tags");
    } else {
        let noun = if total_shared == 1 { "tag" } else { "tags" };
        let mut listed: Vec<&str> = shared.iter().map(|t| t.slug.as_str()).collect();
        let more = total_shared.saturating_sub(shared.len());
        let more_label = format!("+{more} more");
        if more > 0 {
            listed.push(&more_label);
        }
        summary.push_str(&format!("{total_shared} shared {noun} ({})", listed.join(", ")));
    }

    for note in notes {
        summary.push_str("; ");
        summary.push_str(note);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tech(slug: &str) -> Tag {
        Tag::new(slug, TagCategory::Technology)
    }

    #[test]
    fn test_strength_thresholds() {
        assert_eq!(MatchStrength::from_score(100.0), MatchStrength::Strong);
        assert_eq!(MatchStrength::from_score(70.0), MatchStrength::Strong);
        assert_eq!(MatchStrength::from_score(69.0), MatchStrength::Moderate);
        assert_eq!(MatchStrength::from_score(40.0), MatchStrength::Moderate);
        assert_eq!(MatchStrength::from_score(39.0), MatchStrength::Weak);
        assert_eq!(MatchStrength::from_score(0.0), MatchStrength::Weak);
    }

    #[test]
    fn test_shared_tags_follow_source_order_and_cap() {
        let a: Vec<Tag> = ["g", "f", "e", "d", "c", "b", "a"].map(tech).to_vec();
        let b: Vec<Tag> = ["a", "b", "c", "d", "e", "f", "g"].map(tech).to_vec();
        let (listed, total) = shared_tags(&a, &b, MAX_SHARED_TAGS);
        assert_eq!(total, 7);
        let slugs: Vec<&str> = listed.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(slugs, ["g", "f", "e", "d", "c"]);
    }

    #[test]
    fn test_shared_tags_keep_category() {
        let a = vec![Tag::new("fintech", TagCategory::Industry), tech("react")];
        let b = vec![tech("react"), Tag::new("fintech", TagCategory::Industry)];
        let (listed, _) = shared_tags(&a, &b, MAX_SHARED_TAGS);
        assert_eq!(listed[0].category, TagCategory::Industry);
        assert_eq!(listed[1].category, TagCategory::Technology);
    }

    #[test]
    fn test_summary_wording() {
        let shared = vec![SharedTag {
            slug: "react".into(),
            category: TagCategory::Technology,
        }];
        assert_eq!(
            summarize(MatchStrength::Moderate, &shared, 1, &["same stage"]),
            "Moderate match: 1 shared tag (react); same stage"
        );
        assert_eq!(
            summarize(MatchStrength::Weak, &[], 0, &[]),
            "Weak match: no shared tags"
        );
    }

    #[test]
    fn test_summary_mentions_overflow() {
        let shared: Vec<SharedTag> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|s| SharedTag {
                slug: s.to_string(),
                category: TagCategory::Technology,
            })
            .collect();
        let text = summarize(MatchStrength::Strong, &shared, 7, &[]);
        assert_eq!(text, "Strong match: 7 shared tags (a, b, c, d, e, +2 more)");
    }
}
