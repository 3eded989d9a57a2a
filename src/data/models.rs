//! Domain records read from the profile store and written to the score cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matching::explanation::MatchExplanation;

pub type UserId = i64;
pub type CompanyId = i64;

/// Platform role. Mentors and mentees are scored against each other;
/// coordinators never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mentor,
    Mentee,
    Coordinator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Mentor => "mentor",
            Role::Mentee => "mentee",
            Role::Coordinator => "coordinator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mentor" => Some(Role::Mentor),
            "mentee" => Some(Role::Mentee),
            "coordinator" => Some(Role::Coordinator),
            _ => None,
        }
    }

    /// The role this role is matched against, if any.
    pub fn opposite(self) -> Option<Self> {
        match self {
            Role::Mentor => Some(Role::Mentee),
            Role::Mentee => Some(Role::Mentor),
            Role::Coordinator => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagCategory {
    Industry,
    Technology,
    Stage,
}

impl TagCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TagCategory::Industry => "industry",
            TagCategory::Technology => "technology",
            TagCategory::Stage => "stage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "industry" => Some(TagCategory::Industry),
            "technology" => Some(TagCategory::Technology),
            "stage" => Some(TagCategory::Stage),
            _ => None,
        }
    }
}

/// A `(slug, category)` pair. Slugs are unique across categories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub slug: String,
    pub category: TagCategory,
}

impl Tag {
    pub fn new(slug: impl Into<String>, category: TagCategory) -> Self {
        Self {
            slug: slug.into(),
            category,
        }
    }
}

/// Which kind of entity a tag assignment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagOwner {
    User,
    PortfolioCompany,
}

impl TagOwner {
    pub fn as_str(self) -> &'static str {
        match self {
            TagOwner::User => "user",
            TagOwner::PortfolioCompany => "portfolio_company",
        }
    }
}

/// A tag assignment as returned by the bulk tag fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedTag {
    pub owner_id: i64,
    pub tag: Tag,
}

/// Company lifecycle stage, ordered from earliest to latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Idea,
    PreSeed,
    Seed,
    SeriesA,
    SeriesB,
    Growth,
}

impl Stage {
    /// Parse a stage from a tag slug or free-form column value.
    ///
    /// Accepts `series-a`, `Series A`, `series_a` alike.
    pub fn from_slug(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();
        match normalized.as_str() {
            "idea" | "ideation" => Some(Stage::Idea),
            "pre-seed" | "preseed" => Some(Stage::PreSeed),
            "seed" => Some(Stage::Seed),
            "series-a" => Some(Stage::SeriesA),
            "series-b" => Some(Stage::SeriesB),
            "growth" | "series-c" | "series-c+" | "late" => Some(Stage::Growth),
            _ => None,
        }
    }

    pub fn distance(self, other: Stage) -> u8 {
        (self as u8).abs_diff(other as u8)
    }
}

/// Reputation tier maintained by the reputation subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl ReputationTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bronze" => Some(ReputationTier::Bronze),
            "silver" => Some(ReputationTier::Silver),
            "gold" => Some(ReputationTier::Gold),
            "platinum" => Some(ReputationTier::Platinum),
            _ => None,
        }
    }

    pub fn distance(self, other: ReputationTier) -> u8 {
        (self as u8).abs_diff(other as u8)
    }
}

/// Identity, role and activity metadata for a platform user.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub role: Role,
    pub is_active: bool,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A user plus the role-specific attributes the scoring engines consume.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user: User,
    pub reputation_tier: Option<ReputationTier>,
    pub company_id: Option<CompanyId>,
    pub company_stage: Option<Stage>,
    pub company_description: Option<String>,
    pub bio: Option<String>,
    pub expertise: Option<String>,
}

impl UserProfile {
    /// A bare profile with no optional attributes.
    pub fn new(user: User) -> Self {
        Self {
            user,
            reputation_tier: None,
            company_id: None,
            company_stage: None,
            company_description: None,
            bio: None,
            expertise: None,
        }
    }
}

/// One cached recommendation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCacheEntry {
    pub source_user_id: UserId,
    pub recommended_user_id: UserId,
    pub score: f64,
    pub explanation: MatchExplanation,
    pub algorithm_version: String,
    pub calculated_at: DateTime<Utc>,
}
