//! Store contracts consumed by the match pipeline.
//!
//! [`ProfileSource`] is the read-only bulk-fetch surface of the surrounding
//! CRUD system; [`ScoreCache`] owns the precomputed score keyspace. Both are
//! implemented by [`PgStore`](super::PgStore) and, for tests and dry runs,
//! by [`MemoryStore`](super::memory::MemoryStore).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{CompanyId, OwnedTag, Role, ScoreCacheEntry, TagOwner, User, UserId, UserProfile};

/// Candidate-pool predicate pushed down to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityFilter {
    pub role: Role,
    pub exclude_id: UserId,
    /// Users whose last activity is older than this (or absent) are dormant.
    pub dormancy_cutoff: DateTime<Utc>,
    /// Additionally require the explicit `is_active` flag.
    pub require_active: bool,
}

impl EligibilityFilter {
    /// Evaluate the filter against a single user record.
    ///
    /// Stores that cannot push the predicate into a query use this directly.
    pub fn admits(&self, user: &User) -> bool {
        if user.role != self.role || user.id == self.exclude_id || user.is_soft_deleted() {
            return false;
        }
        if self.require_active && !user.is_active {
            return false;
        }
        // No recorded activity counts as dormant
        user.last_activity_at
            .is_some_and(|at| at >= self.dormancy_cutoff)
    }
}

/// Read-only access to users, profiles and tag assignments.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    /// Ids of users admitted by `filter`, ordered by id.
    async fn list_eligible_users(&self, filter: &EligibilityFilter) -> Result<Vec<UserId>>;

    /// Mentors and mentees that are not soft-deleted, ordered by id.
    async fn list_recalculation_targets(&self, limit: Option<i64>) -> Result<Vec<UserId>>;

    /// Base user + profile rows, one query regardless of `ids.len()`.
    async fn fetch_profiles(&self, ids: &[UserId]) -> Result<Vec<UserProfile>>;

    /// All tag assignments for the given owners, one query regardless of
    /// `owner_ids.len()`. Rows are ordered by owner, then assignment order.
    async fn fetch_tags(&self, owner: TagOwner, owner_ids: &[i64]) -> Result<Vec<OwnedTag>>;

    /// Mentees linked to a portfolio company (for company-tag invalidation).
    async fn list_linked_mentees(&self, company_id: CompanyId) -> Result<Vec<UserId>>;
}

/// The precomputed score keyspace, partitioned by `(user, algorithm_version)`.
///
/// Every write for a key is atomic from a reader's point of view, and writes
/// for the same key never interleave.
#[async_trait]
pub trait ScoreCache: Send + Sync {
    /// Delete all rows for the key, then insert `entries`, as one unit.
    async fn replace(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        entries: &[ScoreCacheEntry],
    ) -> Result<()>;

    /// Insert or overwrite the given rows for the key, leaving others intact.
    async fn upsert(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        entries: &[ScoreCacheEntry],
    ) -> Result<()>;

    /// Delete rows for the key whose recommended user is not in `keep`.
    /// Returns the number of rows removed.
    async fn retain(&self, user_id: UserId, algorithm_version: &str, keep: &[UserId])
    -> Result<u64>;

    /// Top rows for the key ordered by score descending.
    async fn top_matches(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        limit: i64,
        min_score: Option<f64>,
    ) -> Result<Vec<ScoreCacheEntry>>;
}
