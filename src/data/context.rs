use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::models::{CompanyId, OwnedTag, ScoreCacheEntry, TagOwner, User, UserId, UserProfile};
use super::source::{EligibilityFilter, ProfileSource, ScoreCache};
use super::{score_cache, tags, users};
use crate::utils::log_if_slow;

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(500);

/// Postgres-backed store. Clone-cheap; wraps the shared pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProfileSource for PgStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        users::get_user(&self.pool, id).await
    }

    async fn list_eligible_users(&self, filter: &EligibilityFilter) -> Result<Vec<UserId>> {
        let start = Instant::now();
        let ids = users::list_eligible(&self.pool, filter).await;
        log_if_slow(start, SLOW_QUERY_THRESHOLD, "users::list_eligible");
        ids
    }

    async fn list_recalculation_targets(&self, limit: Option<i64>) -> Result<Vec<UserId>> {
        users::list_recalculation_targets(&self.pool, limit).await
    }

    async fn fetch_profiles(&self, ids: &[UserId]) -> Result<Vec<UserProfile>> {
        let start = Instant::now();
        let profiles = users::fetch_profiles(&self.pool, ids).await;
        log_if_slow(start, SLOW_QUERY_THRESHOLD, "users::fetch_profiles");
        profiles
    }

    async fn fetch_tags(&self, owner: TagOwner, owner_ids: &[i64]) -> Result<Vec<OwnedTag>> {
        let start = Instant::now();
        let rows = tags::fetch_for_owners(&self.pool, owner, owner_ids).await;
        log_if_slow(start, SLOW_QUERY_THRESHOLD, "tags::fetch_for_owners");
        rows
    }

    async fn list_linked_mentees(&self, company_id: CompanyId) -> Result<Vec<UserId>> {
        users::list_linked_mentees(&self.pool, company_id).await
    }
}

#[async_trait]
impl ScoreCache for PgStore {
    async fn replace(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        entries: &[ScoreCacheEntry],
    ) -> Result<()> {
        let start = Instant::now();
        let result = score_cache::replace(&self.pool, user_id, algorithm_version, entries).await;
        log_if_slow(start, SLOW_QUERY_THRESHOLD, "score_cache::replace");
        result
    }

    async fn upsert(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        entries: &[ScoreCacheEntry],
    ) -> Result<()> {
        score_cache::upsert(&self.pool, user_id, algorithm_version, entries).await
    }

    async fn retain(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        keep: &[UserId],
    ) -> Result<u64> {
        score_cache::retain(&self.pool, user_id, algorithm_version, keep).await
    }

    async fn top_matches(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        limit: i64,
        min_score: Option<f64>,
    ) -> Result<Vec<ScoreCacheEntry>> {
        score_cache::top_matches(&self.pool, user_id, algorithm_version, limit, min_score).await
    }
}
