//! In-process store for tests and local experimentation.
//!
//! Implements both store contracts over plain collections, counts every
//! "query" so callers can assert on round-trip bounds, records every cache
//! write, and can be told to fail specific users' reads or writes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;

use super::models::{
    CompanyId, OwnedTag, Role, ScoreCacheEntry, Tag, TagOwner, User, UserId, UserProfile,
};
use super::source::{EligibilityFilter, ProfileSource, ScoreCache};

/// Snapshot of how many store calls were issued, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCounts {
    pub get_user: usize,
    pub eligible: usize,
    pub profiles: usize,
    pub user_tags: usize,
    pub company_tags: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Replace,
    Upsert,
    Retain,
}

/// One recorded cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub user_id: UserId,
    pub algorithm_version: String,
    pub kind: WriteKind,
    pub rows: usize,
}

#[derive(Default)]
struct Counters {
    get_user: AtomicUsize,
    eligible: AtomicUsize,
    profiles: AtomicUsize,
    user_tags: AtomicUsize,
    company_tags: AtomicUsize,
}

#[derive(Default)]
pub struct MemoryStore {
    profiles: Mutex<BTreeMap<UserId, UserProfile>>,
    tags: Mutex<Vec<(TagOwner, i64, Tag)>>,
    cache: DashMap<(UserId, String), Vec<ScoreCacheEntry>>,
    writes: Mutex<Vec<WriteRecord>>,
    counters: Counters,
    failing_reads: Mutex<HashSet<UserId>>,
    failing_writes: Mutex<HashSet<UserId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&self, profile: UserProfile) {
        lock(&self.profiles).insert(profile.user.id, profile);
    }

    /// Assign a personal tag; assignment order is preserved.
    pub fn tag_user(&self, user_id: UserId, tag: Tag) {
        lock(&self.tags).push((TagOwner::User, user_id, tag));
    }

    pub fn tag_company(&self, company_id: CompanyId, tag: Tag) {
        lock(&self.tags).push((TagOwner::PortfolioCompany, company_id, tag));
    }

    /// Make candidate lookups issued on behalf of `user_id` fail.
    pub fn fail_reads_for(&self, user_id: UserId) {
        lock(&self.failing_reads).insert(user_id);
    }

    /// Make cache writes for `user_id` fail.
    pub fn fail_writes_for(&self, user_id: UserId) {
        lock(&self.failing_writes).insert(user_id);
    }

    /// Seed cache rows directly, bypassing write accounting.
    pub fn seed_cache(&self, user_id: UserId, algorithm_version: &str, entries: Vec<ScoreCacheEntry>) {
        self.cache
            .insert((user_id, algorithm_version.to_owned()), entries);
    }

    /// Current rows for a key, in insertion order.
    pub fn cached(&self, user_id: UserId, algorithm_version: &str) -> Vec<ScoreCacheEntry> {
        self.cache
            .get(&(user_id, algorithm_version.to_owned()))
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    pub fn query_counts(&self) -> QueryCounts {
        let c = &self.counters;
        QueryCounts {
            get_user: c.get_user.load(Ordering::Relaxed),
            eligible: c.eligible.load(Ordering::Relaxed),
            profiles: c.profiles.load(Ordering::Relaxed),
            user_tags: c.user_tags.load(Ordering::Relaxed),
            company_tags: c.company_tags.load(Ordering::Relaxed),
        }
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.writes).clone()
    }

    fn record_write(&self, user_id: UserId, algorithm_version: &str, kind: WriteKind, rows: usize) {
        lock(&self.writes).push(WriteRecord {
            user_id,
            algorithm_version: algorithm_version.to_owned(),
            kind,
            rows,
        });
    }

    fn check_write(&self, user_id: UserId) -> Result<()> {
        if lock(&self.failing_writes).contains(&user_id) {
            bail!("injected cache write failure for user {user_id}");
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A poisoned test store is still readable
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ProfileSource for MemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.counters.get_user.fetch_add(1, Ordering::Relaxed);
        Ok(lock(&self.profiles).get(&id).map(|p| p.user.clone()))
    }

    async fn list_eligible_users(&self, filter: &EligibilityFilter) -> Result<Vec<UserId>> {
        self.counters.eligible.fetch_add(1, Ordering::Relaxed);
        if lock(&self.failing_reads).contains(&filter.exclude_id) {
            bail!("injected candidate fetch failure for user {}", filter.exclude_id);
        }
        Ok(lock(&self.profiles)
            .values()
            .filter(|p| filter.admits(&p.user))
            .map(|p| p.user.id)
            .collect())
    }

    async fn list_recalculation_targets(&self, limit: Option<i64>) -> Result<Vec<UserId>> {
        let cap = limit.map_or(usize::MAX, |l| usize::try_from(l.max(0)).unwrap_or(usize::MAX));
        Ok(lock(&self.profiles)
            .values()
            .filter(|p| matches!(p.user.role, Role::Mentor | Role::Mentee))
            .filter(|p| !p.user.is_soft_deleted())
            .map(|p| p.user.id)
            .take(cap)
            .collect())
    }

    async fn fetch_profiles(&self, ids: &[UserId]) -> Result<Vec<UserProfile>> {
        self.counters.profiles.fetch_add(1, Ordering::Relaxed);
        let profiles = lock(&self.profiles);
        Ok(ids.iter().filter_map(|id| profiles.get(id).cloned()).collect())
    }

    async fn fetch_tags(&self, owner: TagOwner, owner_ids: &[i64]) -> Result<Vec<OwnedTag>> {
        match owner {
            TagOwner::User => self.counters.user_tags.fetch_add(1, Ordering::Relaxed),
            TagOwner::PortfolioCompany => self.counters.company_tags.fetch_add(1, Ordering::Relaxed),
        };
        let wanted: HashSet<i64> = owner_ids.iter().copied().collect();
        let mut rows: Vec<OwnedTag> = lock(&self.tags)
            .iter()
            .filter(|(o, id, _)| *o == owner && wanted.contains(id))
            .map(|(_, id, tag)| OwnedTag {
                owner_id: *id,
                tag: tag.clone(),
            })
            .collect();
        // Stable: keeps assignment order within an owner
        rows.sort_by_key(|r| r.owner_id);
        Ok(rows)
    }

    async fn list_linked_mentees(&self, company_id: CompanyId) -> Result<Vec<UserId>> {
        Ok(lock(&self.profiles)
            .values()
            .filter(|p| p.user.role == Role::Mentee && !p.user.is_soft_deleted())
            .filter(|p| p.company_id == Some(company_id))
            .map(|p| p.user.id)
            .collect())
    }
}

#[async_trait]
impl ScoreCache for MemoryStore {
    async fn replace(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        entries: &[ScoreCacheEntry],
    ) -> Result<()> {
        self.check_write(user_id)?;
        let key = (user_id, algorithm_version.to_owned());
        if entries.is_empty() {
            self.cache.remove(&key);
        } else {
            self.cache.insert(key, entries.to_vec());
        }
        self.record_write(user_id, algorithm_version, WriteKind::Replace, entries.len());
        Ok(())
    }

    async fn upsert(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        entries: &[ScoreCacheEntry],
    ) -> Result<()> {
        self.check_write(user_id)?;
        let mut rows = self
            .cache
            .entry((user_id, algorithm_version.to_owned()))
            .or_default();
        for entry in entries {
            match rows
                .iter_mut()
                .find(|r| r.recommended_user_id == entry.recommended_user_id)
            {
                Some(existing) => *existing = entry.clone(),
                None => rows.push(entry.clone()),
            }
        }
        drop(rows);
        self.record_write(user_id, algorithm_version, WriteKind::Upsert, entries.len());
        Ok(())
    }

    async fn retain(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        keep: &[UserId],
    ) -> Result<u64> {
        self.check_write(user_id)?;
        let keep: HashSet<UserId> = keep.iter().copied().collect();
        let mut removed = 0u64;
        if let Some(mut rows) = self.cache.get_mut(&(user_id, algorithm_version.to_owned())) {
            let before = rows.len();
            rows.retain(|r| keep.contains(&r.recommended_user_id));
            removed = (before - rows.len()) as u64;
        }
        self.record_write(user_id, algorithm_version, WriteKind::Retain, removed as usize);
        Ok(removed)
    }

    async fn top_matches(
        &self,
        user_id: UserId,
        algorithm_version: &str,
        limit: i64,
        min_score: Option<f64>,
    ) -> Result<Vec<ScoreCacheEntry>> {
        let mut rows: Vec<ScoreCacheEntry> = self
            .cached(user_id, algorithm_version)
            .into_iter()
            .filter(|r| min_score.is_none_or(|min| r.score >= min))
            .collect();
        rows.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.recommended_user_id.cmp(&b.recommended_user_id))
        });
        rows.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(rows)
    }
}
