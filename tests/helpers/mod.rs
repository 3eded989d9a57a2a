//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use matchmaker::data::memory::MemoryStore;
use matchmaker::data::models::{CompanyId, Role, Stage, Tag, TagCategory, User, UserId, UserProfile};
use matchmaker::matching::observer::RecalcObserver;
use matchmaker::matching::remote::{CompletionClient, CompletionError, LlmEngine};
use matchmaker::matching::{
    EngineTuning, MatchingConfig, RecalcDriver, RecalcError, RecalcOutcome, RecalcSummary,
    TagEngine,
};

/// Matching config with no delays, so tests run at full speed.
pub fn fast_config() -> MatchingConfig {
    MatchingConfig {
        batch_delay: Duration::ZERO,
        tag: EngineTuning {
            chunk_size: 100,
            chunk_delay: Duration::ZERO,
        },
        llm: EngineTuning {
            chunk_size: 5,
            chunk_delay: Duration::ZERO,
        },
        llm_timeout: Duration::from_secs(1),
        ..MatchingConfig::default()
    }
}

/// An active user whose last activity was `days_idle` days ago.
pub fn profile(id: UserId, role: Role, days_idle: i64) -> UserProfile {
    UserProfile::new(User {
        id,
        role,
        is_active: true,
        last_activity_at: Some(Utc::now() - chrono::Duration::days(days_idle)),
        deleted_at: None,
    })
}

pub fn mentor(id: UserId) -> UserProfile {
    let mut p = profile(id, Role::Mentor, 1);
    p.expertise = Some(format!("Mentor {id}: go-to-market and fundraising"));
    p
}

pub fn mentee(id: UserId) -> UserProfile {
    let mut p = profile(id, Role::Mentee, 1);
    p.company_description = Some(format!("Startup {id}: seed-stage B2B SaaS"));
    p
}

pub fn linked_mentee(id: UserId, company: CompanyId, stage: Stage) -> UserProfile {
    let mut p = mentee(id);
    p.company_id = Some(company);
    p.company_stage = Some(stage);
    p
}

pub fn tech(slug: &str) -> Tag {
    Tag::new(slug, TagCategory::Technology)
}

pub fn industry(slug: &str) -> Tag {
    Tag::new(slug, TagCategory::Industry)
}

/// A store with mentors `1..=mentors` and mentees `101..=100+mentees`, all
/// tagged `rust`.
pub fn populated_store(mentors: i64, mentees: i64) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    for id in 1..=mentors {
        store.add_profile(mentor(id));
        store.tag_user(id, tech("rust"));
    }
    for id in 101..=100 + mentees {
        store.add_profile(mentee(id));
        store.tag_user(id, tech("rust"));
    }
    Arc::new(store)
}

pub fn tag_driver(store: &Arc<MemoryStore>) -> RecalcDriver<MemoryStore> {
    let config = fast_config();
    RecalcDriver::new(
        Arc::clone(store),
        Arc::new(TagEngine::new(config.tag)),
        &config,
    )
}

pub fn llm_driver(
    store: &Arc<MemoryStore>,
    client: Arc<dyn CompletionClient>,
    chunk_size: usize,
) -> RecalcDriver<MemoryStore> {
    let config = fast_config();
    let tuning = EngineTuning {
        chunk_size,
        chunk_delay: Duration::ZERO,
    };
    RecalcDriver::new(
        Arc::clone(store),
        Arc::new(LlmEngine::new(client, config.llm_timeout, tuning)),
        &config,
    )
}

/// Completion client that always returns the same reply and counts calls.
pub struct FixedReply {
    reply: String,
    calls: AtomicUsize,
}

impl FixedReply {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_owned(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for FixedReply {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

pub const GOOD_VERDICT: &str = r#"{"score": 72, "reasoning": "Strong go-to-market overlap"}"#;

/// Observer that records what the driver reported.
#[derive(Default)]
pub struct Recorder {
    pub batches: Mutex<Vec<(usize, usize, usize)>>,
    pub failures: Mutex<Vec<UserId>>,
    pub chunks: Mutex<Vec<(UserId, usize)>>,
    pub finished: Mutex<Vec<(UserId, RecalcOutcome)>>,
    pub summaries: Mutex<Vec<RecalcSummary>>,
}

impl RecalcObserver for Recorder {
    fn chunk_scored(&self, user_id: UserId, _chunk: usize, _chunks: usize, scored: usize) {
        self.chunks.lock().unwrap().push((user_id, scored));
    }

    fn user_finished(&self, user_id: UserId, outcome: &RecalcOutcome, _elapsed: Duration) {
        self.finished.lock().unwrap().push((user_id, *outcome));
    }

    fn user_failed(&self, user_id: UserId, _error: &RecalcError) {
        self.failures.lock().unwrap().push(user_id);
    }

    fn batch_finished(&self, batch: usize, _batches: usize, succeeded: usize, failed: usize) {
        self.batches.lock().unwrap().push((batch, succeeded, failed));
    }

    fn run_finished(&self, summary: &RecalcSummary, _elapsed: Duration) {
        self.summaries.lock().unwrap().push(summary.clone());
    }
}
