//! Match scoring and the precomputed score cache pipeline.

pub mod driver;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod explanation;
pub mod observer;
pub mod remote;
pub mod selector;
pub mod tag_engine;

use std::time::Duration;

pub use driver::{
    RecalcDriver, RecalcOutcome, RecalcSummary, RecalculateAllOptions, RecalculateOptions,
    SkipReason,
};
pub use engine::{CacheWriteMode, EngineTuning, MissingUserPolicy, ScoredPair, ScoringEngine};
pub use error::RecalcError;
pub use remote::LlmEngine;
pub use tag_engine::TagEngine;

pub const DEFAULT_DORMANCY_WINDOW: Duration = Duration::from_secs(90 * 24 * 60 * 60);
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_TAG_TUNING: EngineTuning = EngineTuning {
    chunk_size: 100,
    chunk_delay: Duration::from_millis(10),
};

pub const DEFAULT_LLM_TUNING: EngineTuning = EngineTuning {
    chunk_size: 5,
    chunk_delay: Duration::from_millis(500),
};

pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables shared by the selector, the driver and the engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingConfig {
    /// Users inactive for longer than this are left out of candidate pools.
    pub dormancy_window: Duration,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub tag: EngineTuning,
    pub llm: EngineTuning,
    /// Hard per-call limit for the completion service.
    pub llm_timeout: Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            dormancy_window: DEFAULT_DORMANCY_WINDOW,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            tag: DEFAULT_TAG_TUNING,
            llm: DEFAULT_LLM_TUNING,
            llm_timeout: DEFAULT_LLM_TIMEOUT,
        }
    }
}
