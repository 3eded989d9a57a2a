//! Configuration, loaded with figment from an optional TOML file and the
//! environment.
//!
//! Durations accept humanized strings (`500ms`, `10s`, `90d`) or bare
//! integers, which are read as seconds.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use custom_debug_derive::Debug;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::DurationParser;
use serde::{Deserialize, Deserializer};

use crate::matching::{
    DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE, DEFAULT_DORMANCY_WINDOW, DEFAULT_LLM_TIMEOUT,
    DEFAULT_LLM_TUNING, DEFAULT_TAG_TUNING, EngineTuning, MatchingConfig,
};

/// Optional config file read from the working directory.
pub const CONFIG_FILE: &str = "matchmaker.toml";

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[debug(skip)]
    pub database_url: String,

    #[serde(default = "default_dormancy_window", deserialize_with = "deserialize_duration")]
    pub dormancy_window: Duration,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay", deserialize_with = "deserialize_duration")]
    pub batch_delay: Duration,

    #[serde(default = "default_tag_chunk_size")]
    pub tag_chunk_size: usize,
    #[serde(default = "default_tag_chunk_delay", deserialize_with = "deserialize_duration")]
    pub tag_chunk_delay: Duration,

    #[serde(default = "default_llm_chunk_size")]
    pub llm_chunk_size: usize,
    #[serde(default = "default_llm_chunk_delay", deserialize_with = "deserialize_duration")]
    pub llm_chunk_delay: Duration,
    #[serde(default = "default_llm_timeout", deserialize_with = "deserialize_duration")]
    pub llm_timeout: Duration,

    /// The remote engine is disabled when unset.
    #[serde(default)]
    #[debug(skip)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    #[debug(skip_if = Option::is_none)]
    pub llm_requests_per_minute: Option<NonZeroU32>,

    #[serde(default = "default_shutdown_timeout", deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_dormancy_window() -> Duration {
    DEFAULT_DORMANCY_WINDOW
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_delay() -> Duration {
    DEFAULT_BATCH_DELAY
}

fn default_tag_chunk_size() -> usize {
    DEFAULT_TAG_TUNING.chunk_size
}

fn default_tag_chunk_delay() -> Duration {
    DEFAULT_TAG_TUNING.chunk_delay
}

fn default_llm_chunk_size() -> usize {
    DEFAULT_LLM_TUNING.chunk_size
}

fn default_llm_chunk_delay() -> Duration {
    DEFAULT_LLM_TUNING.chunk_delay
}

fn default_llm_timeout() -> Duration {
    DEFAULT_LLM_TIMEOUT
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Parse a humanized duration string such as `500ms` or `90d`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let parsed = DurationParser::with_all_time_units()
        .parse(s.trim())
        .map_err(|e| format!("invalid duration {s:?}: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration {s:?}: {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Load from `matchmaker.toml` (optional), overridden by the process
    /// environment.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::raw()),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment.extract().context("Failed to load config")
    }

    pub fn matching(&self) -> MatchingConfig {
        MatchingConfig {
            dormancy_window: self.dormancy_window,
            batch_size: self.batch_size.max(1),
            batch_delay: self.batch_delay,
            tag: EngineTuning {
                chunk_size: self.tag_chunk_size.max(1),
                chunk_delay: self.tag_chunk_delay,
            },
            llm: EngineTuning {
                chunk_size: self.llm_chunk_size.max(1),
                chunk_delay: self.llm_chunk_delay,
            },
            llm_timeout: self.llm_timeout,
        }
    }
}
