use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::parse_duration;
use crate::data::models::UserId;
use crate::matching::RecalculateOptions;

/// Match score cache maintenance
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineName {
    /// Deterministic tag/attribute engine
    Tag,
    /// Remote completion-service engine
    Llm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::Args)]
pub struct ChunkArgs {
    /// Candidates scored per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// Pause between chunks, e.g. `10ms`
    #[arg(long, value_parser = parse_duration)]
    pub chunk_delay: Option<Duration>,
}

impl ChunkArgs {
    pub fn options(&self) -> RecalculateOptions {
        RecalculateOptions {
            chunk_size: self.chunk_size,
            chunk_delay: self.chunk_delay,
            missing_user: None,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recompute cached scores for one user
    RecalculateOne {
        user_id: UserId,
        #[arg(long, value_enum, default_value_t = EngineName::Tag)]
        engine: EngineName,
        #[command(flatten)]
        chunk: ChunkArgs,
    },
    /// Recompute cached scores for every mentor and mentee
    RecalculateAll {
        #[arg(long, value_enum, default_value_t = EngineName::Tag)]
        engine: EngineName,
        /// Process at most this many users
        #[arg(long)]
        limit: Option<i64>,
        /// Users processed concurrently per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Pause between batches, e.g. `500ms`
        #[arg(long, value_parser = parse_duration)]
        batch_delay: Option<Duration>,
        #[command(flatten)]
        chunk: ChunkArgs,
    },
    /// Print the cached top matches for a user
    Top {
        user_id: UserId,
        #[arg(long, value_enum, default_value_t = EngineName::Tag)]
        engine: EngineName,
        #[arg(long, default_value_t = 10)]
        limit: i64,
        #[arg(long)]
        min_score: Option<f64>,
    },
    /// Recalculate users as invalidation notifications arrive
    Listen,
}
