//! Database models and query functions for the match pipeline.

pub mod context;
pub mod memory;
pub mod models;
pub mod score_cache;
pub mod source;
pub mod tags;
pub mod users;

pub use context::PgStore;
