//! Precomputed mentor/mentee match scores.
//!
//! The [`matching`] module holds the scoring engines and the recalculation
//! driver; [`data`] holds the store contracts with their Postgres and
//! in-memory implementations; [`triggers`] turns change events into
//! background recalculations.

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod matching;
pub mod triggers;
pub mod utils;
