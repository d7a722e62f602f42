//! Read-side cache projector for a forum service.
//!
//! Events from the command side are folded into cached snapshots, sorted
//! indexes, and counters; queries read cache-first and fall back to the
//! system of record.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
