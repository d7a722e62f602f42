//! Event projection and cache-aside query services.

pub mod consumer;
pub mod context;
pub mod error;
pub mod forum;
pub mod pagination;
pub mod projector;
pub mod query;
pub mod queue;
pub mod source;
