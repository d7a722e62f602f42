//! Domain layer types: read model snapshots, inbound events, identifiers.

pub mod entities;
pub mod error;
pub mod events;
pub mod types;
