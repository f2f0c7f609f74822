//! Fjall-based persistence for jobs, task results, provider reports, and
//! idempotency records.
//!
//! The store is the durable half of the orchestration engine: queues and
//! rate-limiter state are in-memory and reset on restart, while everything
//! a resume needs lives here. Keys are prefix-encoded strings, values are
//! JSON.

pub mod error;
pub mod partitions;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{IdempotentCreate, ProviderManifestEntry, StateStore};
