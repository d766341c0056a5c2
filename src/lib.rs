//! Shopify Tap
//!
//! An incremental extraction connector for the Shopify Admin REST API.
//! Streams are paged through concurrently, records are coerced into their
//! stream schema and emitted as NDJSON messages, and per-stream bookmarks
//! make every run pick up where the last one left off.

pub mod catalog;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod etl;
pub mod storage;
pub mod sync;
pub mod transform;

// Re-exports for convenience
pub use catalog::{StreamDefinition, active_streams, all_streams};
pub use client::{Auth, ShopifyClient};
pub use config::{SyncSettings, TapConfig};
pub use error::{Result, TapError};
pub use etl::{RecordSink, Transformer};
pub use storage::{MemorySink, NdjsonSink, StateFile};
pub use sync::{ReplicationState, SyncCoordinator, SyncReport};
