//! File system and in-memory output
//!
//! This module handles everything a sync writes:
//! - NDJSON message streams (stdout or file)
//! - Replication state files
//! - An in-memory sink for embedding and tests

mod memory;
mod ndjson;
mod state;

pub use memory::{MemorySink, SinkMessage};
pub use ndjson::{NdjsonReader, NdjsonSink, record_message, schema_message, state_message};
pub use state::StateFile;
