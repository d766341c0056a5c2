//! Core ETL abstractions
//!
//! Trait definitions for the transform and load halves of a sync. The
//! extract half is the stream engine itself, see [`crate::sync`].

mod load;
mod transform;

pub use load::RecordSink;
pub use transform::Transformer;
