//! Stream catalog
//!
//! Data-driven descriptors of every resource type the tap extracts, and the
//! registry that turns configuration into the active stream set.

mod definition;
pub mod registry;
mod schema;

pub use definition::{PaginationStrategy, StreamDefinition, StreamGate};
pub use registry::{active_streams, all_streams};
pub use schema::{Field, FieldType, Schema};
