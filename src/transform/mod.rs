//! Record transformation
//!
//! Turns raw API payload elements into [`Record`]s shaped by a stream's
//! declared schema.

mod coerce;
mod record;

pub use record::{Record, RecordTransformer, SchemaViolation, ViolationKind, transform};

pub(crate) use coerce::{format_timestamp, parse_timestamp};
