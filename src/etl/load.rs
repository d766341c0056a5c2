//! Output sink for schema-tagged records

use crate::catalog::StreamDefinition;
use crate::error::Result;
use crate::sync::ReplicationState;
use crate::transform::Record;

/// Destination for everything a sync produces
///
/// Streams may run concurrently, so implementors must be `Send + Sync` and
/// keep each emitted message whole. Within a stream, calls arrive in order:
/// the schema first, then records in page order, with state messages in
/// between when per-page checkpointing is on.
///
/// # Example
/// ```
/// use tap_shopify::catalog::StreamDefinition;
/// use tap_shopify::error::Result;
/// use tap_shopify::etl::RecordSink;
/// use tap_shopify::sync::ReplicationState;
/// use tap_shopify::transform::Record;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct CountingSink(AtomicUsize);
///
/// impl RecordSink for CountingSink {
///     fn emit_schema(&self, _definition: &StreamDefinition) -> Result<()> {
///         Ok(())
///     }
///
///     fn emit_record(&self, _record: &Record) -> Result<()> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     }
///
///     fn emit_state(&self, _state: &ReplicationState) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait RecordSink: Send + Sync {
    /// Announce a stream's schema before its first record
    fn emit_schema(&self, definition: &StreamDefinition) -> Result<()>;

    /// Emit a single record
    ///
    /// # Errors
    /// Returns an error if the destination cannot accept the record
    fn emit_record(&self, record: &Record) -> Result<()>;

    /// Emit a replication state snapshot
    fn emit_state(&self, state: &ReplicationState) -> Result<()>;
}
