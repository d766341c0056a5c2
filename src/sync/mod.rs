//! Incremental sync: pagination, per-stream engines and their coordinator

mod bookmark;
mod coordinator;
mod engine;
mod paginator;
mod stop;

pub use bookmark::{
    BookmarkTracker, BookmarkValue, LowerBound, ReplicationState, StreamBookmark, record_key,
};
pub use coordinator::{SyncCoordinator, SyncReport};
pub use engine::{SharedState, StreamEngine, StreamOutcome, StreamPhase, StreamStatus};
pub use paginator::{Page, PageToken, Paginator};
pub use stop::StopSignal;
