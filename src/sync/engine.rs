//! Per-stream sync state machine
//!
//! ```text
//! NotStarted -> Paging -> Finalizing -> Done
//!                  |
//!                  +----> Failed
//!                  +----> Cancelled
//! ```

use super::bookmark::{BookmarkTracker, BookmarkValue, LowerBound, StreamBookmark, record_key};
use super::paginator::{Page, Paginator};
use super::{ReplicationState, StopSignal};
use crate::catalog::StreamDefinition;
use crate::client::ShopifyClient;
use crate::config::{CheckpointMode, SyncSettings};
use crate::error::{Result, TapError};
use crate::etl::{RecordSink, Transformer};
use crate::transform::RecordTransformer;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Replication state shared between the coordinator and its streams.
pub type SharedState = Arc<Mutex<ReplicationState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    NotStarted,
    Paging,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug)]
pub enum StreamStatus {
    Done,
    Failed(TapError),
    /// A stop was requested before the stream finished
    Cancelled,
}

/// What happened to one stream during a sync.
#[derive(Debug)]
pub struct StreamOutcome {
    pub stream: String,
    pub status: StreamStatus,
    pub transitions: Vec<StreamPhase>,
    pub records_emitted: u64,
    /// Records dropped for a schema violation
    pub records_skipped: u64,
    /// Records behind the bookmark, or at it and already emitted
    pub records_filtered: u64,
    pub pages: usize,
    /// For `Done`, the bookmark to commit (`None` if nothing newer was seen);
    /// otherwise the last bookmark made safe by a per-page checkpoint.
    pub bookmark: Option<StreamBookmark>,
}

impl StreamOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self.status, StreamStatus::Done)
    }

    pub fn error(&self) -> Option<&TapError> {
        match &self.status {
            StreamStatus::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn final_phase(&self) -> StreamPhase {
        self.transitions
            .last()
            .copied()
            .unwrap_or(StreamPhase::NotStarted)
    }
}

enum PagingEnd {
    Exhausted,
    Stopped,
}

struct Progress {
    transitions: Vec<StreamPhase>,
    emitted: u64,
    skipped: u64,
    filtered: u64,
    pages: usize,
    tracker: BookmarkTracker,
    checkpointed: Option<StreamBookmark>,
}

impl Progress {
    fn new() -> Self {
        Self {
            transitions: vec![StreamPhase::NotStarted],
            emitted: 0,
            skipped: 0,
            filtered: 0,
            pages: 0,
            tracker: BookmarkTracker::default(),
            checkpointed: None,
        }
    }

    fn enter(&mut self, phase: StreamPhase) {
        self.transitions.push(phase);
    }
}

/// Runs the full sync of one stream: pagination, transformation, emission
/// and bookmark tracking.
pub struct StreamEngine {
    definition: StreamDefinition,
    client: ShopifyClient,
    sink: Arc<dyn RecordSink>,
    state: SharedState,
    settings: SyncSettings,
    start_date: Option<DateTime<Utc>>,
    stop: StopSignal,
}

impl StreamEngine {
    pub fn new(
        definition: StreamDefinition,
        client: ShopifyClient,
        sink: Arc<dyn RecordSink>,
        state: SharedState,
        settings: SyncSettings,
    ) -> Self {
        Self {
            definition,
            client,
            sink,
            state,
            settings,
            start_date: None,
            stop: StopSignal::new(),
        }
    }

    /// Default lower bound for incremental streams without a bookmark.
    pub fn with_start_date(mut self, start_date: Option<DateTime<Utc>>) -> Self {
        self.start_date = start_date;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Run the stream to completion. Never panics on stream errors: they
    /// are reported in the returned outcome.
    pub async fn run(self) -> StreamOutcome {
        let mut progress = Progress::new();

        let status = if self.stop.is_triggered() {
            log::info!("Skipping '{}', stop requested", self.name());
            progress.enter(StreamPhase::Cancelled);
            StreamStatus::Cancelled
        } else {
            progress.enter(StreamPhase::Paging);
            match self.page_through(&mut progress).await {
                Ok(PagingEnd::Exhausted) => {
                    progress.enter(StreamPhase::Finalizing);
                    progress.enter(StreamPhase::Done);
                    StreamStatus::Done
                }
                Ok(PagingEnd::Stopped) => {
                    log::warn!(
                        "Stream '{}' stopped after {} page(s)",
                        self.name(),
                        progress.pages
                    );
                    progress.enter(StreamPhase::Cancelled);
                    StreamStatus::Cancelled
                }
                Err(e) => {
                    log::error!("Stream '{}' failed: {}", self.name(), e);
                    progress.enter(StreamPhase::Failed);
                    StreamStatus::Failed(e)
                }
            }
        };

        let bookmark = match status {
            StreamStatus::Done => self.candidate(&progress),
            _ => progress.checkpointed.clone(),
        };

        if matches!(status, StreamStatus::Done) {
            log::info!(
                "Stream '{}' done: {} emitted, {} skipped, {} already synced, {} page(s)",
                self.name(),
                progress.emitted,
                progress.skipped,
                progress.filtered,
                progress.pages
            );
        }

        StreamOutcome {
            stream: self.definition.name.clone(),
            status,
            transitions: progress.transitions,
            records_emitted: progress.emitted,
            records_skipped: progress.skipped,
            records_filtered: progress.filtered,
            pages: progress.pages,
            bookmark,
        }
    }

    async fn page_through(&self, progress: &mut Progress) -> Result<PagingEnd> {
        let def = &self.definition;
        let prior = self.lock_state().get(&def.name).cloned();
        let bound = LowerBound::resolve(def, prior.as_ref(), self.start_date);
        match bound.value() {
            Some(value) => log::info!("Syncing '{}' from {}", def.name, value),
            None => log::info!("Syncing '{}' from the beginning", def.name),
        }

        self.sink.emit_schema(def)?;

        let since = def
            .since_param
            .as_ref()
            .and(bound.value())
            .map(BookmarkValue::to_query_value);
        let mut paginator =
            Paginator::new(&self.client, def, self.settings.page_size, self.settings.max_pages)
                .since(since);

        loop {
            if self.stop.is_triggered() {
                return Ok(PagingEnd::Stopped);
            }
            let Some(page) = self.next_page(&mut paginator).await? else {
                return Ok(PagingEnd::Exhausted);
            };
            progress.pages += 1;
            self.process_page(page, &bound, progress)?;
            if self.checkpoints_per_page() {
                self.checkpoint(progress)?;
            }
        }
    }

    /// Pull the next page, re-attempting transient failures (after the
    /// client's own retries) up to `page_retry_limit` times.
    async fn next_page(&self, paginator: &mut Paginator<'_>) -> Result<Option<Page>> {
        let mut attempts = 0;
        loop {
            match paginator.next_page().await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempts < self.settings.page_retry_limit => {
                    attempts += 1;
                    log::warn!(
                        "Page {} of '{}' failed, re-attempting ({}/{}): {}",
                        paginator.pages_fetched() + 1,
                        self.name(),
                        attempts,
                        self.settings.page_retry_limit,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn process_page(&self, page: Page, bound: &LowerBound, progress: &mut Progress) -> Result<()> {
        for raw in page.records {
            self.process_record(raw, bound, progress)?;
        }
        Ok(())
    }

    fn process_record(&self, raw: Value, bound: &LowerBound, progress: &mut Progress) -> Result<()> {
        let record = match RecordTransformer::new(&self.definition).transform(raw) {
            Ok(record) => record,
            Err(violation) => {
                log::warn!("Skipping record: {}", violation);
                progress.skipped += 1;
                return Ok(());
            }
        };

        let value = BookmarkValue::from_record(&record, &self.definition);
        let key = record_key(&record, &self.definition);
        if !bound.admits(value.as_ref(), key.as_ref()) {
            progress.filtered += 1;
            return Ok(());
        }

        self.sink.emit_record(&record)?;
        progress.emitted += 1;
        if let Some(value) = value {
            progress.tracker.observe(value, key);
        }
        Ok(())
    }

    /// Per-page commits are only safe when pages arrive in replication-key
    /// order; otherwise a later page could hold older records.
    fn checkpoints_per_page(&self) -> bool {
        self.settings.checkpoint == CheckpointMode::PerPage
            && self.definition.sorted_by_replication_key
            && self.definition.is_incremental()
    }

    fn checkpoint(&self, progress: &mut Progress) -> Result<()> {
        let Some(bookmark) = self.candidate(progress) else {
            return Ok(());
        };
        let snapshot = {
            let mut state = self.lock_state();
            state
                .advance(&self.definition.name, bookmark)
                .then(|| state.clone())
        };
        if let Some(snapshot) = snapshot {
            let committed = snapshot.get(&self.definition.name).cloned();
            if let Some(committed) = &committed {
                log::debug!(
                    "Checkpoint '{}' at {} ({} key(s) at value)",
                    self.name(),
                    committed.value,
                    committed.keys_at_value.len()
                );
            }
            self.sink.emit_state(&snapshot)?;
            progress.checkpointed = committed;
        }
        Ok(())
    }

    fn candidate(&self, progress: &Progress) -> Option<StreamBookmark> {
        let key = self.definition.replication_key.as_ref()?;
        let value = progress.tracker.max()?;
        Some(
            StreamBookmark::new(key.clone(), value.clone())
                .with_keys(progress.tracker.keys().to_vec()),
        )
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ReplicationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
