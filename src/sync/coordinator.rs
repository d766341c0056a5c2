//! Runs stream engines concurrently and owns the replication state

use super::engine::{SharedState, StreamEngine, StreamOutcome, StreamPhase, StreamStatus};
use super::{ReplicationState, StopSignal};
use crate::catalog::StreamDefinition;
use crate::client::ShopifyClient;
use crate::config::{SyncSettings, TapConfig};
use crate::error::{Result, TapError};
use crate::etl::RecordSink;
use crate::storage::StateFile;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Result of a whole sync run.
#[derive(Debug)]
pub struct SyncReport {
    /// One outcome per stream, in declaration order
    pub outcomes: Vec<StreamOutcome>,
    /// Replication state after merging every completed stream
    pub state: ReplicationState,
}

impl SyncReport {
    /// Every stream reached `Done`.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(StreamOutcome::is_done)
    }

    pub fn failed_streams(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_done())
            .map(|o| o.stream.as_str())
            .collect()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn auth_failed(&self) -> bool {
        self.outcomes
            .iter()
            .filter_map(StreamOutcome::error)
            .any(TapError::is_run_fatal)
    }

    pub fn outcome(&self, stream: &str) -> Option<&StreamOutcome> {
        self.outcomes.iter().find(|o| o.stream == stream)
    }

    pub fn records_emitted(&self) -> u64 {
        self.outcomes.iter().map(|o| o.records_emitted).sum()
    }

    pub fn records_skipped(&self) -> u64 {
        self.outcomes.iter().map(|o| o.records_skipped).sum()
    }
}

/// Schedules one [`StreamEngine`] per stream, at most
/// `max_concurrent_streams` at a time.
///
/// Bookmarks of streams that finish are merged into the shared state; a
/// stream that fails or is cancelled keeps its previous bookmark (or the
/// last per-page checkpoint). An authentication failure on any stream stops
/// the others at their next page boundary.
pub struct SyncCoordinator {
    client: ShopifyClient,
    sink: Arc<dyn RecordSink>,
    settings: SyncSettings,
    start_date: Option<DateTime<Utc>>,
    stop: StopSignal,
    state_file: Option<StateFile>,
}

impl SyncCoordinator {
    pub fn new(client: ShopifyClient, sink: Arc<dyn RecordSink>, settings: SyncSettings) -> Self {
        Self {
            client,
            sink,
            settings,
            start_date: None,
            stop: StopSignal::new(),
            state_file: None,
        }
    }

    /// Coordinator using the tuning block and start date of `config`.
    pub fn from_config(client: ShopifyClient, sink: Arc<dyn RecordSink>, config: &TapConfig) -> Self {
        Self::new(client, sink, config.sync.clone()).with_start_date(config.start_date)
    }

    pub fn with_start_date(mut self, start_date: Option<DateTime<Utc>>) -> Self {
        self.start_date = start_date;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Persist the final state to `state_file` when the run ends.
    pub fn with_state_file(mut self, state_file: StateFile) -> Self {
        self.state_file = Some(state_file);
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Sync every stream of `definitions` starting from `initial`.
    ///
    /// Stream failures are reported in the [`SyncReport`]; only failing to
    /// emit or persist the final state is an error.
    pub async fn run(
        &self,
        definitions: Vec<StreamDefinition>,
        initial: ReplicationState,
    ) -> Result<SyncReport> {
        let names: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();
        log::info!(
            "Syncing {} stream(s), {} at a time",
            names.len(),
            self.settings.max_concurrent_streams
        );

        let state: SharedState = Arc::new(Mutex::new(initial));
        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_streams.max(1)));
        let mut tasks = JoinSet::new();

        for (index, definition) in definitions.into_iter().enumerate() {
            let engine = StreamEngine::new(
                definition,
                self.client.clone(),
                Arc::clone(&self.sink),
                Arc::clone(&state),
                self.settings.clone(),
            )
            .with_start_date(self.start_date)
            .with_stop_signal(self.stop.clone());
            let permits = Arc::clone(&permits);
            let stop = self.stop.clone();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = engine.run().await;
                if let Some(e) = outcome.error().filter(|e| e.is_run_fatal()) {
                    log::error!("Stopping all streams: {}", e);
                    stop.trigger();
                }
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<StreamOutcome>> = names.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => log::error!("Stream task aborted: {}", e),
            }
        }

        let outcomes: Vec<StreamOutcome> = slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| slot.unwrap_or_else(|| aborted(name)))
            .collect();

        let state = {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            for outcome in outcomes.iter().filter(|o| o.is_done()) {
                if let Some(bookmark) = &outcome.bookmark {
                    state.advance(&outcome.stream, bookmark.clone());
                }
            }
            state.clone()
        };

        self.sink.emit_state(&state)?;
        if let Some(file) = &self.state_file {
            file.save(&state)?;
            log::debug!("State written to {}", file.path().display());
        }

        Ok(SyncReport { outcomes, state })
    }
}

fn aborted(stream: String) -> StreamOutcome {
    StreamOutcome {
        status: StreamStatus::Failed(TapError::stream_fatal(&stream, "task aborted")),
        stream,
        transitions: vec![StreamPhase::NotStarted, StreamPhase::Failed],
        records_emitted: 0,
        records_skipped: 0,
        records_filtered: 0,
        pages: 0,
        bookmark: None,
    }
}
