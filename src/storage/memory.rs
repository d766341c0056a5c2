use crate::catalog::StreamDefinition;
use crate::error::Result;
use crate::etl::RecordSink;
use crate::sync::ReplicationState;
use crate::transform::Record;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkMessage {
    Schema(String),
    Record(Record),
    State(ReplicationState),
}

/// Sink that keeps every message in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<SinkMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<SinkMessage> {
        self.lock().clone()
    }

    /// Names of the streams whose schema was emitted
    pub fn schemas(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|m| match m {
                SinkMessage::Schema(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn records(&self, stream: &str) -> Vec<Record> {
        self.lock()
            .iter()
            .filter_map(|m| match m {
                SinkMessage::Record(r) if r.stream == stream => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<ReplicationState> {
        self.lock()
            .iter()
            .filter_map(|m| match m {
                SinkMessage::State(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, message: SinkMessage) -> Result<()> {
        self.lock().push(message);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SinkMessage>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordSink for MemorySink {
    fn emit_schema(&self, definition: &StreamDefinition) -> Result<()> {
        self.push(SinkMessage::Schema(definition.name.clone()))
    }

    fn emit_record(&self, record: &Record) -> Result<()> {
        self.push(SinkMessage::Record(record.clone()))
    }

    fn emit_state(&self, state: &ReplicationState) -> Result<()> {
        self.push(SinkMessage::State(state.clone()))
    }
}
