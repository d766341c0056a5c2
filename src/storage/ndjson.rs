//! NDJSON (Newline Delimited JSON) message stream

use crate::catalog::StreamDefinition;
use crate::error::Result;
use crate::etl::RecordSink;
use crate::sync::ReplicationState;
use crate::transform::Record;

use serde_json::{Value, json};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub fn schema_message(definition: &StreamDefinition) -> Value {
    json!({
        "type": "SCHEMA",
        "stream": definition.name,
        "schema": definition.schema.to_json_schema(),
        "key_properties": definition.primary_key,
        "bookmark_properties": definition.replication_key.iter().collect::<Vec<_>>(),
    })
}

pub fn record_message(record: &Record) -> Value {
    json!({
        "type": "RECORD",
        "stream": record.stream,
        "record": record.data,
        "version": record.schema_version,
    })
}

pub fn state_message(state: &ReplicationState) -> Value {
    json!({
        "type": "STATE",
        "value": state,
    })
}

/// Writes one message per line to stdout or a file
///
/// Lines from concurrent streams are serialized by a mutex, so every line is
/// a complete JSON document.
pub struct NdjsonSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl NdjsonSink {
    pub fn stdout() -> Self {
        Self::from_writer(std::io::stdout())
    }

    /// Create (or truncate) `path` and write to it
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.lock().flush()?;
        Ok(())
    }

    fn write_message(&self, message: &Value) -> Result<()> {
        let line = serde_json::to_string(message)?;
        writeln!(self.lock(), "{}", line)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn Write + Send>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordSink for NdjsonSink {
    fn emit_schema(&self, definition: &StreamDefinition) -> Result<()> {
        self.write_message(&schema_message(definition))
    }

    fn emit_record(&self, record: &Record) -> Result<()> {
        self.write_message(&record_message(record))
    }

    /// State lines are flushed so a consumer can checkpoint on them
    fn emit_state(&self, state: &ReplicationState) -> Result<()> {
        self.write_message(&state_message(state))?;
        self.flush()
    }
}

/// Read an NDJSON message file back
pub struct NdjsonReader {
    path: PathBuf,
}

impl NdjsonReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read all lines as JSON values
    pub fn read(&self) -> Result<Vec<Value>> {
        let content = std::fs::read_to_string(&self.path)?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    /// Messages of one type (`SCHEMA`, `RECORD` or `STATE`)
    pub fn read_type(&self, message_type: &str) -> Result<Vec<Value>> {
        Ok(self
            .read()?
            .into_iter()
            .filter(|m| m["type"] == message_type)
            .collect())
    }
}
