//! Raw payload to schema-shaped record

use super::coerce::coerce;
use crate::catalog::{FieldType, StreamDefinition};
use crate::etl::Transformer;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A transformed entity, tagged with its stream and schema version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub stream: String,
    pub schema_version: u32,
    pub data: Map<String, Value>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViolationKind {
    #[error("required field is missing")]
    Missing,
    #[error("required field is null")]
    Null,
    #[error("expected {expected:?}, found {found}")]
    Untypeable { expected: FieldType, found: Value },
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// A raw record that does not fit its stream's schema.
///
/// The record is skipped and counted; the stream carries on.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("stream '{stream}', field '{field}': {kind}")]
pub struct SchemaViolation {
    pub stream: String,
    pub field: String,
    pub kind: ViolationKind,
}

/// Map one raw payload element onto `definition`'s schema.
///
/// Fields are read from their source path, coerced into their declared type
/// and anything not declared is dropped.
pub fn transform(raw: &Value, definition: &StreamDefinition) -> Result<Record, SchemaViolation> {
    let violation = |field: &str, kind| SchemaViolation {
        stream: definition.name.clone(),
        field: field.to_string(),
        kind,
    };

    if !raw.is_object() {
        return Err(violation("", ViolationKind::NotAnObject));
    }

    let mut data = Map::new();
    for field in definition.schema.fields() {
        let value = field
            .source_path()
            .try_fold(raw, |current, segment| current.get(segment));

        match value {
            None if field.required => return Err(violation(&field.name, ViolationKind::Missing)),
            None => {}
            Some(Value::Null) if field.required => {
                return Err(violation(&field.name, ViolationKind::Null));
            }
            Some(Value::Null) => {
                data.insert(field.name.clone(), Value::Null);
            }
            Some(value) => match coerce(value, field.field_type) {
                Some(coerced) => {
                    data.insert(field.name.clone(), coerced);
                }
                None => {
                    return Err(violation(
                        &field.name,
                        ViolationKind::Untypeable {
                            expected: field.field_type,
                            found: value.clone(),
                        },
                    ));
                }
            },
        }
    }

    Ok(Record {
        stream: definition.name.clone(),
        schema_version: definition.schema_version,
        data,
    })
}

/// [`Transformer`] bound to a single stream definition.
pub struct RecordTransformer<'a> {
    definition: &'a StreamDefinition,
}

impl<'a> RecordTransformer<'a> {
    pub fn new(definition: &'a StreamDefinition) -> Self {
        Self { definition }
    }
}

impl Transformer for RecordTransformer<'_> {
    type Input = Value;
    type Output = Record;
    type Error = SchemaViolation;

    fn transform(&self, input: Value) -> Result<Record, SchemaViolation> {
        transform(&input, self.definition)
    }
}
