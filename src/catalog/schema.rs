//! Declared record schemas
//!
//! A [`Schema`] is an ordered list of [`Field`]s. It drives record
//! transformation and is published as JSON Schema for discovery.

use serde_json::{Map, Value, json};

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    /// RFC 3339 timestamp, normalized to UTC
    DateTime,
    Object,
    Array,
}

impl FieldType {
    fn json_type(self) -> &'static str {
        match self {
            Self::String | Self::DateTime => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    /// Dotted path into the raw payload, when it differs from `name`
    pub source: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            source: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Read this field from `path` (e.g. `image.src`) instead of its own name.
    pub fn from_path(mut self, path: impl Into<String>) -> Self {
        self.source = Some(path.into());
        self
    }

    /// Path segments into the raw payload.
    pub fn source_path(&self) -> impl Iterator<Item = &str> {
        self.source.as_deref().unwrap_or(&self.name).split('.')
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as a JSON Schema object. Optional fields are nullable.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let json_type = field.field_type.json_type();
            let mut property = if field.required {
                json!({ "type": json_type })
            } else {
                json!({ "type": [json_type, "null"] })
            };
            if field.field_type == FieldType::DateTime {
                property["format"] = json!("date-time");
            }
            properties.insert(field.name.clone(), property);
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
