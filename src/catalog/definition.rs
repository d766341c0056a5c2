use super::schema::{FieldType, Schema};
use serde_json::{Value, json};

/// How a resource collection is walked across pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationStrategy {
    /// Opaque `page_info` cursor from the `Link: <...>; rel="next"` header
    LinkHeader,
    /// Opaque cursor read from a dotted path in the response body and sent
    /// back in the `param` query parameter
    BodyCursor { field: String, param: String },
    /// `page=N`, incremented until an empty page
    PageNumber,
    /// A single request returns everything
    Single,
}

/// Which configuration flag enables a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamGate {
    Always,
    /// Shopify Plus endpoints
    PlusAccount,
    /// Requires protected customer data access for the app
    ProtectedData,
}

/// Immutable descriptor of one resource type.
///
/// # Example
/// ```
/// use tap_shopify::catalog::{Field, FieldType, PaginationStrategy, Schema, StreamDefinition};
///
/// let locations = StreamDefinition::new(
///     "locations",
///     "locations.json",
///     Schema::new(vec![Field::new("id", FieldType::Integer).required()]),
/// )
/// .with_pagination(PaginationStrategy::Single);
///
/// assert_eq!(locations.records_key, "locations");
/// assert!(!locations.is_incremental());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDefinition {
    pub name: String,
    /// Endpoint relative to the versioned API root
    pub path: String,
    /// Key of the record array in the response body
    pub records_key: String,
    pub primary_key: Vec<String>,
    pub replication_key: Option<String>,
    /// Query parameter carrying the filter-since value
    pub since_param: Option<String>,
    pub schema: Schema,
    pub schema_version: u32,
    pub pagination: PaginationStrategy,
    /// The API returns records in ascending replication-key order
    pub sorted_by_replication_key: bool,
    /// A 404 means "no data" rather than an error
    pub optional: bool,
    pub gate: StreamGate,
    /// Static query parameters sent on the first page
    pub params: Vec<(String, String)>,
}

impl StreamDefinition {
    /// New full-table stream keyed by `id`, paginated through the `Link`
    /// header. The records key defaults to the stream name.
    pub fn new(name: impl Into<String>, path: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        Self {
            records_key: name.clone(),
            name,
            path: path.into(),
            primary_key: vec!["id".to_string()],
            replication_key: None,
            since_param: None,
            schema,
            schema_version: 1,
            pagination: PaginationStrategy::LinkHeader,
            sorted_by_replication_key: false,
            optional: false,
            gate: StreamGate::Always,
            params: Vec::new(),
        }
    }

    pub fn with_records_key(mut self, key: impl Into<String>) -> Self {
        self.records_key = key.into();
        self
    }

    pub fn with_primary_key(mut self, keys: &[&str]) -> Self {
        self.primary_key = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Make the stream incremental on `key`, optionally filtered upstream
    /// through `since_param`.
    pub fn incremental(mut self, key: impl Into<String>, since_param: Option<&str>) -> Self {
        self.replication_key = Some(key.into());
        self.since_param = since_param.map(str::to_string);
        self
    }

    pub fn sorted(mut self) -> Self {
        self.sorted_by_replication_key = true;
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationStrategy) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn gated(mut self, gate: StreamGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn is_incremental(&self) -> bool {
        self.replication_key.is_some()
    }

    /// Declared type of the replication key, if the stream is incremental.
    pub fn replication_key_type(&self) -> Option<FieldType> {
        let key = self.replication_key.as_deref()?;
        self.schema.field(key).map(|f| f.field_type)
    }

    /// Check internal consistency: keys must be declared schema fields and
    /// the replication key must be orderable.
    pub fn validate(&self) -> Result<(), String> {
        for key in &self.primary_key {
            if self.schema.field(key).is_none() {
                return Err(format!(
                    "stream '{}': primary key '{}' is not in the schema",
                    self.name, key
                ));
            }
        }
        if let Some(key) = &self.replication_key {
            match self.replication_key_type() {
                Some(FieldType::DateTime) | Some(FieldType::Integer) => {}
                Some(other) => {
                    return Err(format!(
                        "stream '{}': replication key '{}' has unorderable type {:?}",
                        self.name, key, other
                    ));
                }
                None => {
                    return Err(format!(
                        "stream '{}': replication key '{}' is not in the schema",
                        self.name, key
                    ));
                }
            }
        }
        Ok(())
    }

    /// Catalog entry published by `discover`.
    pub fn catalog_entry(&self) -> Value {
        json!({
            "tap_stream_id": self.name,
            "stream": self.name,
            "key_properties": self.primary_key,
            "replication_key": self.replication_key,
            "replication_method": if self.is_incremental() { "INCREMENTAL" } else { "FULL_TABLE" },
            "schema": self.schema.to_json_schema(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", FieldType::Integer).required(),
            Field::new("title", FieldType::String),
            Field::new("updated_at", FieldType::DateTime).required(),
        ])
    }

    #[test]
    fn test_defaults() {
        let def = StreamDefinition::new("products", "products.json", schema());
        assert_eq!(def.records_key, "products");
        assert_eq!(def.primary_key, vec!["id"]);
        assert_eq!(def.pagination, PaginationStrategy::LinkHeader);
        assert_eq!(def.gate, StreamGate::Always);
        assert!(!def.is_incremental());
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_incremental() {
        let def = StreamDefinition::new("products", "products.json", schema())
            .incremental("updated_at", Some("updated_at_min"))
            .sorted();
        assert!(def.is_incremental());
        assert_eq!(def.replication_key_type(), Some(FieldType::DateTime));
        assert_eq!(def.since_param.as_deref(), Some("updated_at_min"));
        assert!(def.sorted_by_replication_key);
        assert_eq!(def.catalog_entry()["replication_method"], "INCREMENTAL");
    }

    #[test]
    fn test_validate_rejects_bad_keys() {
        let bad_pk = StreamDefinition::new("x", "x.json", schema()).with_primary_key(&["sku"]);
        assert!(bad_pk.validate().unwrap_err().contains("primary key 'sku'"));

        let bad_rk = StreamDefinition::new("x", "x.json", schema()).incremental("title", None);
        assert!(bad_rk.validate().unwrap_err().contains("unorderable"));

        let missing_rk =
            StreamDefinition::new("x", "x.json", schema()).incremental("created_at", None);
        assert!(missing_rk.validate().unwrap_err().contains("not in the schema"));
    }
}
