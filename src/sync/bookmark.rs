//! Replication state and bookmark ordering
//!
//! Persisted form:
//! ```json
//! {
//!   "bookmarks": {
//!     "products": {
//!       "replication_key": "updated_at",
//!       "value": "2024-03-01T11:00:00Z",
//!       "keys_at_value": [632910392, 921728736]
//!     }
//!   }
//! }
//! ```
//!
//! Replication values are often only second-granular, so several records
//! can share the bookmark value. `keys_at_value` lists the primary keys of
//! the records already emitted at exactly that value; a resumed sync
//! re-reads the bookmark value and skips only those.

use crate::catalog::{FieldType, StreamDefinition};
use crate::transform::{Record, format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Last-seen replication key value of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BookmarkValue {
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

impl BookmarkValue {
    /// Read a bookmark value of `field_type` from an already-coerced field.
    pub fn from_value(value: &Value, field_type: FieldType) -> Option<Self> {
        match field_type {
            FieldType::Integer => value.as_i64().map(Self::Integer),
            FieldType::DateTime => value.as_str().and_then(parse_timestamp).map(Self::Timestamp),
            _ => None,
        }
    }

    /// The replication key value of `record`, if the stream is incremental.
    pub fn from_record(record: &Record, definition: &StreamDefinition) -> Option<Self> {
        let key = definition.replication_key.as_deref()?;
        let field_type = definition.replication_key_type()?;
        Self::from_value(record.get(key)?, field_type)
    }

    /// Rendering used for filter-since query parameters.
    pub fn to_query_value(&self) -> String {
        match self {
            Self::Integer(i) => i.to_string(),
            Self::Timestamp(ts) => format_timestamp(ts),
        }
    }
}

/// Values of different kinds are unordered.
impl PartialOrd for BookmarkValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.partial_cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookmarkValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_query_value())
    }
}

/// Primary key of `record`: the bare value for a single key field, an array
/// for a composite key. `None` if any key field is missing or null.
pub fn record_key(record: &Record, definition: &StreamDefinition) -> Option<Value> {
    let mut parts = Vec::with_capacity(definition.primary_key.len());
    for field in &definition.primary_key {
        match record.get(field) {
            Some(Value::Null) | None => return None,
            Some(value) => parts.push(value.clone()),
        }
    }
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Value::Array(parts)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBookmark {
    pub replication_key: String,
    pub value: BookmarkValue,
    /// Primary keys of the records emitted with exactly `value`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys_at_value: Vec<Value>,
}

impl StreamBookmark {
    pub fn new(replication_key: impl Into<String>, value: BookmarkValue) -> Self {
        Self {
            replication_key: replication_key.into(),
            value,
            keys_at_value: Vec::new(),
        }
    }

    pub fn with_keys(mut self, keys: Vec<Value>) -> Self {
        self.keys_at_value = keys;
        self
    }

    /// Add `keys` not already listed. Returns `true` if any was new.
    fn absorb_keys(&mut self, keys: &[Value]) -> bool {
        let before = self.keys_at_value.len();
        for key in keys {
            if !self.keys_at_value.contains(key) {
                self.keys_at_value.push(key.clone());
            }
        }
        self.keys_at_value.len() > before
    }
}

/// Bookmarks of every stream, keyed by stream name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationState {
    #[serde(default)]
    bookmarks: BTreeMap<String, StreamBookmark>,
}

impl ReplicationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stream: &str) -> Option<&StreamBookmark> {
        self.bookmarks.get(stream)
    }

    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.bookmarks.keys().map(String::as_str)
    }

    /// Move a stream's bookmark forward.
    ///
    /// Returns `true` when the state changed. Older values never replace a
    /// newer one, and neither does a value of a different kind. An equal
    /// value adds its keys to the stored ones. A bookmark on a different
    /// replication key replaces the old one.
    pub fn advance(&mut self, stream: &str, bookmark: StreamBookmark) -> bool {
        match self.bookmarks.get_mut(stream) {
            Some(existing) if existing.replication_key == bookmark.replication_key => {
                match bookmark.value.partial_cmp(&existing.value) {
                    Some(Ordering::Greater) => {}
                    Some(Ordering::Equal) => return existing.absorb_keys(&bookmark.keys_at_value),
                    _ => return false,
                }
            }
            Some(existing) => {
                log::warn!(
                    "Replication key of '{}' changed from '{}' to '{}', resetting bookmark",
                    stream,
                    existing.replication_key,
                    bookmark.replication_key
                );
            }
            None => {}
        }
        self.bookmarks.insert(stream.to_string(), bookmark);
        true
    }

    /// Advance every bookmark of `other` into this state.
    pub fn merge(&mut self, other: &ReplicationState) {
        for (stream, bookmark) in &other.bookmarks {
            self.advance(stream, bookmark.clone());
        }
    }
}

/// Lower bound on replication values a stream should emit.
#[derive(Debug, Clone, PartialEq)]
pub enum LowerBound {
    /// No bookmark and no start date: everything
    Unbounded,
    /// Configured start date: values at or after it
    Inclusive(BookmarkValue),
    /// Stored bookmark: values after it, and values equal to it whose key
    /// is not in `seen`
    Resume {
        value: BookmarkValue,
        seen: Vec<Value>,
    },
}

impl LowerBound {
    /// Derive the bound from a stored bookmark or, failing that, the
    /// configured start date.
    pub fn resolve(
        definition: &StreamDefinition,
        bookmark: Option<&StreamBookmark>,
        start_date: Option<DateTime<Utc>>,
    ) -> Self {
        let Some(key) = definition.replication_key.as_deref() else {
            return Self::Unbounded;
        };
        if let Some(bookmark) = bookmark.filter(|b| b.replication_key == key) {
            return Self::Resume {
                value: bookmark.value.clone(),
                seen: bookmark.keys_at_value.clone(),
            };
        }
        match (definition.replication_key_type(), start_date) {
            (Some(FieldType::DateTime), Some(start)) => {
                Self::Inclusive(BookmarkValue::Timestamp(start))
            }
            _ => Self::Unbounded,
        }
    }

    pub fn value(&self) -> Option<&BookmarkValue> {
        match self {
            Self::Unbounded => None,
            Self::Inclusive(v) | Self::Resume { value: v, .. } => Some(v),
        }
    }

    /// Whether a record with replication value `value` and primary key
    /// `key` is new.
    ///
    /// Records without a comparable value are admitted, and so are records
    /// at the bookmark value without a key.
    pub fn admits(&self, value: Option<&BookmarkValue>, key: Option<&Value>) -> bool {
        let Some(value) = value else {
            return true;
        };
        match self {
            Self::Unbounded => true,
            Self::Inclusive(bound) => value.partial_cmp(bound) != Some(Ordering::Less),
            Self::Resume { value: bound, seen } => match value.partial_cmp(bound) {
                Some(Ordering::Less) => false,
                Some(Ordering::Equal) => key.is_none_or(|k| !seen.contains(k)),
                _ => true,
            },
        }
    }
}

/// Running maximum of replication values seen during a sync, with the keys
/// of the records at that maximum.
#[derive(Debug, Clone, Default)]
pub struct BookmarkTracker {
    max: Option<BookmarkValue>,
    keys: Vec<Value>,
}

impl BookmarkTracker {
    pub fn observe(&mut self, value: BookmarkValue, key: Option<Value>) {
        let order = match &self.max {
            None => Some(Ordering::Greater),
            Some(current) => value.partial_cmp(current),
        };
        match order {
            Some(Ordering::Greater) => {
                self.max = Some(value);
                self.keys.clear();
            }
            Some(Ordering::Equal) => {}
            _ => return,
        }
        if let Some(key) = key.filter(|k| !self.keys.contains(k)) {
            self.keys.push(key);
        }
    }

    pub fn max(&self) -> Option<&BookmarkValue> {
        self.max.as_ref()
    }

    /// Keys of the records observed at [`max`](Self::max).
    pub fn keys(&self) -> &[Value] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(raw: &str) -> BookmarkValue {
        BookmarkValue::Timestamp(parse_timestamp(raw).unwrap())
    }

    fn bookmark(raw: &str) -> StreamBookmark {
        StreamBookmark::new("updated_at", ts(raw))
    }

    fn record(data: Value) -> Record {
        Record {
            stream: "inventory_levels".to_string(),
            schema_version: 1,
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_ordering() {
        assert!(ts("2024-01-02T00:00:00Z") > ts("2024-01-01T00:00:00Z"));
        assert!(BookmarkValue::Integer(5) > BookmarkValue::Integer(4));
        assert_eq!(
            BookmarkValue::Integer(5).partial_cmp(&ts("2024-01-01T00:00:00Z")),
            None
        );
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut state = ReplicationState::new();
        assert!(state.advance("products", bookmark("2024-01-02T00:00:00Z")));
        assert!(!state.advance("products", bookmark("2024-01-01T00:00:00Z")));
        assert!(!state.advance("products", bookmark("2024-01-02T00:00:00Z")));
        assert!(!state.advance(
            "products",
            StreamBookmark::new("updated_at", BookmarkValue::Integer(9))
        ));
        assert_eq!(
            state.get("products").unwrap().value,
            ts("2024-01-02T00:00:00Z")
        );
        assert!(state.advance("products", bookmark("2024-01-03T00:00:00Z")));
    }

    #[test]
    fn test_replication_key_change_resets() {
        let mut state = ReplicationState::new();
        state.advance("collects", bookmark("2024-01-02T00:00:00Z"));
        assert!(state.advance(
            "collects",
            StreamBookmark::new("id", BookmarkValue::Integer(1))
        ));
        assert_eq!(state.get("collects").unwrap().replication_key, "id");
    }

    #[test]
    fn test_serde_shape() {
        let mut state = ReplicationState::new();
        state.advance(
            "products",
            bookmark("2024-03-01T11:00:00Z").with_keys(vec![json!(5), json!(8)]),
        );
        state.advance(
            "events",
            StreamBookmark::new("id", BookmarkValue::Integer(42)),
        );

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            value,
            json!({
                "bookmarks": {
                    "events": {"replication_key": "id", "value": 42},
                    "products": {
                        "replication_key": "updated_at",
                        "value": "2024-03-01T11:00:00Z",
                        "keys_at_value": [5, 8]
                    }
                }
            })
        );

        let back: ReplicationState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);

        let empty: ReplicationState = serde_json::from_value(json!({})).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_merge() {
        let mut base = ReplicationState::new();
        base.advance("products", bookmark("2024-01-05T00:00:00Z"));
        let mut update = ReplicationState::new();
        update.advance("products", bookmark("2024-01-01T00:00:00Z"));
        update.advance("locations", bookmark("2024-01-01T00:00:00Z"));

        base.merge(&update);
        assert_eq!(base.len(), 2);
        assert_eq!(base.get("products").unwrap(), &bookmark("2024-01-05T00:00:00Z"));
    }

    #[test]
    fn test_lower_bound_admits() {
        let at = ts("2024-01-02T00:00:00Z");
        let before = ts("2024-01-01T00:00:00Z");
        let after = ts("2024-01-03T00:00:00Z");

        let inclusive = LowerBound::Inclusive(at.clone());
        assert!(inclusive.admits(Some(&at), None));
        assert!(inclusive.admits(Some(&after), None));
        assert!(!inclusive.admits(Some(&before), None));

        let resume = LowerBound::Resume {
            value: at.clone(),
            seen: vec![json!(1), json!(2)],
        };
        assert!(!resume.admits(Some(&at), Some(&json!(1))));
        assert!(resume.admits(Some(&at), Some(&json!(3))));
        assert!(resume.admits(Some(&at), None));
        assert!(resume.admits(Some(&after), Some(&json!(1))));
        assert!(!resume.admits(Some(&before), Some(&json!(9))));
        assert!(resume.admits(None, None));

        assert!(LowerBound::Unbounded.admits(Some(&before), None));
    }

    #[test]
    fn test_resume_bound_from_bookmark() {
        let def = StreamDefinition::new(
            "products",
            "products.json",
            crate::catalog::Schema::new(vec![
                crate::catalog::Field::new("id", FieldType::Integer),
                crate::catalog::Field::new("updated_at", FieldType::DateTime),
            ]),
        )
        .incremental("updated_at", Some("updated_at_min"));
        let stored = bookmark("2024-01-02T00:00:00Z").with_keys(vec![json!(7)]);

        let bound = LowerBound::resolve(&def, Some(&stored), None);
        assert_eq!(bound.value(), Some(&ts("2024-01-02T00:00:00Z")));
        assert!(!bound.admits(bound.value(), Some(&json!(7))));
        assert!(bound.admits(bound.value(), Some(&json!(8))));

        let other_key = StreamBookmark::new("created_at", ts("2024-01-02T00:00:00Z"));
        assert_eq!(LowerBound::resolve(&def, Some(&other_key), None), LowerBound::Unbounded);
    }

    #[test]
    fn test_record_key() {
        let def = StreamDefinition::new(
            "inventory_levels",
            "inventory_levels.json",
            crate::catalog::Schema::new(vec![
                crate::catalog::Field::new("inventory_item_id", FieldType::Integer),
                crate::catalog::Field::new("location_id", FieldType::Integer),
            ]),
        );
        let single = record(json!({"id": 4, "location_id": 2}));
        assert_eq!(record_key(&single, &def), Some(json!(4)));

        let def = def.with_primary_key(&["inventory_item_id", "location_id"]);
        let composite = record(json!({"inventory_item_id": 4, "location_id": 2}));
        assert_eq!(record_key(&composite, &def), Some(json!([4, 2])));
        let partial = record(json!({"inventory_item_id": 4, "location_id": null}));
        assert_eq!(record_key(&partial, &def), None);
    }

    #[test]
    fn test_advance_merges_keys_at_equal_value() {
        let mut state = ReplicationState::new();
        state.advance(
            "products",
            bookmark("2024-01-02T00:00:00Z").with_keys(vec![json!(2)]),
        );
        assert!(state.advance(
            "products",
            bookmark("2024-01-02T00:00:00Z").with_keys(vec![json!(3), json!(2)])
        ));
        assert!(!state.advance(
            "products",
            bookmark("2024-01-02T00:00:00Z").with_keys(vec![json!(3)])
        ));
        assert_eq!(
            state.get("products").unwrap().keys_at_value,
            vec![json!(2), json!(3)]
        );

        // a newer value starts a fresh key list
        assert!(state.advance(
            "products",
            bookmark("2024-01-03T00:00:00Z").with_keys(vec![json!(9)])
        ));
        assert_eq!(state.get("products").unwrap().keys_at_value, vec![json!(9)]);
    }

    #[test]
    fn test_streams_in_name_order() {
        let mut state = ReplicationState::new();
        state.advance("products", bookmark("2024-01-01T00:00:00Z"));
        state.advance("orders", bookmark("2024-01-01T00:00:00Z"));
        state.advance("customers", bookmark("2024-01-01T00:00:00Z"));
        assert_eq!(
            state.streams().collect::<Vec<_>>(),
            vec!["customers", "orders", "products"]
        );
    }

    #[test]
    fn test_tracker_keeps_max() {
        let mut tracker = BookmarkTracker::default();
        assert!(tracker.max().is_none());
        tracker.observe(ts("2024-01-02T00:00:00Z"), Some(json!(1)));
        tracker.observe(ts("2024-01-01T00:00:00Z"), Some(json!(2)));
        tracker.observe(ts("2024-01-03T00:00:00Z"), Some(json!(3)));
        tracker.observe(ts("2024-01-03T00:00:00Z"), Some(json!(4)));
        tracker.observe(ts("2024-01-03T00:00:00Z"), Some(json!(4)));
        assert_eq!(tracker.max(), Some(&ts("2024-01-03T00:00:00Z")));
        assert_eq!(tracker.keys(), &[json!(3), json!(4)]);
    }
}
