use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::StoreError;
use crate::models::{Record, RecordId};

pub const DEFAULT_SORT: &str = "-created_at";
pub const DEFAULT_LIMIT: usize = 100;

/// Parsed sort key: a field name, `-` prefix for descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self { field: field.to_string(), descending: true },
            None => Self { field: raw.to_string(), descending: false },
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::parse(DEFAULT_SORT)
    }
}

/// Generic entity store: named collections of schema-less records.
///
/// Collections are created lazily by any reference to their type name and
/// keep insertion order. Each operation holds the lock for its whole
/// duration, which also makes id assignment collision-free.
#[derive(Default)]
pub struct EntityStore {
    collections: RwLock<HashMap<String, Vec<Record>>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` over the collection, creating it empty if unknown.
    fn read_collection<T>(&self, entity: &str, f: impl FnOnce(&[Record]) -> T) -> T {
        {
            let collections = self.collections.read();
            if let Some(records) = collections.get(entity) {
                return f(records);
            }
        }
        let mut collections = self.collections.write();
        f(collections.entry(entity.to_string()).or_default())
    }

    /// Up to `limit` records ordered by `sort`. Never fails.
    pub fn list(&self, entity: &str, sort: &SortSpec, limit: usize) -> Vec<Record> {
        let records = self.read_collection(entity, |records| records.to_vec());
        sort_records(records, sort).into_iter().take(limit).collect()
    }

    pub fn get(&self, entity: &str, id: &RecordId) -> Result<Record, StoreError> {
        self.read_collection(entity, |records| {
            records
                .iter()
                .find(|r| r.id().is_some_and(|v| id.matches(v)))
                .cloned()
                .ok_or_else(|| not_found(entity, id))
        })
    }

    /// Exact-equality match on every predicate key, then sorted and limited
    /// like [`EntityStore::list`].
    pub fn filter(
        &self,
        entity: &str,
        predicate: &Record,
        sort: &SortSpec,
        limit: usize,
    ) -> Vec<Record> {
        let matched = self.read_collection(entity, |records| {
            records
                .iter()
                .filter(|r| matches_predicate(r, predicate))
                .cloned()
                .collect::<Vec<_>>()
        });
        sort_records(matched, sort).into_iter().take(limit).collect()
    }

    /// Assigns `max(existing integer ids) + 1` when `id` is absent and stamps
    /// `created_at` when no creation stamp is present. Fails with
    /// `IdsExhausted` once the largest id is `i64::MAX`.
    pub fn create(&self, entity: &str, mut record: Record) -> Result<Record, StoreError> {
        let mut collections = self.collections.write();
        let records = collections.entry(entity.to_string()).or_default();

        match record.id() {
            None => {
                let max = records.iter().filter_map(|r| r.id().and_then(Value::as_i64)).max();
                let next = match max {
                    None => 1,
                    Some(max) => max
                        .checked_add(1)
                        .ok_or_else(|| StoreError::IdsExhausted { entity: entity.to_string() })?,
                };
                record.insert(Record::ID, json!(next));
            }
            Some(value) => {
                let id = RecordId::from_value(value)
                    .ok_or_else(|| StoreError::InvalidId { entity: entity.to_string() })?;
                if records.iter().any(|r| r.id().is_some_and(|v| id.matches(v))) {
                    return Err(StoreError::DuplicateId { entity: entity.to_string(), id });
                }
            }
        }
        if !record.has_created_at() {
            record.insert(Record::CREATED_AT, json!(Utc::now().to_rfc3339()));
        }

        records.push(record.clone());
        Ok(record)
    }

    /// Shallow merge of `partial` over the stored record.
    pub fn update(
        &self,
        entity: &str,
        id: &RecordId,
        partial: Record,
    ) -> Result<Record, StoreError> {
        let mut collections = self.collections.write();
        let records = collections.entry(entity.to_string()).or_default();
        let record = records
            .iter_mut()
            .find(|r| r.id().is_some_and(|v| id.matches(v)))
            .ok_or_else(|| not_found(entity, id))?;

        record.merge(partial);
        if !record.has_updated_at() {
            record.insert(Record::UPDATED_AT, json!(Utc::now().to_rfc3339()));
        }
        Ok(record.clone())
    }

    /// Removes the first matching record and returns it.
    pub fn delete(&self, entity: &str, id: &RecordId) -> Result<Record, StoreError> {
        let mut collections = self.collections.write();
        let records = collections.entry(entity.to_string()).or_default();
        let pos = records
            .iter()
            .position(|r| r.id().is_some_and(|v| id.matches(v)))
            .ok_or_else(|| not_found(entity, id))?;
        Ok(records.remove(pos))
    }

    pub fn count(&self, entity: &str) -> usize {
        self.collections.read().get(entity).map_or(0, Vec::len)
    }

    /// `(type name, record count)` for every known collection, by name.
    pub fn collection_sizes(&self) -> Vec<(String, usize)> {
        let mut sizes: Vec<(String, usize)> = self
            .collections
            .read()
            .iter()
            .map(|(name, records)| (name.clone(), records.len()))
            .collect();
        sizes.sort();
        sizes
    }
}

fn not_found(entity: &str, id: &RecordId) -> StoreError {
    StoreError::NotFound { entity: entity.to_string(), id: id.clone() }
}

fn matches_predicate(record: &Record, predicate: &Record) -> bool {
    predicate
        .as_map()
        .iter()
        .all(|(key, expected)| record.get(key) == Some(expected))
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum KeyKind {
    Number,
    Text,
    Bool,
}

fn key_kind(value: &Value) -> Option<KeyKind> {
    match value {
        Value::Number(_) => Some(KeyKind::Number),
        Value::String(_) => Some(KeyKind::Text),
        Value::Bool(_) => Some(KeyKind::Bool),
        _ => None,
    }
}

fn compare_keys(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&y.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Stable sort on the sort field, falling back to the record's `id` when the
/// field is missing. Mixed or unorderable key kinds keep insertion order.
fn sort_records(records: Vec<Record>, sort: &SortSpec) -> Vec<Record> {
    let keys: Vec<Option<Value>> = records
        .iter()
        .map(|r| r.get(&sort.field).or_else(|| r.id()).cloned())
        .collect();

    let mut kind = None;
    for key in &keys {
        let Some(k) = key.as_ref().and_then(key_kind) else {
            return records;
        };
        match kind {
            None => kind = Some(k),
            Some(existing) if existing != k => return records,
            _ => {}
        }
    }

    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        let (Some(ka), Some(kb)) = (&keys[a], &keys[b]) else {
            return Ordering::Equal;
        };
        let ord = compare_keys(ka, kb);
        if sort.descending {
            ord.reverse()
        } else {
            ord
        }
    });

    let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn rec(value: Value) -> Record {
        Record::from_value(value).expect("object literal")
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().filter_map(|r| r.id().and_then(Value::as_i64)).collect()
    }

    #[test]
    fn test_create_assigns_max_plus_one() {
        let store = EntityStore::new();
        let first = store.create("Course", rec(json!({"title": "Intro"}))).unwrap();
        assert_eq!(first.id(), Some(&json!(1)));

        store.create("Course", rec(json!({"id": 10, "title": "Explicit"}))).unwrap();
        let next = store.create("Course", rec(json!({"title": "After"}))).unwrap();
        assert_eq!(next.id(), Some(&json!(11)));
        assert!(next.get(Record::CREATED_AT).is_some());
    }

    #[test]
    fn test_create_keeps_caller_created_at() {
        let store = EntityStore::new();
        let r = store.create("Note", rec(json!({"createdAt": "2024-01-01"}))).unwrap();
        assert!(r.get(Record::CREATED_AT).is_none());
        assert_eq!(r.get(Record::CREATED_AT_ALT), Some(&json!("2024-01-01")));
    }

    #[test]
    fn test_create_rejects_duplicate_and_bad_ids() {
        let store = EntityStore::new();
        store.create("Course", rec(json!({"id": 3}))).unwrap();
        let err = store.create("Course", rec(json!({"id": 3}))).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
        let err = store.create("Course", rec(json!({"id": [1]}))).unwrap_err();
        assert!(matches!(err, StoreError::InvalidId { .. }));
        assert_eq!(store.count("Course"), 1);
    }

    #[test]
    fn test_create_after_max_id_is_rejected() {
        let store = EntityStore::new();
        store.create("T", rec(json!({"id": i64::MAX}))).unwrap();
        let err = store.create("T", Record::new()).unwrap_err();
        assert_eq!(err, StoreError::IdsExhausted { entity: "T".into() });
        assert_eq!(store.count("T"), 1);

        // The lock is released and explicit ids still work.
        let explicit = store.create("T", rec(json!({"id": "named"}))).unwrap();
        assert_eq!(explicit.id(), Some(&json!("named")));
    }

    #[test]
    fn test_concurrent_creates_get_distinct_ids() {
        const WORKERS: usize = 8;
        const PER_WORKER: usize = 25;

        let store = Arc::new(EntityStore::new());
        let handles: Vec<_> = (0..WORKERS)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..PER_WORKER)
                        .map(|n| {
                            let record = rec(json!({"worker": worker, "n": n}));
                            let created = store.create("Course", record).unwrap();
                            created.id().and_then(Value::as_i64).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let unique: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());

        all.sort_unstable();
        let expected: Vec<i64> = (1..=(WORKERS * PER_WORKER) as i64).collect();
        assert_eq!(all, expected);
        assert_eq!(store.count("Course"), WORKERS * PER_WORKER);
    }

    #[test]
    fn test_update_is_shallow_merge() {
        let store = EntityStore::new();
        let created = store.create("Thing", rec(json!({"a": 1, "b": 2}))).unwrap();
        let id = RecordId::from_value(created.id().unwrap()).unwrap();

        let updated = store.update("Thing", &id, rec(json!({"b": 3}))).unwrap();
        assert_eq!(updated.get("a"), Some(&json!(1)));
        assert_eq!(updated.get("b"), Some(&json!(3)));
        assert!(updated.get(Record::UPDATED_AT).is_some());
        assert_eq!(store.get("Thing", &id).unwrap(), updated);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let store = EntityStore::new();
        let err = store.update("Thing", &RecordId::Int(42), Record::new()).unwrap_err();
        assert_eq!(err, StoreError::NotFound { entity: "Thing".into(), id: RecordId::Int(42) });
    }

    #[test]
    fn test_delete_then_get_is_not_found() {
        let store = EntityStore::new();
        store.create("Thing", rec(json!({"x": 1}))).unwrap();
        let removed = store.delete("Thing", &RecordId::Int(1)).unwrap();
        assert_eq!(removed.get("x"), Some(&json!(1)));
        assert!(matches!(
            store.get("Thing", &RecordId::Int(1)),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.delete("Thing", &RecordId::Int(1)).is_err());
    }

    #[test]
    fn test_list_descending_ids() {
        let store = EntityStore::new();
        for _ in 0..5 {
            store.create("Course", Record::new()).unwrap();
        }
        let listed = store.list("Course", &SortSpec::parse("-id"), DEFAULT_LIMIT);
        assert_eq!(ids(&listed), vec![5, 4, 3, 2, 1]);

        let limited = store.list("Course", &SortSpec::parse("id"), 2);
        assert_eq!(ids(&limited), vec![1, 2]);
    }

    #[test]
    fn test_missing_sort_field_uses_id() {
        let store = EntityStore::new();
        store.create("T", rec(json!({"rank": 2}))).unwrap(); // id 1
        store.create("T", rec(json!({}))).unwrap(); // id 2, sorts as rank 2
        store.create("T", rec(json!({"rank": 0}))).unwrap(); // id 3
        let listed = store.list("T", &SortSpec::parse("rank"), DEFAULT_LIMIT);
        assert_eq!(ids(&listed), vec![3, 1, 2]);
    }

    #[test]
    fn test_incomparable_sort_keeps_insertion_order() {
        let store = EntityStore::new();
        store.create("T", rec(json!({"k": "b"}))).unwrap();
        store.create("T", rec(json!({"k": 1}))).unwrap();
        store.create("T", rec(json!({"k": "a"}))).unwrap();
        let listed = store.list("T", &SortSpec::parse("k"), DEFAULT_LIMIT);
        assert_eq!(ids(&listed), vec![1, 2, 3]);
    }

    #[test]
    fn test_filter_exact_match() {
        let store = EntityStore::new();
        store.create("Enrollment", rec(json!({"studentId": 3, "courseId": 1}))).unwrap();
        store.create("Enrollment", rec(json!({"studentId": 4, "courseId": 1}))).unwrap();
        store.create("Enrollment", rec(json!({"studentId": 3, "courseId": 2}))).unwrap();

        let by_student =
            store.filter("Enrollment", &rec(json!({"studentId": 3})), &SortSpec::parse("id"), 10);
        assert_eq!(ids(&by_student), vec![1, 3]);

        let both = store.filter(
            "Enrollment",
            &rec(json!({"studentId": 3, "courseId": 2})),
            &SortSpec::parse("id"),
            10,
        );
        assert_eq!(ids(&both), vec![3]);

        let string_mismatch =
            store.filter("Enrollment", &rec(json!({"studentId": "3"})), &SortSpec::default(), 10);
        assert!(string_mismatch.is_empty());
    }

    #[test]
    fn test_filter_empty_predicate_returns_all_within_limit() {
        let store = EntityStore::new();
        for _ in 0..4 {
            store.create("T", Record::new()).unwrap();
        }
        assert_eq!(store.filter("T", &Record::new(), &SortSpec::parse("id"), 10).len(), 4);
        assert_eq!(store.filter("T", &Record::new(), &SortSpec::parse("id"), 3).len(), 3);
    }

    #[test]
    fn test_unknown_type_is_created_empty() {
        let store = EntityStore::new();
        assert!(store.list("Nothing", &SortSpec::default(), DEFAULT_LIMIT).is_empty());
        assert_eq!(store.collection_sizes(), vec![("Nothing".to_string(), 0)]);
    }

    #[test]
    fn test_string_ids() {
        let store = EntityStore::new();
        store.create("Setting", rec(json!({"id": "theme", "value": "dark"}))).unwrap();
        let got = store.get("Setting", &RecordId::parse("theme")).unwrap();
        assert_eq!(got.get("value"), Some(&json!("dark")));
        // A later auto id ignores non-integer ids.
        let auto = store.create("Setting", Record::new()).unwrap();
        assert_eq!(auto.id(), Some(&json!(1)));
    }
}
