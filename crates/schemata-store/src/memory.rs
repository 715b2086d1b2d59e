use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::traits::{KvStore, Object, Score, ScoredMember, StoreError, ValueKind};

/// In-memory sorted set: member lookup plus `(score, member)` ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedSet {
    scores: HashMap<String, Score>,
    order: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: Score) -> bool {
        match self.scores.insert(member.to_string(), score) {
            Some(old) => {
                self.order.remove(&(old, member.to_string()));
                self.order.insert((score, member.to_string()));
                false
            }
            None => {
                self.order.insert((score, member.to_string()));
                true
            }
        }
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// True when the set has no members.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// A value as held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    Scalar(String),
    Object(Object),
    SortedSet(SortedSet),
}

impl StoredValue {
    fn kind(&self) -> ValueKind {
        match self {
            Self::Scalar(_) => ValueKind::Scalar,
            Self::Object(_) => ValueKind::Object,
            Self::SortedSet(_) => ValueKind::SortedSet,
        }
    }
}

/// In-memory storage backend.
///
/// Everything lives in one `BTreeMap` behind a lock — nothing touches disk.
/// Ideal for testing and prototyping.
///
/// # Example
///
/// ```
/// use schemata_store::{KvStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.set("schemaDate", "1474502400000").await.unwrap();
///
/// let value = store.get("schemaDate").await.unwrap();
/// assert_eq!(value.as_deref(), Some("1474502400000"));
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, StoredValue>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of keys.
    pub fn key_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    /// Copy of the whole store, for comparing states in tests and tools.
    pub fn dump(&self) -> Result<BTreeMap<String, StoredValue>, StoreError> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, StoredValue>>, StoreError> {
        self.entries.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, StoredValue>>, StoreError> {
        self.entries.write().map_err(|_| StoreError::LockPoisoned)
    }
}

fn wrong_type(key: &str, expected: ValueKind, found: &StoredValue) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

fn object_ref<'a>(
    entries: &'a BTreeMap<String, StoredValue>,
    key: &str,
) -> Result<Option<&'a Object>, StoreError> {
    match entries.get(key) {
        None => Ok(None),
        Some(StoredValue::Object(obj)) => Ok(Some(obj)),
        Some(other) => Err(wrong_type(key, ValueKind::Object, other)),
    }
}

fn object_mut<'a>(
    entries: &'a mut BTreeMap<String, StoredValue>,
    key: &str,
) -> Result<&'a mut Object, StoreError> {
    let value = entries
        .entry(key.to_string())
        .or_insert_with(|| StoredValue::Object(Object::new()));
    match value {
        StoredValue::Object(obj) => Ok(obj),
        other => Err(wrong_type(key, ValueKind::Object, other)),
    }
}

fn zset_ref<'a>(
    entries: &'a BTreeMap<String, StoredValue>,
    key: &str,
) -> Result<Option<&'a SortedSet>, StoreError> {
    match entries.get(key) {
        None => Ok(None),
        Some(StoredValue::SortedSet(set)) => Ok(Some(set)),
        Some(other) => Err(wrong_type(key, ValueKind::SortedSet, other)),
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn kind(&self, key: &str) -> Result<Option<ValueKind>, StoreError> {
        Ok(self.read()?.get(key).map(StoredValue::kind))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.write()?.remove(key).is_some())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        match entries.remove(from) {
            Some(value) => {
                entries.insert(to.to_string(), value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut entries = self.write()?;
        let doomed: Vec<String> = entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.read()?.get(key) {
            None => Ok(None),
            Some(StoredValue::Scalar(value)) => Ok(Some(value.clone())),
            Some(other) => Err(wrong_type(key, ValueKind::Scalar, other)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.write()?;
        match entries.get(key) {
            None | Some(StoredValue::Scalar(_)) => {
                entries.insert(key.to_string(), StoredValue::Scalar(value.to_string()));
                Ok(())
            }
            Some(other) => Err(wrong_type(key, ValueKind::Scalar, other)),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Option<Object>, StoreError> {
        let entries = self.read()?;
        Ok(object_ref(&entries, key)?.cloned())
    }

    async fn set_object(&self, key: &str, fields: &Object) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut entries = self.write()?;
        let obj = object_mut(&mut entries, key)?;
        obj.extend(fields.iter().map(|(f, v)| (f.clone(), v.clone())));
        Ok(())
    }

    async fn delete_object_field(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        let Some(obj) = object_ref(&entries, key)? else {
            return Ok(false);
        };
        if !obj.contains_key(field) {
            return Ok(false);
        }
        let obj = object_mut(&mut entries, key)?;
        obj.remove(field);
        if obj.is_empty() {
            entries.remove(key);
        }
        Ok(true)
    }

    async fn incr_object_field(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let mut entries = self.write()?;
        let obj = object_mut(&mut entries, key)?;
        let current = match obj.get(field) {
            None => 0,
            Some(value) => value.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                key: key.to_string(),
                field: field.to_string(),
                value: value.clone(),
            })?,
        };
        let next = current.checked_add(by).ok_or_else(|| StoreError::Overflow {
            key: key.to_string(),
            field: field.to_string(),
        })?;
        obj.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn sorted_set_add(
        &self,
        key: &str,
        score: Score,
        member: &str,
    ) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        let value = entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::SortedSet(SortedSet::default()));
        match value {
            StoredValue::SortedSet(set) => Ok(set.insert(member, score)),
            other => Err(wrong_type(key, ValueKind::SortedSet, other)),
        }
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        let (removed, emptied) = match entries.get_mut(key) {
            None => return Ok(false),
            Some(StoredValue::SortedSet(set)) => (set.remove(member), set.is_empty()),
            Some(other) => return Err(wrong_type(key, ValueKind::SortedSet, other)),
        };
        if emptied {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn sorted_set_score(&self, key: &str, member: &str) -> Result<Option<Score>, StoreError> {
        let entries = self.read()?;
        Ok(zset_ref(&entries, key)?.and_then(|set| set.scores.get(member).copied()))
    }

    async fn sorted_set_card(&self, key: &str) -> Result<u64, StoreError> {
        let entries = self.read()?;
        Ok(zset_ref(&entries, key)?.map_or(0, |set| set.len() as u64))
    }

    async fn sorted_set_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let entries = self.read()?;
        Ok(zset_ref(&entries, key)?
            .map(|set| {
                set.order
                    .iter()
                    .skip(offset)
                    .take(limit)
                    .map(|(score, member)| ScoredMember::new(member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn sorted_set_rev_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let entries = self.read()?;
        Ok(zset_ref(&entries, key)?
            .map(|set| {
                set.order
                    .iter()
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .map(|(score, member)| ScoredMember::new(member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn sorted_set_range_after(
        &self,
        key: &str,
        after: Option<&ScoredMember>,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let entries = self.read()?;
        let Some(set) = zset_ref(&entries, key)? else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(cursor) => Bound::Excluded((cursor.score, cursor.member.clone())),
            None => Bound::Unbounded,
        };
        Ok(set
            .order
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(score, member)| ScoredMember::new(member.clone(), *score))
            .collect())
    }
}
