use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ordering score of a sorted-set member (usually a millisecond timestamp or an id).
pub type Score = i64;

/// Field/value map stored under an object key.
pub type Object = BTreeMap<String, String>;

/// The kind of value a key currently holds.
///
/// A key holds exactly one kind at a time. Writing a different kind to an
/// occupied key fails with [`StoreError::WrongType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Plain string value.
    Scalar,
    /// Field → value map.
    Object,
    /// Members ordered by `(score, member)`.
    SortedSet,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scalar => "scalar",
            Self::Object => "object",
            Self::SortedSet => "sorted set",
        })
    }
}

/// A sorted-set member together with its score.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScoredMember {
    pub member: String,
    pub score: Score,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: Score) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Errors returned by every store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key holds a different kind of value than the operation needs.
    #[error("key {key:?} holds a {found} value, expected {expected}")]
    WrongType {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    /// An increment hit a field that does not hold an integer.
    #[error("field {field:?} of {key:?} is not an integer: {value:?}")]
    NotAnInteger {
        key: String,
        field: String,
        value: String,
    },

    /// An increment would overflow an `i64`.
    #[error("incrementing field {field:?} of {key:?} overflows")]
    Overflow { key: String, field: String },

    /// An error from rusqlite.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking task running a backend call panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Lock poisoned.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

/// Generic key-value/document store used by schema upgrades.
///
/// Keys are flat strings (`post:42`, `cid:3:pids`). Each key holds a scalar,
/// an object, or a sorted set. All calls are async so that backends can do
/// their I/O without blocking the runtime.
///
/// Operations on absent keys never fail: reads return `None` or empty
/// collections, deletes and removals return `false`.
#[async_trait]
pub trait KvStore: Send + Sync {
    // ── keys ──────────────────────────────────────────────────────────

    /// Kind of value stored under `key`, if any.
    async fn kind(&self, key: &str) -> Result<Option<ValueKind>, StoreError>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.kind(key).await?.is_some())
    }

    /// Delete a key of any kind. Returns `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Move the value under `from` to `to`, replacing whatever `to` held.
    ///
    /// Returns `false` (and changes nothing) when `from` does not exist.
    async fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError>;

    /// Delete every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    // ── scalars ───────────────────────────────────────────────────────

    /// Read a scalar value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a scalar value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    // ── objects ───────────────────────────────────────────────────────

    /// Read a whole object.
    async fn get_object(&self, key: &str) -> Result<Option<Object>, StoreError>;

    /// Read a single object field.
    async fn get_object_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .get_object(key)
            .await?
            .and_then(|mut obj| obj.remove(field)))
    }

    /// Read a subset of an object's fields. Missing fields are left out of
    /// the result; a missing object yields `None`.
    async fn get_object_fields(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Option<Object>, StoreError> {
        Ok(self.get_object(key).await?.map(|obj| {
            obj.into_iter()
                .filter(|(field, _)| fields.contains(&field.as_str()))
                .collect()
        }))
    }

    /// Merge `fields` into the object under `key`, creating it if needed.
    async fn set_object(&self, key: &str, fields: &Object) -> Result<(), StoreError>;

    /// Write a single object field.
    async fn set_object_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut fields = Object::new();
        fields.insert(field.to_string(), value.to_string());
        self.set_object(key, &fields).await
    }

    /// Remove one field. The object disappears once its last field is gone.
    async fn delete_object_field(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Add `by` to an integer field (missing counts as 0) and return the new value.
    async fn incr_object_field(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError>;

    // ── sorted sets ───────────────────────────────────────────────────

    /// Add `member` with `score`, or update the score of an existing member.
    /// Returns `true` if the member was new.
    async fn sorted_set_add(&self, key: &str, score: Score, member: &str)
        -> Result<bool, StoreError>;

    /// Remove a member. The set disappears once its last member is gone.
    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Score of a member, if present.
    async fn sorted_set_score(&self, key: &str, member: &str) -> Result<Option<Score>, StoreError>;

    /// Number of members.
    async fn sorted_set_card(&self, key: &str) -> Result<u64, StoreError>;

    /// Up to `limit` members in ascending `(score, member)` order, skipping `offset`.
    async fn sorted_set_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError>;

    /// Up to `limit` members in descending order, skipping `offset`.
    async fn sorted_set_rev_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError>;

    /// Up to `limit` members strictly after `after` in ascending order.
    ///
    /// With `after = None` this starts at the first member. This is the
    /// primitive behind cursor-based batch iteration.
    async fn sorted_set_range_after(
        &self,
        key: &str,
        after: Option<&ScoredMember>,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError>;
}
