//! Cursor-driven iteration over large sorted-set indexes.
//!
//! Steps never load a whole index into memory. They walk it in chunks of
//! `batch_size` members, resuming each read strictly after the last
//! `(score, member)` pair seen, so members added or removed behind the
//! cursor never cause a skip or a repeat.

use std::future::Future;
use std::ops::AddAssign;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use schemata_store::{KvStore, ScoredMember, StoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StepError;

/// How a step walks an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Members fetched per chunk.
    pub batch_size: usize,
    /// Records processed concurrently within a chunk.
    pub concurrency: usize,
    /// Pause between chunks, to leave headroom for live traffic.
    pub interval: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 10,
            interval: None,
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The record was rewritten.
    Updated,
    /// The record was already in the target shape.
    Unchanged,
    /// The index referenced a record that no longer exists.
    Missing,
}

/// Running counters for a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub processed: u64,
    pub updated: u64,
    pub missing: u64,
}

impl Tally {
    pub fn record(&mut self, outcome: RecordOutcome) {
        self.processed += 1;
        match outcome {
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Missing => self.missing += 1,
            RecordOutcome::Unchanged => {}
        }
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.updated += rhs.updated;
        self.missing += rhs.missing;
    }
}

impl FromIterator<RecordOutcome> for Tally {
    fn from_iter<I: IntoIterator<Item = RecordOutcome>>(iter: I) -> Self {
        let mut tally = Tally::default();
        for outcome in iter {
            tally.record(outcome);
        }
        tally
    }
}

/// Keyset cursor over one sorted set.
pub struct SortedSetCursor<'a> {
    store: &'a dyn KvStore,
    key: &'a str,
    batch_size: usize,
    last: Option<ScoredMember>,
    done: bool,
}

impl<'a> SortedSetCursor<'a> {
    pub fn new(store: &'a dyn KvStore, key: &'a str, batch_size: usize) -> Self {
        Self {
            store,
            key,
            batch_size: batch_size.max(1),
            last: None,
            done: false,
        }
    }

    /// Next chunk in ascending score order, or `None` once the set is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<ScoredMember>>, StoreError> {
        if self.done {
            return Ok(None);
        }
        let chunk = self
            .store
            .sorted_set_range_after(self.key, self.last.as_ref(), self.batch_size)
            .await?;
        if chunk.len() < self.batch_size {
            self.done = true;
        }
        match chunk.last() {
            Some(last) => {
                self.last = Some(last.clone());
                Ok(Some(chunk))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Feed every member of `key` to `f`, one chunk of ids at a time.
///
/// Chunks run sequentially; the first error aborts the walk.
pub async fn process_sorted_set<F, Fut>(
    store: &dyn KvStore,
    key: &str,
    opts: &BatchOptions,
    mut f: F,
) -> Result<Tally, StepError>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Tally, StepError>>,
{
    let mut cursor = SortedSetCursor::new(store, key, opts.batch_size);
    let mut tally = Tally::default();
    let mut chunks = 0u64;

    while let Some(chunk) = cursor.next_batch().await? {
        if chunks > 0 {
            if let Some(interval) = opts.interval {
                tokio::time::sleep(interval).await;
            }
        }
        let ids = chunk.into_iter().map(|m| m.member).collect();
        tally += f(ids).await?;
        chunks += 1;
        debug!(key, chunks, processed = tally.processed, "batch complete");
    }

    Ok(tally)
}

/// Run `f` on every member of `key`, up to `opts.concurrency` at a time.
pub async fn for_each_member<F, Fut>(
    store: &dyn KvStore,
    key: &str,
    opts: &BatchOptions,
    f: F,
) -> Result<Tally, StepError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<RecordOutcome, StepError>>,
{
    let concurrency = opts.concurrency.max(1);
    let f = &f;
    process_sorted_set(store, key, opts, move |ids| async move {
        stream::iter(ids)
            .map(f)
            .buffer_unordered(concurrency)
            .try_fold(Tally::default(), |mut tally, outcome| async move {
                tally.record(outcome);
                Ok(tally)
            })
            .await
    })
    .await
}
