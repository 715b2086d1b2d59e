use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use schemata_store::KvStore;

use super::int_field;
use crate::batch::{process_sorted_set, RecordOutcome, Tally};
use crate::error::StepError;
use crate::step::{MigrationStep, StepContext};
use crate::version::SchemaDate;

/// Indexes every reply under `pid:{toPid}:replies` and sets the parent's
/// `replies` counter to the size of that index.
pub struct PostReplies;

#[async_trait]
impl MigrationStep for PostReplies {
    fn target_version(&self) -> SchemaDate {
        SchemaDate::ymd(2016, 10, 14)
    }

    fn description(&self) -> &str {
        "Creating sorted sets for post replies"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
        let store = ctx.store;
        let concurrency = ctx.batch.concurrency.max(1);
        process_sorted_set(store, "posts:pid", ctx.batch, |pids| {
            link_chunk(store, concurrency, pids)
        })
        .await
    }
}

async fn link_chunk(
    store: &dyn KvStore,
    concurrency: usize,
    pids: Vec<String>,
) -> Result<Tally, StepError> {
    let linked: Vec<(RecordOutcome, Option<i64>)> = stream::iter(pids)
        .map(|pid| index_reply(store, pid))
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;

    let mut tally = Tally::default();
    let mut parents = BTreeSet::new();
    for (outcome, parent) in linked {
        tally.record(outcome);
        parents.extend(parent);
    }

    // Counters are recomputed, not incremented, so a rerun lands on the same value.
    stream::iter(parents.into_iter().map(Ok::<_, StepError>))
        .try_for_each_concurrent(concurrency, |parent| recount(store, parent))
        .await?;

    Ok(tally)
}

async fn index_reply(
    store: &dyn KvStore,
    pid: String,
) -> Result<(RecordOutcome, Option<i64>), StepError> {
    let post_key = format!("post:{pid}");
    let Some(post) = store
        .get_object_fields(&post_key, &["toPid", "timestamp"])
        .await?
    else {
        return Ok((RecordOutcome::Missing, None));
    };
    let to_pid = match int_field(&post, &post_key, "toPid")? {
        Some(to_pid) if to_pid != 0 => to_pid,
        _ => return Ok((RecordOutcome::Unchanged, None)),
    };
    let timestamp = int_field(&post, &post_key, "timestamp")?.unwrap_or(0);

    let replies_key = format!("pid:{to_pid}:replies");
    if store.sorted_set_score(&replies_key, &pid).await? == Some(timestamp) {
        return Ok((RecordOutcome::Unchanged, Some(to_pid)));
    }
    store.sorted_set_add(&replies_key, timestamp, &pid).await?;
    Ok((RecordOutcome::Updated, Some(to_pid)))
}

async fn recount(store: &dyn KvStore, parent: i64) -> Result<(), StepError> {
    let parent_key = format!("post:{parent}");
    if !store.exists(&parent_key).await? {
        return Ok(());
    }
    let count = store
        .sorted_set_card(&format!("pid:{parent}:replies"))
        .await?
        .to_string();
    if store.get_object_field(&parent_key, "replies").await?.as_deref() != Some(count.as_str()) {
        store.set_object_field(&parent_key, "replies", &count).await?;
    }
    Ok(())
}
