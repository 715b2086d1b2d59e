use async_trait::async_trait;
use schemata_store::KvStore;

use super::int_field;
use crate::batch::{for_each_member, RecordOutcome, Tally};
use crate::error::StepError;
use crate::step::{MigrationStep, StepContext};
use crate::version::SchemaDate;

/// Moves pinned topics out of the regular category indexes into
/// `cid:{cid}:tids:pinned`.
pub struct PinnedTopics;

#[async_trait]
impl MigrationStep for PinnedTopics {
    fn target_version(&self) -> SchemaDate {
        SchemaDate::ymd(2016, 11, 25)
    }

    fn description(&self) -> &str {
        "Creating sorted sets for pinned topics"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
        let store = ctx.store;
        let pinned_at = ctx.started_at;
        for_each_member(store, "topics:tid", ctx.batch, |tid| {
            move_if_pinned(store, tid, pinned_at)
        })
        .await
    }
}

async fn move_if_pinned(
    store: &dyn KvStore,
    tid: String,
    pinned_at: i64,
) -> Result<RecordOutcome, StepError> {
    let topic_key = format!("topic:{tid}");
    let Some(topic) = store
        .get_object_fields(&topic_key, &["cid", "pinned"])
        .await?
    else {
        return Ok(RecordOutcome::Missing);
    };
    if int_field(&topic, &topic_key, "pinned")? != Some(1) {
        return Ok(RecordOutcome::Unchanged);
    }
    let cid = match topic.get("cid").map(String::as_str) {
        Some(cid) if !cid.is_empty() => cid,
        _ => return Err(StepError::malformed(&topic_key, "cid", "is missing on a pinned topic")),
    };

    let pinned_key = format!("cid:{cid}:tids:pinned");
    let mut changed = false;
    // Re-pinning would bump the topic to the top of the pinned list.
    if store.sorted_set_score(&pinned_key, &tid).await?.is_none() {
        store.sorted_set_add(&pinned_key, pinned_at, &tid).await?;
        changed = true;
    }
    changed |= store
        .sorted_set_remove(&format!("cid:{cid}:tids"), &tid)
        .await?;
    changed |= store
        .sorted_set_remove(&format!("cid:{cid}:tids:posts"), &tid)
        .await?;

    Ok(if changed {
        RecordOutcome::Updated
    } else {
        RecordOutcome::Unchanged
    })
}
