use async_trait::async_trait;
use schemata_store::KvStore;

use super::int_field;
use crate::batch::{for_each_member, RecordOutcome, Tally};
use crate::error::StepError;
use crate::step::{MigrationStep, StepContext};
use crate::version::SchemaDate;

/// Seeds `cid:{cid}:recent_tids` with the topic of each category's newest post.
pub struct CategoryRecentTids;

#[async_trait]
impl MigrationStep for CategoryRecentTids {
    fn target_version(&self) -> SchemaDate {
        SchemaDate::ymd(2016, 9, 22)
    }

    fn description(&self) -> &str {
        "Setting category recent tids"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
        let store = ctx.store;
        for_each_member(store, "categories:cid", ctx.batch, |cid| {
            record_newest_topic(store, cid)
        })
        .await
    }
}

async fn record_newest_topic(store: &dyn KvStore, cid: String) -> Result<RecordOutcome, StepError> {
    let newest = store
        .sorted_set_rev_range(&format!("cid:{cid}:pids"), 0, 1)
        .await?;
    let Some(newest) = newest.into_iter().next() else {
        return Ok(RecordOutcome::Unchanged);
    };

    let post_key = format!("post:{}", newest.member);
    let Some(post) = store
        .get_object_fields(&post_key, &["tid", "timestamp"])
        .await?
    else {
        return Ok(RecordOutcome::Missing);
    };
    let Some(tid) = post.get("tid").filter(|tid| !tid.is_empty()) else {
        return Ok(RecordOutcome::Missing);
    };
    let score = int_field(&post, &post_key, "timestamp")?.unwrap_or(newest.score);

    let recent_key = format!("cid:{cid}:recent_tids");
    if store.sorted_set_score(&recent_key, tid).await? == Some(score) {
        return Ok(RecordOutcome::Unchanged);
    }
    store.sorted_set_add(&recent_key, score, tid).await?;
    Ok(RecordOutcome::Updated)
}
