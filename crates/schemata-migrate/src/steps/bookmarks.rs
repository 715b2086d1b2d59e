use async_trait::async_trait;
use schemata_store::KvStore;
use tracing::debug;

use crate::batch::{for_each_member, RecordOutcome, Tally};
use crate::error::StepError;
use crate::step::{MigrationStep, StepContext};
use crate::version::SchemaDate;

/// Renames favourites to bookmarks on posts and users.
///
/// Post reputation becomes the bookmark count; the `reputation` field is
/// dropped either way.
pub struct FavouritesToBookmarks;

#[async_trait]
impl MigrationStep for FavouritesToBookmarks {
    fn target_version(&self) -> SchemaDate {
        SchemaDate::ymd(2016, 10, 8)
    }

    fn description(&self) -> &str {
        "Favourite -> bookmark refactor"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
        let store = ctx.store;
        let mut tally = for_each_member(store, "posts:pid", ctx.batch, |pid| {
            upgrade_post(store, pid)
        })
        .await?;
        debug!(processed = tally.processed, "posts done, moving on to users");

        tally += for_each_member(store, "users:joindate", ctx.batch, |uid| {
            upgrade_user(store, uid)
        })
        .await?;
        Ok(tally)
    }
}

async fn upgrade_post(store: &dyn KvStore, pid: String) -> Result<RecordOutcome, StepError> {
    let renamed = store
        .rename(
            &format!("pid:{pid}:users_favourited"),
            &format!("pid:{pid}:users_bookmarked"),
        )
        .await?;

    let post_key = format!("post:{pid}");
    let Some(reputation) = store.get_object_field(&post_key, "reputation").await? else {
        return Ok(if renamed {
            RecordOutcome::Updated
        } else if store.exists(&post_key).await? {
            RecordOutcome::Unchanged
        } else {
            RecordOutcome::Missing
        });
    };

    let count = match reputation.trim() {
        "" => 0,
        raw => raw.parse::<i64>().map_err(|_| {
            StepError::malformed(&post_key, "reputation", format!("is not an integer: {raw:?}"))
        })?,
    };
    if count != 0 {
        store
            .set_object_field(&post_key, "bookmarks", &count.to_string())
            .await?;
    }
    store.delete_object_field(&post_key, "reputation").await?;
    Ok(RecordOutcome::Updated)
}

async fn upgrade_user(store: &dyn KvStore, uid: String) -> Result<RecordOutcome, StepError> {
    let renamed = store
        .rename(
            &format!("uid:{uid}:favourites"),
            &format!("uid:{uid}:bookmarks"),
        )
        .await?;
    Ok(if renamed {
        RecordOutcome::Updated
    } else {
        RecordOutcome::Unchanged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::run_step;
    use schemata_store::MemoryStore;

    async fn seed(store: &MemoryStore) {
        for pid in ["1", "2", "3"] {
            store.sorted_set_add("posts:pid", 1, pid).await.unwrap();
        }
        store.set_object_field("post:1", "reputation", "4").await.unwrap();
        store.set_object_field("post:1", "tid", "9").await.unwrap();
        store
            .sorted_set_add("pid:1:users_favourited", 10, "7")
            .await
            .unwrap();
        store.set_object_field("post:2", "reputation", "0").await.unwrap();
        store.set_object_field("post:2", "tid", "9").await.unwrap();
        // post 3 is indexed but gone

        store.sorted_set_add("users:joindate", 1, "7").await.unwrap();
        store.sorted_set_add("users:joindate", 2, "8").await.unwrap();
        store.sorted_set_add("uid:7:favourites", 10, "1").await.unwrap();
    }

    #[tokio::test]
    async fn favourites_become_bookmarks() {
        let store = MemoryStore::new();
        seed(&store).await;

        let tally = run_step(&FavouritesToBookmarks, &store, 0).await.unwrap();
        assert_eq!(
            tally,
            Tally {
                processed: 5,
                updated: 3,
                missing: 1
            }
        );

        assert!(!store.exists("pid:1:users_favourited").await.unwrap());
        assert_eq!(
            store.sorted_set_score("pid:1:users_bookmarked", "7").await.unwrap(),
            Some(10)
        );
        assert_eq!(
            store.get_object_field("post:1", "bookmarks").await.unwrap().as_deref(),
            Some("4")
        );
        assert_eq!(store.get_object_field("post:1", "reputation").await.unwrap(), None);
        assert_eq!(store.get_object_field("post:2", "bookmarks").await.unwrap(), None);
        assert_eq!(store.get_object_field("post:2", "reputation").await.unwrap(), None);
        assert!(store.exists("uid:7:bookmarks").await.unwrap());
        assert!(!store.exists("uid:7:favourites").await.unwrap());
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let store = MemoryStore::new();
        seed(&store).await;

        run_step(&FavouritesToBookmarks, &store, 0).await.unwrap();
        let once = store.dump().unwrap();
        let tally = run_step(&FavouritesToBookmarks, &store, 0).await.unwrap();

        assert_eq!(tally.updated, 0);
        assert_eq!(store.dump().unwrap(), once);
    }
}
