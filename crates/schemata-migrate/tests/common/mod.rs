#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use schemata_migrate::{SchemaDate, UpgradeEvent, UpgradeObserver, SCHEMA_DATE_KEY};
use schemata_store::{KvStore, MemoryStore, Object, Score, ScoredMember, StoreError, ValueKind};

/// Delegates to a [`MemoryStore`] but starts failing every write once its
/// budget is spent, like a process dying mid-step.
pub struct FaultyStore {
    pub inner: MemoryStore,
    writes_left: AtomicI64,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            writes_left: AtomicI64::new(i64::MAX),
        }
    }

    pub fn fail_after(&self, writes: i64) {
        self.writes_left.store(writes, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.writes_left.store(i64::MAX, Ordering::SeqCst);
    }

    fn write(&self) -> Result<(), StoreError> {
        if self.writes_left.fetch_sub(1, Ordering::SeqCst) <= 0 {
            return Err(StoreError::Backend("injected crash".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FaultyStore {
    async fn kind(&self, key: &str) -> Result<Option<ValueKind>, StoreError> {
        self.inner.kind(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.write()?;
        self.inner.delete(key).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        self.write()?;
        self.inner.rename(from, to).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        self.write()?;
        self.inner.delete_prefix(prefix).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write()?;
        self.inner.set(key, value).await
    }

    async fn get_object(&self, key: &str) -> Result<Option<Object>, StoreError> {
        self.inner.get_object(key).await
    }

    async fn set_object(&self, key: &str, fields: &Object) -> Result<(), StoreError> {
        self.write()?;
        self.inner.set_object(key, fields).await
    }

    async fn delete_object_field(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        self.write()?;
        self.inner.delete_object_field(key, field).await
    }

    async fn incr_object_field(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        self.write()?;
        self.inner.incr_object_field(key, field, by).await
    }

    async fn sorted_set_add(
        &self,
        key: &str,
        score: Score,
        member: &str,
    ) -> Result<bool, StoreError> {
        self.write()?;
        self.inner.sorted_set_add(key, score, member).await
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.write()?;
        self.inner.sorted_set_remove(key, member).await
    }

    async fn sorted_set_score(&self, key: &str, member: &str) -> Result<Option<Score>, StoreError> {
        self.inner.sorted_set_score(key, member).await
    }

    async fn sorted_set_card(&self, key: &str) -> Result<u64, StoreError> {
        self.inner.sorted_set_card(key).await
    }

    async fn sorted_set_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        self.inner.sorted_set_range(key, offset, limit).await
    }

    async fn sorted_set_rev_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        self.inner.sorted_set_rev_range(key, offset, limit).await
    }

    async fn sorted_set_range_after(
        &self,
        key: &str,
        after: Option<&ScoredMember>,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        self.inner.sorted_set_range_after(key, after, limit).await
    }
}

/// Keeps a one-line description of every event.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl UpgradeObserver for RecordingObserver {
    fn on_event(&self, event: &UpgradeEvent<'_>) {
        let line = match event {
            UpgradeEvent::Started { from, .. } => format!("start {from}"),
            UpgradeEvent::StepStarted { version, .. } => format!("run {version}"),
            UpgradeEvent::StepSkipped { version, .. } => format!("skip {version}"),
            UpgradeEvent::StepCompleted { version, .. } => format!("done {version}"),
            UpgradeEvent::StepFailed { version, .. } => format!("fail {version}"),
            UpgradeEvent::Finished { updates_made, .. } => format!("finish {updates_made}"),
        };
        self.events.lock().unwrap().push(line);
    }
}

pub async fn stamp(store: &dyn KvStore, version: SchemaDate) {
    store
        .set(SCHEMA_DATE_KEY, &version.as_millis().to_string())
        .await
        .unwrap();
}

pub async fn stored_version(store: &dyn KvStore) -> Option<SchemaDate> {
    store
        .get(SCHEMA_DATE_KEY)
        .await
        .unwrap()
        .map(|raw| raw.parse().unwrap())
}

async fn fields(store: &dyn KvStore, key: &str, pairs: &[(&str, &str)]) {
    let obj: Object = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    store.set_object(key, &obj).await.unwrap();
}

/// A small forum in its pre-upgrade shape, touching every built-in step.
pub async fn seed_forum(store: &dyn KvStore) {
    fields(
        store,
        "config",
        &[
            ("defaultLang", "en_GB"),
            ("brand:logo:url", "/uploads/system/logo.png"),
            ("og:image", "/images/og.png"),
        ],
    )
    .await;
    fields(store, "settings:sounds", &[("notification", "notification.mp3")]).await;

    store.sorted_set_add("categories:cid", 1, "1").await.unwrap();
    store.sorted_set_add("categories:cid", 2, "2").await.unwrap();

    // topic 1 in category 1 is pinned, topic 2 is not
    for (tid, cid, pinned) in [("1", "1", "1"), ("2", "1", "0"), ("3", "2", "0")] {
        store.sorted_set_add("topics:tid", 10, tid).await.unwrap();
        fields(store, &format!("topic:{tid}"), &[("tid", tid), ("cid", cid), ("pinned", pinned)]).await;
        store
            .sorted_set_add(&format!("cid:{cid}:tids"), 10, tid)
            .await
            .unwrap();
        store
            .sorted_set_add(&format!("cid:{cid}:tids:posts"), 1, tid)
            .await
            .unwrap();
    }

    // posts: 1 and 2 in topic 1, 3 in topic 3; 2 replies to 1
    for (pid, tid, cid, ts, to_pid, reputation) in [
        ("1", "1", "1", "1000", "", "2"),
        ("2", "1", "1", "2000", "1", "0"),
        ("3", "3", "2", "3000", "", "1"),
    ] {
        store
            .sorted_set_add("posts:pid", ts.parse().unwrap(), pid)
            .await
            .unwrap();
        store
            .sorted_set_add(&format!("cid:{cid}:pids"), ts.parse().unwrap(), pid)
            .await
            .unwrap();
        fields(
            store,
            &format!("post:{pid}"),
            &[
                ("pid", pid),
                ("tid", tid),
                ("timestamp", ts),
                ("toPid", to_pid),
                ("reputation", reputation),
            ],
        )
        .await;
    }
    store
        .sorted_set_add("pid:1:users_favourited", 1500, "10")
        .await
        .unwrap();

    store.sorted_set_add("users:joindate", 1, "10").await.unwrap();
    store.sorted_set_add("users:joindate", 2, "11").await.unwrap();
    store.sorted_set_add("uid:10:favourites", 1500, "1").await.unwrap();
    fields(
        store,
        "user:10:settings",
        &[("userLang", "sr@latin"), ("notificationSound", "waterdrop-high.mp3")],
    )
    .await;

    store.set("sess:abc", "{}").await.unwrap();
    store.set("sess:def", "{}").await.unwrap();
}

/// Assert the forum seeded by [`seed_forum`] is in its post-upgrade shape.
pub async fn assert_forum_upgraded(store: &dyn KvStore) {
    let get = |key: &'static str, field: &'static str| async move {
        store.get_object_field(key, field).await.unwrap()
    };

    assert_eq!(get("config", "defaultLang").await.as_deref(), Some("en-GB"));
    assert_eq!(
        get("config", "brand:logo:url").await.as_deref(),
        Some("/assets/uploads/system/logo.png")
    );
    assert_eq!(get("config", "og:image").await.as_deref(), Some("/assets/images/og.png"));
    assert_eq!(
        get("config", "notification").await.as_deref(),
        Some("Default | Deedle-dum")
    );

    assert_eq!(
        store.sorted_set_range("cid:1:recent_tids", 0, 10).await.unwrap(),
        vec![ScoredMember::new("1", 2000)]
    );
    assert_eq!(
        store.sorted_set_range("cid:2:recent_tids", 0, 10).await.unwrap(),
        vec![ScoredMember::new("3", 3000)]
    );

    assert!(store.exists("pid:1:users_bookmarked").await.unwrap());
    assert!(!store.exists("pid:1:users_favourited").await.unwrap());
    assert_eq!(get("post:1", "bookmarks").await.as_deref(), Some("2"));
    assert_eq!(get("post:2", "bookmarks").await, None);
    assert_eq!(get("post:1", "reputation").await, None);
    assert!(store.exists("uid:10:bookmarks").await.unwrap());

    assert_eq!(
        store.sorted_set_score("pid:1:replies", "2").await.unwrap(),
        Some(2000)
    );
    assert_eq!(get("post:1", "replies").await.as_deref(), Some("1"));

    assert!(store
        .sorted_set_score("cid:1:tids:pinned", "1")
        .await
        .unwrap()
        .is_some());
    assert_eq!(store.sorted_set_score("cid:1:tids", "1").await.unwrap(), None);
    assert_eq!(store.sorted_set_score("cid:1:tids", "2").await.unwrap(), Some(10));

    assert_eq!(
        get("user:10:settings", "userLang").await.as_deref(),
        Some("sr-x-latin")
    );
    assert_eq!(
        get("user:10:settings", "notificationSound").await.as_deref(),
        Some("Default | Water drop (high)")
    );

    assert!(!store.exists("sess:abc").await.unwrap());
    assert!(!store.exists("sess:def").await.unwrap());
}
