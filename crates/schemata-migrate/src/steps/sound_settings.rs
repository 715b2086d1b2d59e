use async_trait::async_trait;
use schemata_store::{KvStore, Object};

use crate::batch::{for_each_member, RecordOutcome, Tally};
use crate::error::StepError;
use crate::step::{MigrationStep, StepContext};
use crate::version::SchemaDate;

/// Values in the new format name their sound pack: `"Default | Deedle-dum"`.
const SOUND_PACK_MARKER: &str = " | ";

const GLOBAL_SOUND_KEYS: &[&str] = &["chat-incoming", "chat-outgoing", "notification"];
const USER_SOUND_KEYS: &[&str] = &["notificationSound", "incomingChatSound", "outgoingChatSound"];

/// Maps bare sound file names to `pack | sound` names. Global sounds move from
/// `settings:sounds` into `config`; user sounds are rewritten in place.
pub struct SoundSettings;

#[async_trait]
impl MigrationStep for SoundSettings {
    fn target_version(&self) -> SchemaDate {
        SchemaDate::ymd(2017, 2, 25)
    }

    fn description(&self) -> &str {
        "Update global and user sound settings"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
        let store = ctx.store;
        let mut tally = Tally::default();
        tally.record(move_global_sounds(store).await?);
        tally += for_each_member(store, "users:joindate", ctx.batch, |uid| {
            remap_object(store, format!("user:{uid}:settings"), USER_SOUND_KEYS)
        })
        .await?;
        Ok(tally)
    }
}

/// New name for a legacy sound file. Unknown files map to no sound.
pub(crate) fn map_sound(file: &str) -> &'static str {
    match file {
        "notification.mp3" => "Default | Deedle-dum",
        "waterdrop-high.mp3" => "Default | Water drop (high)",
        "waterdrop-low.mp3" => "Default | Water drop (low)",
        _ => "",
    }
}

fn remapped(settings: &Object, keys: &[&str]) -> Object {
    keys.iter()
        .filter_map(|key| {
            let value = settings.get(*key)?;
            if value.is_empty() || value.contains(SOUND_PACK_MARKER) {
                return None;
            }
            Some((key.to_string(), map_sound(value).to_string()))
        })
        .collect()
}

/// Copy `settings:sounds`, with legacy values remapped, into `config`. The
/// source object is left as is.
async fn move_global_sounds(store: &dyn KvStore) -> Result<RecordOutcome, StepError> {
    let Some(mut settings) = store.get_object("settings:sounds").await? else {
        return Ok(RecordOutcome::Unchanged);
    };
    let changes = remapped(&settings, GLOBAL_SOUND_KEYS);
    settings.extend(changes);

    let fields: Vec<&str> = settings.keys().map(String::as_str).collect();
    let config = store.get_object_fields("config", &fields).await?.unwrap_or_default();
    if settings.iter().all(|(field, value)| config.get(field) == Some(value)) {
        return Ok(RecordOutcome::Unchanged);
    }
    store.set_object("config", &settings).await?;
    Ok(RecordOutcome::Updated)
}

async fn remap_object(
    store: &dyn KvStore,
    key: String,
    keys: &'static [&'static str],
) -> Result<RecordOutcome, StepError> {
    let Some(settings) = store.get_object_fields(&key, keys).await? else {
        return Ok(RecordOutcome::Unchanged);
    };
    let changes = remapped(&settings, keys);
    if changes.is_empty() {
        return Ok(RecordOutcome::Unchanged);
    }
    store.set_object(&key, &changes).await?;
    Ok(RecordOutcome::Updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::run_step;
    use schemata_store::MemoryStore;

    #[test]
    fn remaps_only_legacy_values() {
        let mut settings = Object::new();
        settings.insert("notification".into(), "waterdrop-low.mp3".into());
        settings.insert("chat-incoming".into(), "Default | Deedle-dum".into());
        settings.insert("chat-outgoing".into(), "custom.mp3".into());
        settings.insert("unrelated".into(), "notification.mp3".into());

        let changes = remapped(&settings, GLOBAL_SOUND_KEYS);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["notification"], "Default | Water drop (low)");
        assert_eq!(changes["chat-outgoing"], "");
    }

    #[tokio::test]
    async fn updates_global_and_user_sounds() {
        let store = MemoryStore::new();
        store
            .set_object_field("settings:sounds", "notification", "notification.mp3")
            .await
            .unwrap();
        store
            .set_object_field("settings:sounds", "chat-incoming", "waterdrop-high.mp3")
            .await
            .unwrap();
        store.sorted_set_add("users:joindate", 1, "1").await.unwrap();
        store.sorted_set_add("users:joindate", 2, "2").await.unwrap();
        store
            .set_object_field("user:1:settings", "incomingChatSound", "waterdrop-low.mp3")
            .await
            .unwrap();
        store
            .set_object_field("user:1:settings", "userLang", "en-GB")
            .await
            .unwrap();

        let tally = run_step(&SoundSettings, &store, 0).await.unwrap();
        assert_eq!(tally.processed, 3);
        assert_eq!(tally.updated, 2);

        let config = store.get_object("config").await.unwrap().unwrap();
        assert_eq!(config["notification"], "Default | Deedle-dum");
        assert_eq!(config["chat-incoming"], "Default | Water drop (high)");
        assert_eq!(
            store
                .get_object_field("settings:sounds", "notification")
                .await
                .unwrap()
                .as_deref(),
            Some("notification.mp3")
        );
        assert_eq!(
            store
                .get_object_field("user:1:settings", "incomingChatSound")
                .await
                .unwrap()
                .as_deref(),
            Some("Default | Water drop (low)")
        );
        assert_eq!(
            store.get_object_field("user:1:settings", "userLang").await.unwrap().as_deref(),
            Some("en-GB")
        );

        let once = store.dump().unwrap();
        assert_eq!(run_step(&SoundSettings, &store, 0).await.unwrap().updated, 0);
        assert_eq!(store.dump().unwrap(), once);
    }
}
