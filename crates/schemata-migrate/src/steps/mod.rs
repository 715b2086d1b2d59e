//! The built-in upgrade chain.
//!
//! Each step owns the key layout it touches. Keys follow the forum data
//! model: `post:{pid}`, `topic:{tid}`, `user:{uid}:settings`, and sorted-set
//! indexes such as `posts:pid` or `users:joindate`.

mod asset_urls;
mod bookmarks;
mod language_keys;
mod pinned_topics;
mod post_replies;
mod purge_sessions;
mod recent_tids;
mod sound_settings;

pub use asset_urls::AssetUrls;
pub use bookmarks::FavouritesToBookmarks;
pub use language_keys::LanguageKeys;
pub use pinned_topics::PinnedTopics;
pub use post_replies::PostReplies;
pub use purge_sessions::PurgeSessions;
pub use recent_tids::CategoryRecentTids;
pub use sound_settings::SoundSettings;

use schemata_store::Object;

use crate::error::{RegistryError, StepError};
use crate::step::StepRegistry;

/// Every built-in step, in order.
pub fn default_registry() -> Result<StepRegistry, RegistryError> {
    let mut registry = StepRegistry::new();
    registry.register(Box::new(CategoryRecentTids))?;
    registry.register(Box::new(FavouritesToBookmarks))?;
    registry.register(Box::new(PostReplies))?;
    registry.register(Box::new(LanguageKeys))?;
    registry.register(Box::new(PinnedTopics))?;
    registry.register(Box::new(SoundSettings))?;
    registry.register(Box::new(AssetUrls))?;
    registry.register(Box::new(PurgeSessions))?;
    Ok(registry)
}

/// Integer value of `field`. Absent and empty fields read as `None`.
pub(crate) fn int_field(obj: &Object, key: &str, field: &str) -> Result<Option<i64>, StepError> {
    match obj.get(field).map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| StepError::malformed(key, field, format!("is not an integer: {raw:?}"))),
    }
}

/// Run one step against `store` with default batching, small chunks.
#[cfg(test)]
pub(crate) async fn run_step(
    step: &dyn crate::step::MigrationStep,
    store: &dyn schemata_store::KvStore,
    started_at: i64,
) -> Result<crate::batch::Tally, StepError> {
    let batch = crate::batch::BatchOptions {
        batch_size: 3,
        ..Default::default()
    };
    let ctx = crate::step::StepContext {
        store,
        batch: &batch,
        started_at,
    };
    step.apply(&ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::LATEST_SCHEMA_DATE;

    #[test]
    fn default_registry_ends_on_latest() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.len(), 8);
        assert!(registry.validate(LATEST_SCHEMA_DATE).is_ok());
    }

    #[test]
    fn int_field_parsing() {
        let mut obj = Object::new();
        obj.insert("a".into(), "42".into());
        obj.insert("b".into(), "".into());
        obj.insert("c".into(), "nope".into());

        assert_eq!(int_field(&obj, "k", "a").unwrap(), Some(42));
        assert_eq!(int_field(&obj, "k", "b").unwrap(), None);
        assert_eq!(int_field(&obj, "k", "missing").unwrap(), None);
        assert!(matches!(
            int_field(&obj, "k", "c"),
            Err(StepError::MalformedRecord { .. })
        ));
    }
}
