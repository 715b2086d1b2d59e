use async_trait::async_trait;
use schemata_store::KvStore;

use crate::batch::{for_each_member, RecordOutcome, Tally};
use crate::error::StepError;
use crate::step::{MigrationStep, StepContext};
use crate::version::SchemaDate;

/// Rewrites locale codes from `en_GB` / `sr@latin` style to BCP 47
/// (`en-GB`, `sr-x-latin`), globally and per user.
pub struct LanguageKeys;

#[async_trait]
impl MigrationStep for LanguageKeys {
    fn target_version(&self) -> SchemaDate {
        SchemaDate::ymd(2016, 11, 22)
    }

    fn description(&self) -> &str {
        "Update global and user language keys"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
        let store = ctx.store;
        let mut tally = Tally::default();
        tally.record(rewrite_field(store, "config".to_string(), "defaultLang").await?);
        tally += for_each_member(store, "users:joindate", ctx.batch, |uid| {
            rewrite_field(store, format!("user:{uid}:settings"), "userLang")
        })
        .await?;
        Ok(tally)
    }
}

pub(crate) fn normalize_language(code: &str) -> String {
    code.replace('_', "-").replace('@', "-x-")
}

async fn rewrite_field(
    store: &dyn KvStore,
    key: String,
    field: &'static str,
) -> Result<RecordOutcome, StepError> {
    let Some(language) = store.get_object_field(&key, field).await? else {
        return Ok(RecordOutcome::Unchanged);
    };
    if language.is_empty() {
        return Ok(RecordOutcome::Unchanged);
    }
    let normalized = normalize_language(&language);
    if normalized == language {
        return Ok(RecordOutcome::Unchanged);
    }
    store.set_object_field(&key, field, &normalized).await?;
    Ok(RecordOutcome::Updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::run_step;
    use schemata_store::MemoryStore;

    #[test]
    fn normalizes_codes() {
        assert_eq!(normalize_language("en_GB"), "en-GB");
        assert_eq!(normalize_language("sr@latin"), "sr-x-latin");
        // Every separator is rewritten, not only the first one.
        assert_eq!(normalize_language("zh_Hant_TW"), "zh-Hant-TW");
        assert_eq!(normalize_language("en-GB"), "en-GB");
        assert_eq!(normalize_language(&normalize_language("sr_RS@latin")), "sr-RS-x-latin");
    }

    #[tokio::test]
    async fn rewrites_config_and_users() {
        let store = MemoryStore::new();
        store.set_object_field("config", "defaultLang", "pt_BR").await.unwrap();
        for uid in ["1", "2", "3", "4"] {
            store.sorted_set_add("users:joindate", 1, uid).await.unwrap();
        }
        store
            .set_object_field("user:1:settings", "userLang", "en_US")
            .await
            .unwrap();
        store
            .set_object_field("user:2:settings", "userLang", "de")
            .await
            .unwrap();
        store
            .set_object_field("user:3:settings", "showemail", "1")
            .await
            .unwrap();
        // user 4 never saved settings

        let tally = run_step(&LanguageKeys, &store, 0).await.unwrap();
        assert_eq!(tally.processed, 5);
        assert_eq!(tally.updated, 2);
        assert_eq!(tally.missing, 0);

        assert_eq!(
            store.get_object_field("config", "defaultLang").await.unwrap().as_deref(),
            Some("pt-BR")
        );
        assert_eq!(
            store.get_object_field("user:1:settings", "userLang").await.unwrap().as_deref(),
            Some("en-US")
        );
        assert_eq!(
            store.get_object_field("user:3:settings", "userLang").await.unwrap(),
            None
        );
        assert!(!store.exists("user:4:settings").await.unwrap());

        let again = run_step(&LanguageKeys, &store, 0).await.unwrap();
        assert_eq!(again.updated, 0);
    }
}
