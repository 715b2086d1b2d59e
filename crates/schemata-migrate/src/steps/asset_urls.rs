use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use schemata_store::Object;

use crate::batch::{RecordOutcome, Tally};
use crate::error::StepError;
use crate::step::{MigrationStep, StepContext};
use crate::version::SchemaDate;

const CONFIG_KEY: &str = "config";
const URL_FIELDS: &[&str] = &[
    "brand:favicon",
    "brand:touchicon",
    "og:image",
    "brand:logo:url",
    "defaultAvatar",
    "profile:defaultCovers",
];

static ASSET_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:/assets)?/(images|uploads)/").expect("asset path pattern"));

/// Points uploaded image URLs in `config` at `/assets/...`.
pub struct AssetUrls;

#[async_trait]
impl MigrationStep for AssetUrls {
    fn target_version(&self) -> SchemaDate {
        SchemaDate::ymd(2017, 2, 28)
    }

    fn description(&self) -> &str {
        "Update urls in config to `/assets`"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
        let Some(config) = ctx.store.get_object_fields(CONFIG_KEY, URL_FIELDS).await? else {
            return Ok(Tally::default());
        };

        let changes = rewritten_urls(&config);
        let outcome = if changes.is_empty() {
            RecordOutcome::Unchanged
        } else {
            ctx.store.set_object(CONFIG_KEY, &changes).await?;
            RecordOutcome::Updated
        };
        Ok(std::iter::once(outcome).collect())
    }
}

pub(crate) fn rewrite_asset_url(url: &str) -> String {
    ASSET_PATH.replace_all(url, "/assets/$1/").into_owned()
}

fn rewritten_urls(config: &Object) -> Object {
    config
        .iter()
        .filter(|(field, value)| URL_FIELDS.contains(&field.as_str()) && !value.is_empty())
        .filter_map(|(field, value)| {
            let rewritten = rewrite_asset_url(value);
            (rewritten != *value).then(|| (field.clone(), rewritten))
        })
        .collect()
}
