use async_trait::async_trait;
use tracing::info;

use crate::batch::Tally;
use crate::error::StepError;
use crate::step::{MigrationStep, StepContext};
use crate::version::SchemaDate;

const SESSION_PREFIX: &str = "sess:";

/// Operational cleanup rather than a data transform: drops every stored
/// login session so that all users sign in again after the upgrade.
pub struct PurgeSessions;

#[async_trait]
impl MigrationStep for PurgeSessions {
    fn target_version(&self) -> SchemaDate {
        SchemaDate::ymd(2017, 4, 16)
    }

    fn description(&self) -> &str {
        "Delete sessions"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
        let removed = ctx.store.delete_prefix(SESSION_PREFIX).await?;
        info!(removed, "purged stored sessions");
        Ok(Tally {
            processed: removed,
            updated: removed,
            missing: 0,
        })
    }
}
