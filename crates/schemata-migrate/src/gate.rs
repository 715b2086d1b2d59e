use schemata_store::KvStore;
use tracing::{debug, info};

use crate::error::UpgradeError;
use crate::version::{SchemaDate, SCHEMA_DATE_KEY};

/// Reads and writes the persisted schema version.
///
/// The gate owns the `schemaDate` key. A store without it is a fresh install:
/// it is stamped with the latest version, since there is nothing to migrate.
pub struct VersionGate<'a> {
    store: &'a dyn KvStore,
    minimum: SchemaDate,
    latest: SchemaDate,
}

impl<'a> VersionGate<'a> {
    pub fn new(store: &'a dyn KvStore, minimum: SchemaDate, latest: SchemaDate) -> Self {
        Self {
            store,
            minimum,
            latest,
        }
    }

    /// Stored version, without initializing a fresh store.
    pub async fn current(&self) -> Result<Option<SchemaDate>, UpgradeError> {
        match self.store.get(SCHEMA_DATE_KEY).await? {
            None => Ok(None),
            Some(raw) => raw
                .parse::<SchemaDate>()
                .map(Some)
                .map_err(|_| UpgradeError::InvalidSchemaDate(raw)),
        }
    }

    async fn current_or_init(&self) -> Result<SchemaDate, UpgradeError> {
        match self.current().await? {
            Some(version) => Ok(version),
            None => {
                info!(version = %self.latest, "no schema version found, stamping fresh install");
                self.advance(self.latest).await?;
                Ok(self.latest)
            }
        }
    }

    /// Boot-time gate: succeeds iff the stored schema is at least the latest.
    pub async fn check(&self) -> Result<(), UpgradeError> {
        let found = self.current_or_init().await?;
        if found >= self.latest {
            Ok(())
        } else {
            Err(UpgradeError::SchemaOutOfDate {
                found,
                latest: self.latest,
            })
        }
    }

    /// Read the version an upgrade starts from, refusing anything below the floor.
    ///
    /// A refusal leaves the store untouched.
    pub async fn begin_upgrade(&self) -> Result<SchemaDate, UpgradeError> {
        let found = self.current_or_init().await?;
        if found < self.minimum {
            return Err(UpgradeError::UpgradeNotPossible {
                found,
                minimum: self.minimum,
            });
        }
        Ok(found)
    }

    /// Persist `version`. Call only once a step has fully completed.
    pub async fn advance(&self, version: SchemaDate) -> Result<(), UpgradeError> {
        debug!(%version, "advancing schema version");
        self.store
            .set(SCHEMA_DATE_KEY, &version.as_millis().to_string())
            .await?;
        Ok(())
    }
}
