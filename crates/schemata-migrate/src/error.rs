use schemata_store::StoreError;
use thiserror::Error;

use crate::version::SchemaDate;

/// Error raised while a single step is transforming data.
#[derive(Debug, Error)]
pub enum StepError {
    /// The store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record exists but one of its fields cannot be interpreted.
    #[error("malformed record {key:?}: field {field:?} {reason}")]
    MalformedRecord {
        key: String,
        field: String,
        reason: String,
    },
}

impl StepError {
    pub(crate) fn malformed(key: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            key: key.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// A step registry that breaks the ordering rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Targets must strictly increase in registration order.
    #[error("step [{target}] registered after [{previous}]; target versions must strictly increase")]
    OutOfOrder {
        previous: SchemaDate,
        target: SchemaDate,
    },

    /// The last step does not land on the configured latest schema.
    #[error("last registered step targets [{last}] but the latest schema is [{latest}]")]
    LatestMismatch {
        last: SchemaDate,
        latest: SchemaDate,
    },
}

/// Errors surfaced by [`Upgrader`](crate::Upgrader) entry points.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Boot check failed: run the upgrade before serving traffic.
    #[error("schema out of date: stored schema is [{found}], latest is [{latest}]")]
    SchemaOutOfDate {
        found: SchemaDate,
        latest: SchemaDate,
    },

    /// The stored schema predates the oldest version this build can upgrade from.
    #[error("upgrade not possible: stored schema [{found}] is older than the minimum supported [{minimum}]")]
    UpgradeNotPossible {
        found: SchemaDate,
        minimum: SchemaDate,
    },

    /// A step failed; the schema version stays at the last completed step.
    #[error("step [{version}] {description} failed: {source}")]
    StepFailed {
        version: SchemaDate,
        description: String,
        #[source]
        source: StepError,
    },

    /// The persisted schema version is not a millisecond timestamp.
    #[error("invalid schema date {0:?} in store")]
    InvalidSchemaDate(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
