use async_trait::async_trait;
use schemata_store::KvStore;

use crate::batch::{BatchOptions, Tally};
use crate::error::{RegistryError, StepError};
use crate::version::SchemaDate;

/// One dated upgrade step.
///
/// Steps form a linear chain ordered by [`target_version`](Self::target_version).
/// The runner applies every step newer than the stored schema, oldest first,
/// and persists the step's target only after `apply` returns `Ok`.
///
/// `apply` must be idempotent: a crash mid-step means the whole step is run
/// again on the next attempt, over records it may already have rewritten.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use schemata_migrate::{MigrationStep, SchemaDate, StepContext, StepError, StepRegistry, Tally};
///
/// struct RenameSiteTitle;
///
/// #[async_trait]
/// impl MigrationStep for RenameSiteTitle {
///     fn target_version(&self) -> SchemaDate {
///         SchemaDate::ymd(2017, 1, 1)
///     }
///     fn description(&self) -> &str {
///         "Renaming the site title key"
///     }
///     async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
///         ctx.store.rename("title", "site:title").await?;
///         Ok(Tally::default())
///     }
/// }
///
/// let mut registry = StepRegistry::new();
/// registry.register(Box::new(RenameSiteTitle)).unwrap();
/// assert_eq!(registry.latest(), Some(SchemaDate::ymd(2017, 1, 1)));
/// ```
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Schema version the store is at once this step has run.
    fn target_version(&self) -> SchemaDate;
    /// Short human-readable summary, shown in logs and reports.
    fn description(&self) -> &str;
    /// Transform the data.
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError>;
}

/// What a step gets to work with.
pub struct StepContext<'a> {
    pub store: &'a dyn KvStore,
    pub batch: &'a BatchOptions,
    /// Wall-clock time the upgrade started, in Unix milliseconds. Steps that
    /// need a "now" score use this so that reruns write the same value.
    pub started_at: i64,
}

/// Ordered chain of steps.
#[derive(Default)]
pub struct StepRegistry {
    steps: Vec<Box<dyn MigrationStep>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Its target must be newer than every step already registered.
    pub fn register(&mut self, step: Box<dyn MigrationStep>) -> Result<(), RegistryError> {
        if let Some(previous) = self.latest() {
            let target = step.target_version();
            if target <= previous {
                return Err(RegistryError::OutOfOrder { previous, target });
            }
        }
        self.steps.push(step);
        Ok(())
    }

    /// Target of the last step.
    pub fn latest(&self) -> Option<SchemaDate> {
        self.steps.last().map(|s| s.target_version())
    }

    /// Check the chain ends on `latest`. An empty registry is valid.
    pub fn validate(&self, latest: SchemaDate) -> Result<(), RegistryError> {
        match self.latest() {
            Some(last) if last != latest => Err(RegistryError::LatestMismatch { last, latest }),
            _ => Ok(()),
        }
    }

    /// Steps newer than `current`, in application order.
    pub fn pending(&self, current: SchemaDate) -> impl Iterator<Item = &dyn MigrationStep> {
        self.iter().filter(move |s| s.target_version() > current)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn MigrationStep> {
        self.steps.iter().map(|s| &**s)
    }

    /// All registered steps as `(target, description)` pairs.
    pub fn registered_steps(&self) -> Vec<(SchemaDate, String)> {
        self.iter()
            .map(|s| (s.target_version(), s.description().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
