use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use schemata_store::KvStore;
use serde::Serialize;
use tracing::error;

use crate::batch::{BatchOptions, Tally};
use crate::error::UpgradeError;
use crate::gate::VersionGate;
use crate::observer::{TracingObserver, UpgradeEvent, UpgradeObserver};
use crate::step::{StepContext, StepRegistry};
use crate::steps::default_registry;
use crate::version::{SchemaDate, LATEST_SCHEMA_DATE, MIN_SCHEMA_DATE};

/// Configuration for the upgrade runner.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Refuse to upgrade stores older than this.
    pub minimum: SchemaDate,
    /// Version the registry ends on.
    pub latest: SchemaDate,
    pub batch: BatchOptions,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            minimum: MIN_SCHEMA_DATE,
            latest: LATEST_SCHEMA_DATE,
            batch: BatchOptions::default(),
        }
    }
}

/// Outcome of one registered step during an upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Applied { tally: Tally, elapsed_ms: u64 },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub version: SchemaDate,
    pub description: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Summary of a successful [`Upgrader::upgrade`] run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    pub starting_version: SchemaDate,
    pub final_version: SchemaDate,
    /// `true` iff at least one step was applied.
    pub updates_made: bool,
    pub steps: Vec<StepReport>,
}

impl UpgradeReport {
    /// Record counters summed over all applied steps.
    pub fn totals(&self) -> Tally {
        let mut totals = Tally::default();
        for step in &self.steps {
            if let StepStatus::Applied { tally, .. } = step.status {
                totals += tally;
            }
        }
        totals
    }

    pub fn applied(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Applied { .. }))
            .count()
    }
}

/// Read-only snapshot for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeStatus {
    /// `None` for a store that has never been stamped.
    pub current: Option<SchemaDate>,
    pub minimum: SchemaDate,
    pub latest: SchemaDate,
    /// Whether `upgrade` would accept the current version.
    pub upgradable: bool,
    pub pending: Vec<(SchemaDate, String)>,
}

/// Runs registered steps against a store.
///
/// ```
/// use std::sync::Arc;
/// use schemata_migrate::{Upgrader, LATEST_SCHEMA_DATE};
/// use schemata_store::MemoryStore;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let upgrader = Upgrader::with_defaults(Arc::new(MemoryStore::new())).unwrap();
///
/// // A fresh store is stamped with the latest schema; nothing to run.
/// let report = upgrader.upgrade().await.unwrap();
/// assert!(!report.updates_made);
/// assert_eq!(report.final_version, LATEST_SCHEMA_DATE);
/// # }
/// ```
pub struct Upgrader {
    store: Arc<dyn KvStore>,
    registry: StepRegistry,
    config: UpgradeConfig,
    observer: Arc<dyn UpgradeObserver>,
}

impl Upgrader {
    /// Build a runner, checking that `registry` ends on `config.latest`.
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: StepRegistry,
        config: UpgradeConfig,
    ) -> Result<Self, UpgradeError> {
        registry.validate(config.latest)?;
        Ok(Self {
            store,
            registry,
            config,
            observer: Arc::new(TracingObserver),
        })
    }

    /// The built-in step chain with default bounds and batching.
    pub fn with_defaults(store: Arc<dyn KvStore>) -> Result<Self, UpgradeError> {
        Self::new(store, default_registry()?, UpgradeConfig::default())
    }

    /// Replace the default [`TracingObserver`].
    pub fn observer(mut self, observer: Arc<dyn UpgradeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    pub fn gate(&self) -> VersionGate<'_> {
        VersionGate::new(self.store.as_ref(), self.config.minimum, self.config.latest)
    }

    /// Boot-time check. Fails with [`UpgradeError::SchemaOutOfDate`] when an
    /// upgrade is needed.
    pub async fn check(&self) -> Result<(), UpgradeError> {
        self.gate().check().await
    }

    /// Current version and pending steps. Never writes.
    pub async fn status(&self) -> Result<UpgradeStatus, UpgradeError> {
        let current = self.gate().current().await?;
        let (upgradable, pending): (bool, Vec<(SchemaDate, String)>) = match current {
            Some(version) => (
                version >= self.config.minimum,
                self.registry
                    .pending(version)
                    .map(|s| (s.target_version(), s.description().to_string()))
                    .collect(),
            ),
            None => (true, Vec::new()),
        };
        Ok(UpgradeStatus {
            current,
            minimum: self.config.minimum,
            latest: self.config.latest,
            upgradable,
            pending,
        })
    }

    /// Apply every step newer than the stored schema, oldest first.
    ///
    /// The stored version is advanced after each step, so a failed run can
    /// simply be repeated: completed steps are skipped and the failed one is
    /// retried.
    pub async fn upgrade(&self) -> Result<UpgradeReport, UpgradeError> {
        let result = self.run().await;
        match &result {
            Ok(_) => {}
            Err(UpgradeError::UpgradeNotPossible { found, minimum }) => {
                error!(%found, %minimum, "Upgrade is not possible, schema is too far out of date");
                error!(
                    "Please ensure that you did not skip any minor version upgrades \
                     (e.g. going from v0.1.x directly to v0.3.x). Upgrade through each \
                     intermediate release first."
                );
            }
            Err(err) => {
                error!("Errors were encountered while updating the schema: {err}");
            }
        }
        result
    }

    async fn run(&self) -> Result<UpgradeReport, UpgradeError> {
        let gate = self.gate();
        let starting_version = gate.begin_upgrade().await?;
        self.observer.on_event(&UpgradeEvent::Started {
            from: starting_version,
            latest: self.config.latest,
        });

        let ctx = StepContext {
            store: self.store.as_ref(),
            batch: &self.config.batch,
            started_at: Utc::now().timestamp_millis(),
        };

        let mut current = starting_version;
        let mut steps = Vec::with_capacity(self.registry.len());

        for step in self.registry.iter() {
            let version = step.target_version();
            let description = step.description();

            if current >= version {
                self.observer.on_event(&UpgradeEvent::StepSkipped {
                    version,
                    description,
                });
                steps.push(StepReport {
                    version,
                    description: description.to_string(),
                    status: StepStatus::Skipped,
                });
                continue;
            }

            self.observer.on_event(&UpgradeEvent::StepStarted {
                version,
                description,
            });
            let started = Instant::now();

            let tally = match step.apply(&ctx).await {
                Ok(tally) => tally,
                Err(source) => {
                    self.observer.on_event(&UpgradeEvent::StepFailed {
                        version,
                        description,
                        error: &source,
                    });
                    return Err(UpgradeError::StepFailed {
                        version,
                        description: description.to_string(),
                        source,
                    });
                }
            };

            gate.advance(version).await?;
            current = version;

            let elapsed = started.elapsed();
            self.observer.on_event(&UpgradeEvent::StepCompleted {
                version,
                description,
                tally,
                elapsed,
            });
            steps.push(StepReport {
                version,
                description: description.to_string(),
                status: StepStatus::Applied {
                    tally,
                    elapsed_ms: elapsed.as_millis() as u64,
                },
            });
        }

        let report = UpgradeReport {
            starting_version,
            final_version: current,
            updates_made: steps
                .iter()
                .any(|s| matches!(s.status, StepStatus::Applied { .. })),
            steps,
        };
        self.observer.on_event(&UpgradeEvent::Finished {
            updates_made: report.updates_made,
            applied: report.applied(),
            skipped: report.steps.len() - report.applied(),
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::step::MigrationStep;
    use async_trait::async_trait;
    use schemata_store::MemoryStore;

    /// Bumps a counter key; fails when `fail` is set.
    struct Bump {
        target: SchemaDate,
        fail: bool,
    }

    #[async_trait]
    impl MigrationStep for Bump {
        fn target_version(&self) -> SchemaDate {
            self.target
        }
        fn description(&self) -> &str {
            "bump"
        }
        async fn apply(&self, ctx: &StepContext<'_>) -> Result<Tally, StepError> {
            if self.fail {
                return Err(StepError::malformed("counter", "n", "refusing"));
            }
            ctx.store.incr_object_field("counter", "n", 1).await?;
            let mut tally = Tally::default();
            tally.record(crate::batch::RecordOutcome::Updated);
            Ok(tally)
        }
    }

    fn day(d: u32) -> SchemaDate {
        SchemaDate::ymd(2017, 1, d)
    }

    fn upgrader(store: Arc<MemoryStore>, failing: Option<u32>) -> Upgrader {
        let mut registry = StepRegistry::new();
        for d in 2..=4 {
            registry
                .register(Box::new(Bump {
                    target: day(d),
                    fail: failing == Some(d),
                }))
                .unwrap();
        }
        let config = UpgradeConfig {
            minimum: day(1),
            latest: day(4),
            batch: BatchOptions::default(),
        };
        Upgrader::new(store, registry, config).unwrap()
    }

    async fn counter(store: &MemoryStore) -> Option<String> {
        store.get_object_field("counter", "n").await.unwrap()
    }

    #[tokio::test]
    async fn mismatched_registry_is_rejected() {
        let config = UpgradeConfig {
            latest: day(9),
            ..UpgradeConfig::default()
        };
        let mut registry = StepRegistry::new();
        registry
            .register(Box::new(Bump {
                target: day(2),
                fail: false,
            }))
            .unwrap();
        let err = Upgrader::new(Arc::new(MemoryStore::new()), registry, config)
            .err()
            .unwrap();
        assert!(matches!(err, UpgradeError::Registry(_)));
    }

    #[tokio::test]
    async fn applies_only_pending_steps() {
        let store = Arc::new(MemoryStore::new());
        let upgrader = upgrader(store.clone(), None);
        upgrader.gate().advance(day(2)).await.unwrap();

        let report = upgrader.upgrade().await.unwrap();
        assert!(report.updates_made);
        assert_eq!(report.starting_version, day(2));
        assert_eq!(report.final_version, day(4));
        assert_eq!(report.applied(), 2);
        assert_eq!(report.steps[0].status, StepStatus::Skipped);
        assert_eq!(report.totals().updated, 2);
        assert_eq!(counter(&store).await.as_deref(), Some("2"));
        assert_eq!(upgrader.gate().current().await.unwrap(), Some(day(4)));
    }

    #[tokio::test]
    async fn failure_stops_at_last_good_step() {
        let store = Arc::new(MemoryStore::new());
        let upgrader = upgrader(store.clone(), Some(3));
        upgrader.gate().advance(day(1)).await.unwrap();

        let err = upgrader.upgrade().await.unwrap_err();
        assert!(matches!(
            err,
            UpgradeError::StepFailed { version, .. } if version == day(3)
        ));
        assert_eq!(upgrader.gate().current().await.unwrap(), Some(day(2)));
        // step 4 never ran
        assert_eq!(counter(&store).await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn second_run_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let upgrader = upgrader(store.clone(), None);
        upgrader.gate().advance(day(1)).await.unwrap();

        assert!(upgrader.upgrade().await.unwrap().updates_made);
        let again = upgrader.upgrade().await.unwrap();
        assert!(!again.updates_made);
        assert_eq!(again.applied(), 0);
        assert_eq!(counter(&store).await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn status_lists_pending_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let upgrader = upgrader(store.clone(), None);

        let fresh = upgrader.status().await.unwrap();
        assert_eq!(fresh.current, None);
        assert!(fresh.pending.is_empty());
        assert_eq!(store.key_count().unwrap(), 0);

        upgrader.gate().advance(day(3)).await.unwrap();
        let status = upgrader.status().await.unwrap();
        assert_eq!(status.current, Some(day(3)));
        assert!(status.upgradable);
        assert_eq!(status.pending, vec![(day(4), "bump".to_string())]);
    }

    #[test]
    fn report_serializes_with_status_tag() {
        let report = UpgradeReport {
            starting_version: day(1),
            final_version: day(2),
            updates_made: true,
            steps: vec![StepReport {
                version: day(2),
                description: "bump".into(),
                status: StepStatus::Applied {
                    tally: Tally {
                        processed: 3,
                        updated: 2,
                        missing: 1,
                    },
                    elapsed_ms: 7,
                },
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["status"], "applied");
        assert_eq!(json["steps"][0]["tally"]["missing"], 1);
        assert_eq!(json["final_version"], day(2).as_millis());
    }
}
