//! # schemata-migrate
//!
//! Forward-only, resumable schema upgrades for a live key-value store.
//!
//! The store carries its schema version under a single key, `schemaDate`.
//! Each upgrade step is tagged with the date it was written; an upgrade runs
//! every step newer than the stored date, oldest first, and bumps the stored
//! date after each one completes.
//!
//! ## How It Works
//!
//! 1. The [`VersionGate`] reads `schemaDate`. A fresh store is stamped with
//!    [`LATEST_SCHEMA_DATE`]; a store older than [`MIN_SCHEMA_DATE`] is refused.
//! 2. The [`Upgrader`] walks the [`StepRegistry`] in order, skipping steps the
//!    store already has.
//! 3. Steps that touch large collections walk them in chunks with
//!    [`for_each_member`] / [`process_sorted_set`].
//! 4. After a step succeeds its date is persisted. A failure stops the run;
//!    running again picks up at the failed step.
//!
//! ## Key Concepts
//!
//! - **Idempotent steps**: a step interrupted half way is simply run again.
//! - **Monotonic version**: the stored date never moves backwards.
//! - **Boot gate**: [`Upgrader::check`] refuses to serve an out-of-date store.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use schemata_migrate::{SchemaDate, Upgrader, SCHEMA_DATE_KEY};
//! use schemata_store::{KvStore, MemoryStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! let old = SchemaDate::ymd(2016, 11, 25);
//! store.set(SCHEMA_DATE_KEY, &old.as_millis().to_string()).await.unwrap();
//!
//! let upgrader = Upgrader::with_defaults(store.clone()).unwrap();
//! assert!(upgrader.check().await.is_err());
//!
//! let report = upgrader.upgrade().await.unwrap();
//! assert!(report.updates_made);
//! assert!(upgrader.check().await.is_ok());
//! # }
//! ```

mod batch;
mod error;
mod gate;
mod observer;
mod runner;
mod step;
pub mod steps;
mod version;

pub use batch::{
    for_each_member, process_sorted_set, BatchOptions, RecordOutcome, SortedSetCursor, Tally,
};
pub use error::{RegistryError, StepError, UpgradeError};
pub use gate::VersionGate;
pub use observer::{TracingObserver, UpgradeEvent, UpgradeObserver};
pub use runner::{StepReport, StepStatus, UpgradeConfig, UpgradeReport, UpgradeStatus, Upgrader};
pub use step::{MigrationStep, StepContext, StepRegistry};
pub use steps::default_registry;
pub use version::{SchemaDate, LATEST_SCHEMA_DATE, MIN_SCHEMA_DATE, SCHEMA_DATE_KEY};
