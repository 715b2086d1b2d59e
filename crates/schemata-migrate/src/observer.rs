use std::time::Duration;

use tracing::{error, info, warn};

use crate::batch::Tally;
use crate::error::StepError;
use crate::version::SchemaDate;

/// Progress notifications emitted by [`Upgrader::upgrade`](crate::Upgrader::upgrade).
#[derive(Debug)]
pub enum UpgradeEvent<'a> {
    Started {
        from: SchemaDate,
        latest: SchemaDate,
    },
    StepStarted {
        version: SchemaDate,
        description: &'a str,
    },
    /// The stored schema already includes this step.
    StepSkipped {
        version: SchemaDate,
        description: &'a str,
    },
    StepCompleted {
        version: SchemaDate,
        description: &'a str,
        tally: Tally,
        elapsed: Duration,
    },
    StepFailed {
        version: SchemaDate,
        description: &'a str,
        error: &'a StepError,
    },
    Finished {
        updates_made: bool,
        applied: usize,
        skipped: usize,
    },
}

/// Receives [`UpgradeEvent`]s as an upgrade runs.
pub trait UpgradeObserver: Send + Sync {
    fn on_event(&self, event: &UpgradeEvent<'_>);
}

/// Default observer: one log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl UpgradeObserver for TracingObserver {
    fn on_event(&self, event: &UpgradeEvent<'_>) {
        match event {
            UpgradeEvent::Started { from, latest } => {
                info!(%from, %latest, "Beginning database schema update");
            }
            UpgradeEvent::StepStarted {
                version,
                description,
            } => {
                info!("[{version}] {description}");
            }
            UpgradeEvent::StepSkipped {
                version,
                description,
            } => {
                info!("[{version}] {description}... skipped");
            }
            UpgradeEvent::StepCompleted {
                version,
                description,
                tally,
                elapsed,
            } => {
                if tally.missing > 0 {
                    warn!(
                        %version,
                        missing = tally.missing,
                        "index referenced records that no longer exist"
                    );
                }
                info!(
                    processed = tally.processed,
                    updated = tally.updated,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "[{version}] {description}... OK"
                );
            }
            UpgradeEvent::StepFailed {
                version,
                description,
                error,
            } => {
                error!(%error, "[{version}] {description}... failed");
            }
            UpgradeEvent::Finished {
                updates_made,
                applied,
                skipped,
            } => {
                if *updates_made {
                    info!(applied, skipped, "Schema update complete!");
                } else {
                    info!(skipped, "Schema already up to date!");
                }
            }
        }
    }
}
