use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use schemata_migrate::{
    default_registry, BatchOptions, StepStatus, UpgradeConfig, UpgradeReport, Upgrader,
};
use schemata_store::SqliteStore;
use serde_json::json;

type BoxError = Box<dyn std::error::Error>;
type Result = std::result::Result<(), BoxError>;

fn open_store(db_path: &str) -> std::result::Result<SqliteStore, BoxError> {
    if !Path::new(db_path).exists() {
        return Err(format!("Database not found: {db_path}").into());
    }
    Ok(SqliteStore::open(db_path)?)
}

fn upgrader(store: SqliteStore, config: UpgradeConfig) -> std::result::Result<Upgrader, BoxError> {
    Ok(Upgrader::new(Arc::new(store), default_registry()?, config)?)
}

/// `schemata check <db>`: boot gate.
pub async fn check(db_path: &str) -> Result {
    let upgrader = upgrader(open_store(db_path)?, UpgradeConfig::default())?;
    upgrader.check().await?;

    let latest = upgrader.config().latest;
    println!("{} schema is up to date [{latest}]", style("✓").green());
    Ok(())
}

/// `schemata upgrade <db>`: apply pending steps.
pub async fn upgrade(
    db_path: &str,
    batch_size: usize,
    concurrency: usize,
    interval_ms: Option<u64>,
    as_json: bool,
) -> Result {
    if batch_size == 0 || concurrency == 0 {
        return Err("--batch-size and --concurrency must be at least 1".into());
    }
    let config = UpgradeConfig {
        batch: BatchOptions {
            batch_size,
            concurrency,
            interval: interval_ms.map(Duration::from_millis),
        },
        ..UpgradeConfig::default()
    };
    let upgrader = upgrader(open_store(db_path)?, config)?;
    let report = upgrader.upgrade().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &UpgradeReport) {
    println!(
        "Schema: {} -> {}",
        report.starting_version, report.final_version
    );
    println!();

    for step in &report.steps {
        match &step.status {
            StepStatus::Skipped => {
                println!(
                    "  [{}] {:<44} {}",
                    step.version,
                    truncate(&step.description, 44),
                    style("skipped").dim()
                );
            }
            StepStatus::Applied { tally, elapsed_ms } => {
                println!(
                    "  [{}] {:<44} {}  {} processed, {} updated, {} missing ({elapsed_ms} ms)",
                    step.version,
                    truncate(&step.description, 44),
                    style("OK").green(),
                    format_num(tally.processed),
                    format_num(tally.updated),
                    format_num(tally.missing),
                );
            }
        }
    }
    println!();

    if report.updates_made {
        let totals = report.totals();
        println!(
            "{} {} step(s) applied; {} records processed, {} updated",
            style("Schema update complete!").green().bold(),
            report.applied(),
            format_num(totals.processed),
            format_num(totals.updated),
        );
    } else {
        println!("{}", style("Schema already up to date!").green());
    }
}

/// `schemata status <db>`: stored version, bounds, and what an upgrade would run.
pub async fn status(db_path: &str, as_json: bool) -> Result {
    let store = open_store(db_path)?;
    let journal = store.journal_mode().await?;
    let size = store.file_size().await?;
    let (scalars, objects, sorted_sets) = store.key_counts().await?;

    let upgrader = upgrader(store, UpgradeConfig::default())?;
    let status = upgrader.status().await?;

    if as_json {
        let output = json!({
            "database": db_path,
            "journal_mode": journal,
            "size_bytes": size,
            "keys": {
                "scalars": scalars,
                "objects": objects,
                "sorted_sets": sorted_sets,
            },
            "schema": status,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database: {db_path} (SQLite, {journal} mode)");
    println!("Size: {}", format_bytes(size));
    println!(
        "Keys: {} scalars, {} objects, {} sorted sets",
        format_num(scalars),
        format_num(objects),
        format_num(sorted_sets)
    );
    println!();

    match status.current {
        Some(current) => println!("  Stored schema:  {current}"),
        None => println!("  Stored schema:  (none, will be stamped on first check)"),
    }
    println!("  Minimum:        {}", status.minimum);
    println!("  Latest:         {}", status.latest);
    println!();

    if !status.upgradable {
        println!(
            "{}",
            style(
                "Schema is older than the minimum supported version; \
                 upgrade through an intermediate release first."
            )
            .red()
        );
    } else if status.pending.is_empty() {
        println!("{}", style("Up to date.").green());
    } else {
        println!("Pending steps ({}):", status.pending.len());
        for (version, description) in &status.pending {
            println!("  [{version}] {description}");
        }
    }
    Ok(())
}

/// `schemata steps`: list the registry.
pub fn steps() -> Result {
    let registry = default_registry()?;
    println!("{} registered steps:", registry.len());
    for (version, description) in registry.registered_steps() {
        println!("  [{version}] {description}");
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_num(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max - 3).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_numbers() {
        assert_eq!(format_num(0), "0");
        assert_eq!(format_num(999), "999");
        assert_eq!(format_num(10_000), "10,000");
        assert_eq!(format_num(1_234_567), "1,234,567");
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn truncates_long_descriptions() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Update urls in config to `/assets`", 12), "Update ur...");
    }

    #[tokio::test]
    async fn missing_database_is_an_error() {
        let dir = std::env::temp_dir().join("schemata-cli-does-not-exist.db");
        let err = check(dir.to_str().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("Database not found"));
    }
}
