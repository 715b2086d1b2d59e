use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// schemata: run and inspect schema upgrades.
///
/// Checks whether a database is on the latest schema, applies pending
/// upgrade steps, and reports what is left to do.
#[derive(Parser)]
#[command(name = "schemata", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Exit non-zero if the database needs an upgrade.
    Check {
        /// Path to the SQLite database file.
        #[arg(env = "SCHEMATA_DB")]
        db: String,
    },

    /// Apply every pending upgrade step.
    Upgrade {
        /// Path to the SQLite database file.
        #[arg(env = "SCHEMATA_DB")]
        db: String,

        /// Records fetched per batch.
        #[arg(long, default_value = "100")]
        batch_size: usize,

        /// Records processed concurrently within a batch.
        #[arg(long, default_value = "10")]
        concurrency: usize,

        /// Pause between batches, in milliseconds.
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Print the upgrade report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the stored schema version and pending steps.
    Status {
        /// Path to the SQLite database file.
        #[arg(env = "SCHEMATA_DB")]
        db: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the built-in upgrade steps.
    Steps,
}

// Logs go to stderr so that `--json` output on stdout stays parseable.
//   LOG_FORMAT - "text" (default) or "json"
//   RUST_LOG   - standard env filter (default: "schemata=info")
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "schemata=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Commands::Check { db } => commands::check(&db).await,
        Commands::Upgrade {
            db,
            batch_size,
            concurrency,
            interval_ms,
            json,
        } => commands::upgrade(&db, batch_size, concurrency, interval_ms, json).await,
        Commands::Status { db, json } => commands::status(&db, json).await,
        Commands::Steps => commands::steps(),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn upgrade_flags() {
        let cli = Cli::try_parse_from([
            "schemata",
            "upgrade",
            "forum.db",
            "--batch-size",
            "500",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Upgrade {
                db,
                batch_size,
                concurrency,
                interval_ms,
                json,
            } => {
                assert_eq!(db, "forum.db");
                assert_eq!(batch_size, 500);
                assert_eq!(concurrency, 10);
                assert_eq!(interval_ms, None);
                assert!(json);
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn steps_needs_no_database() {
        assert!(matches!(
            Cli::try_parse_from(["schemata", "steps"]).unwrap().command,
            Commands::Steps
        ));
    }
}
