use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use yhmon_core::SnapshotDate;
use yhmon_sync::{monitor_from_env, AcquisitionMode};

#[derive(Debug, Parser)]
#[command(name = "yhmon")]
#[command(about = "Track YH late-application listings as daily snapshots and print what changed")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every category once, store today's snapshot and diff it against the previous one.
    Run {
        /// Read local fixture files instead of requesting the upstream site.
        #[arg(long)]
        offline: bool,
        /// Snapshot date to record (defaults to today).
        #[arg(long, value_name = "YYYYMMDD")]
        date: Option<SnapshotDate>,
    },
    /// Re-render the diff for an already stored snapshot without fetching.
    Report {
        #[arg(long, value_name = "YYYYMMDD")]
        date: Option<SnapshotDate>,
    },
    /// List stored snapshot dates per category.
    Snapshots,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Run {
        offline: false,
        date: None,
    });
    tracing::debug!(?command, "dispatching");

    match command {
        Commands::Run { offline, date } => {
            let mode = if offline {
                AcquisitionMode::Offline
            } else {
                AcquisitionMode::Live
            };
            let monitor = monitor_from_env(mode)?;
            let summary = monitor.run_once(date.unwrap_or_else(SnapshotDate::today)).await?;

            for outcome in &summary.outcomes {
                match &outcome.result {
                    Ok(report) => println!("{}", report.rendered),
                    Err(err) => eprintln!("[{}] ERROR ({}): {err}", outcome.category, summary.date),
                }
            }
            eprintln!(
                "run complete: run_id={} date={} categories={} failed={}",
                summary.run_id,
                summary.date,
                summary.outcomes.len(),
                summary.failed().count()
            );

            if summary.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Report { date } => {
            let monitor = monitor_from_env(AcquisitionMode::Offline)?;
            let date = date.unwrap_or_else(SnapshotDate::today);
            let mut failed = false;
            for comparison in monitor.compare_stored(date).await {
                match comparison.result {
                    Ok(Some(report)) => println!("{}", report.rendered),
                    Ok(None) => println!("[{}] no snapshot stored for {date}", comparison.category),
                    Err(err) => {
                        failed = true;
                        eprintln!("[{}] ERROR ({date}): {err}", comparison.category);
                    }
                }
            }
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Commands::Snapshots => {
            let monitor = monitor_from_env(AcquisitionMode::Offline)?;
            for (category, dates) in monitor.stored_dates().await? {
                let listed = dates.iter().map(ToString::to_string).collect::<Vec<_>>();
                if listed.is_empty() {
                    println!("{category}: (none)");
                } else {
                    println!("{category}: {}", listed.join(", "));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
