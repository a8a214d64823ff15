//! `fieldsync sync`: one poll tick against the configured collaborators.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use fieldsync_core::config;
use fieldsync_sync::{
    run_tick, EntityKind, FetchStatus, ReconcileOutcome, RecordReport, Session, SyncState,
    TickReport,
};

/// Arguments for `fieldsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Emit the tick report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "kind")]
    kind: &'static str,
    #[tabled(rename = "provider id")]
    provider_id: String,
    #[tabled(rename = "store id")]
    store_id: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = config::home().context("could not determine home directory")?;
        let config = config::load_at(&home).context("failed to load config")?;
        if !self.json {
            fieldsync_daemon::init_tracing(&config.logging);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let report = runtime.block_on(async {
            let session = Session::connect_at(&home, &config)?;
            let mut state = SyncState::new(session, Utc::now());
            anyhow::Ok(run_tick(&mut state, Utc::now()).await)
        })?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize tick report")?
            );
        } else {
            print_report(&report);
        }

        if let FetchStatus::Failed(error) = &report.fetch {
            bail!("grower fetch failed: {error}");
        }
        if let Some(reason) = &report.aborted {
            bail!("tick aborted: {reason}");
        }
        Ok(())
    }
}

fn print_report(report: &TickReport) {
    println!("since {}", report.since.bright_black());
    match &report.fetch {
        FetchStatus::NotModified => {
            println!("✓ nothing changed since the cursor");
            return;
        }
        FetchStatus::Failed(_) => return,
        FetchStatus::Fetched => {}
    }

    println!(
        "✓ {} records ({} written, {} unchanged, {} failed)",
        report.records.len(),
        report.writes(),
        report.count(ReconcileOutcome::Unchanged),
        report.failed(),
    );
    if report.records.is_empty() {
        return;
    }

    let rows: Vec<RecordRow> = report.records.iter().map(row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn row(record: &RecordReport) -> RecordRow {
    RecordRow {
        kind: kind_label(record.kind),
        provider_id: record.provider_id.clone(),
        store_id: record.store_id.clone().unwrap_or_else(|| "-".to_string()),
        outcome: outcome_label(record.outcome),
        detail: record.detail.clone().unwrap_or_default(),
    }
}

fn kind_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Grower => "grower",
        EntityKind::Farm => "farm",
        EntityKind::Field => "field",
    }
}

fn outcome_label(outcome: ReconcileOutcome) -> String {
    match outcome {
        ReconcileOutcome::Created => "created".green().to_string(),
        ReconcileOutcome::Updated => "updated".green().to_string(),
        ReconcileOutcome::MetaBackfilled => "meta backfilled".green().to_string(),
        ReconcileOutcome::Deleted => "deleted".yellow().to_string(),
        ReconcileOutcome::Unchanged => "unchanged".bright_black().to_string(),
        ReconcileOutcome::Skipped => "skipped".bright_black().to_string(),
        ReconcileOutcome::Failed => "failed".red().bold().to_string(),
    }
}
