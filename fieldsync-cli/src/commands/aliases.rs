//! `fieldsync aliases`: what the alias journal has recorded.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fieldsync_core::{config, paths};
use fieldsync_sync::alias::load_journal_at;

#[derive(Args, Debug)]
pub struct AliasesArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize, Tabled)]
struct AliasRow {
    #[tabled(rename = "provider id")]
    provider_id: String,
    #[tabled(rename = "store id")]
    store_id: String,
    #[tabled(rename = "key")]
    key: String,
}

impl AliasesArgs {
    pub fn run(self) -> Result<()> {
        let home = config::home().context("could not determine home directory")?;
        let journal = load_journal_at(&home).context("failed to read alias journal")?;

        let rows: Vec<AliasRow> = journal
            .aliases
            .iter()
            .map(|(provider_id, store_id)| AliasRow {
                provider_id: provider_id.clone(),
                key: paths::key_from_id(store_id).to_string(),
                store_id: store_id.clone(),
            })
            .collect();

        if self.json {
            let payload = serde_json::json!({
                "synced_at": journal.synced_at.to_rfc3339(),
                "aliases": rows,
                "retired": journal.retired,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize aliases")?
            );
            return Ok(());
        }

        if rows.is_empty() {
            println!("No aliases recorded. Run `fieldsync sync` first.");
            return Ok(());
        }
        println!(
            "{} aliases, {} retired | journal updated {}",
            rows.len(),
            journal.retired.len(),
            journal.synced_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
