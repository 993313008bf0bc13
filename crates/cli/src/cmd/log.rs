//! Show upload history

use crate::locks::{LedgerLock, Role};
use crate::util::{self, GlobalArgs};
use anyhow::{Context, Result};
use ledger::LedgerStore;
use owo_colors::OwoColorize;
use qs_core::compose::format_size;

const DEFAULT_LIMIT: usize = 20;

pub async fn run(args: &GlobalArgs, limit: Option<usize>) -> Result<()> {
    let (config, _document, layout) = util::load_document_config(args)?;

    let _lock = LedgerLock::acquire(&layout, Role::Log)?;

    let ledger_dir = layout.ledger();
    if !ledger_dir.exists() {
        println!("{}", "No uploads yet".dimmed());
        return Ok(());
    }

    let store = LedgerStore::open(&ledger_dir, config.ledger.retention_count)
        .context("Failed to open upload ledger")?;
    let ledger = store.load().context("Failed to read upload ledger")?;

    if ledger.is_empty() {
        println!("{}", "No uploads yet".dimmed());
        return Ok(());
    }

    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    println!(
        "{} (showing {} of {})\n",
        "Upload history".bold(),
        limit.min(ledger.len()),
        ledger.len()
    );

    for entry in ledger.entries().rev().take(limit) {
        println!(
            "{}  {}  {}",
            util::short_id(&entry.job_id).yellow(),
            util::format_relative_time(entry.timestamp_ms).dimmed(),
            entry.message
        );
        println!(
            "            {}",
            format!(
                "{} · {} attempt(s) · {}",
                format_size(entry.outcome.artifact_bytes),
                entry.outcome.attempts,
                entry.fingerprint.digest.short()
            )
            .dimmed()
        );
    }

    Ok(())
}
