//! Show document, daemon and upload status

use crate::locks::{Acquire, LedgerLock, Role};
use crate::util::{self, GlobalArgs};
use anyhow::{Context, Result};
use ledger::{Ledger, LedgerStore};
use owo_colors::OwoColorize;
use qs_core::clock::unix_now_ms;
use qs_core::compose::{format_size, format_utc};
use qs_core::{compose, ChangeSummary, ComposeOptions, Config, FingerprintEngine, Snapshot};
use scheduler::CooldownGate;
use std::path::Path;

pub async fn run(args: &GlobalArgs) -> Result<()> {
    let (config, document, layout) = util::load_document_config(args)?;
    let lock = LedgerLock::try_acquire(&layout, Role::Status)?;

    println!("{}", "quicksave Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    print!("Document:      {}", document.display().to_string().cyan());
    if document.exists() {
        println!();
    } else {
        println!(" {}", "(missing)".red());
    }
    println!("State:         {}", layout.root.display());
    if config.upload.webhook_url.is_empty() {
        println!("Webhook:       {}", "not configured".yellow());
    } else {
        println!(
            "Webhook:       {}",
            pipeline::upload::redact(&config.upload.webhook_url)
        );
    }
    println!("Fingerprint:   {}", config.fingerprint.policy);
    println!();

    print!("Daemon:        ");
    let _lock = match lock {
        Acquire::Acquired(lock) => {
            println!("{}", "Not running".yellow());
            println!("  {}", "Tip: Start with 'qs watch'".dimmed());
            lock
        }
        Acquire::Busy(Some(owner)) if owner.role == Role::Watch => {
            println!("{} (pid {})", "Running ✓".green(), owner.pid);
            println!();
            // sled allows a single process per database
            println!(
                "  {}",
                "The ledger is held by the daemon. Type ':status' in its terminal for live state."
                    .dimmed()
            );
            return Ok(());
        }
        Acquire::Busy(owner) => {
            println!("{}", "Not running".yellow());
            println!();
            let note = match owner {
                Some(owner) => owner.refusal(),
                None => "The ledger is in use by another qs command.".to_string(),
            };
            println!("  {}", note.dimmed());
            return Ok(());
        }
    };
    println!();

    let ledger_dir = layout.ledger();
    if !ledger_dir.exists() {
        println!("{}", "No uploads yet".dimmed());
        return Ok(());
    }

    let store = LedgerStore::open(&ledger_dir, config.ledger.retention_count)
        .context("Failed to open upload ledger")?;
    let ledger = store.load().context("Failed to read upload ledger")?;
    let now_ms = unix_now_ms();

    println!("Uploads:       {} remembered", ledger.len());
    match ledger.last() {
        Some(entry) => {
            println!("Last upload:");
            println!("  Message:     {}", entry.message);
            println!(
                "  Time:        {} ({})",
                util::format_relative_time(entry.timestamp_ms),
                format_utc(entry.timestamp_ms).dimmed()
            );
            println!("  Size:        {}", format_size(entry.outcome.artifact_bytes));
        }
        None => println!("Last upload:   {}", "none".dimmed()),
    }

    let mut gate = CooldownGate::new(config.cooldown());
    if let Some(ts) = store.last_acceptance().context("Failed to read cooldown state")? {
        gate.restore(ts);
    }
    let remaining = gate.remaining(now_ms);
    if remaining.is_zero() {
        println!("Cooldown:      {}", "ready".green());
    } else {
        println!(
            "Cooldown:      {}s remaining",
            (remaining.as_secs_f64().ceil() as u64).to_string().yellow()
        );
    }
    println!();

    if document.exists() {
        print_pending(&config, &document, &ledger, now_ms)?;
    }

    Ok(())
}

/// What `qs send` would upload right now
fn print_pending(config: &Config, document: &Path, ledger: &Ledger, now_ms: u64) -> Result<()> {
    let engine = FingerprintEngine::new(config.fingerprint.policy);
    let snapshot = Snapshot::from_path(0, now_ms, document);
    let fingerprint = engine
        .fingerprint(&snapshot)
        .context("Failed to fingerprint document")?;

    if ledger.is_duplicate(&fingerprint) {
        println!("Changes:       {}", "none since the last upload".dimmed());
        return Ok(());
    }

    let summary = ChangeSummary::between(ledger.last().map(|e| &e.fingerprint), &fingerprint);
    let options = ComposeOptions {
        template: config.message.template.clone(),
    };
    println!("Changes:       {}", "pending".yellow());
    println!("  {}", compose(&summary, None, &options, now_ms));
    Ok(())
}
