//! Watch the document and upload changed saves

use crate::locks::{LedgerLock, Role};
use crate::logging;
use crate::util::{self, GlobalArgs};
use anyhow::{Context as _, Result};
use owo_colors::OwoColorize;
use pipeline::JobOutcome;
use qs_core::compose::format_size;
use qs_core::SystemClock;
use scheduler::{Context, JobReport, Scheduler, Submission, Trigger};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use watcher::{SaveWatcher, TriggerSink};

/// A line typed into the running daemon
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(Option<String>),
    Cancel,
    Status,
}

fn parse_command(line: &str) -> Command {
    match line.trim() {
        ":cancel" => Command::Cancel,
        ":status" => Command::Status,
        "" => Command::Send(None),
        text => Command::Send(Some(text.to_string())),
    }
}

/// Logs detected saves without submitting them (`watch.auto_send = false`)
struct LogOnly;

impl TriggerSink for LogOnly {
    fn trigger(&self, trigger: Trigger) {
        tracing::info!(kind = ?trigger.kind, "save detected (auto_send disabled)");
    }
}

pub async fn run(args: &GlobalArgs) -> Result<()> {
    let (config, document, layout) = util::load_document_config(args)?;
    if config.upload.webhook_url.is_empty() {
        anyhow::bail!("No webhook configured. Run 'qs config set upload.webhook_url <url>'");
    }

    let lock = LedgerLock::acquire(&layout, Role::Watch)?;
    let _log_guard = logging::init_daemon(&layout.logs())?;

    let debounce = Duration::from_millis(config.watch.debounce_ms);
    let auto_send = config.watch.auto_send;

    let ctx = Context::from_config(config, Arc::new(SystemClock))
        .context("Failed to initialize quicksave")?;
    let (scheduler, mut reports) = Scheduler::start(ctx, &Handle::current());
    let scheduler = Arc::new(scheduler);

    let sink: Arc<dyn TriggerSink> = if auto_send {
        scheduler.clone() as Arc<dyn TriggerSink>
    } else {
        Arc::new(LogOnly)
    };
    let watcher = SaveWatcher::start(&document, debounce, sink)
        .context("Failed to start file watcher")?;

    print_banner(&document, &layout.root, auto_send);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Stopping...".yellow());
                break;
            }
            Some(report) = reports.recv() => print_report(&report),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_command(&scheduler, parse_command(&line)).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin closed");
                    stdin_open = false;
                }
            },
        }
    }

    watcher.stop();
    scheduler.shutdown().await;
    // Report of a job cancelled by the shutdown
    while let Ok(report) = reports.try_recv() {
        print_report(&report);
    }
    drop(lock);

    Ok(())
}

fn print_banner(document: &Path, state_dir: &Path, auto_send: bool) {
    println!("{} {}", "Watching".green().bold(), document.display().cyan());
    println!("  {}", format!("State: {}", state_dir.display()).dimmed());
    if auto_send {
        println!("  {}", "Every changed save is uploaded".dimmed());
    } else {
        println!("  {}", "auto_send is off: saves are not uploaded automatically".yellow());
    }
    println!(
        "  {}",
        "Enter sends now (type a message first to override), ':cancel' cancels, ':status' shows state"
            .dimmed()
    );
}

async fn handle_command(scheduler: &Scheduler, command: Command) {
    match command {
        Command::Send(message) => match scheduler
            .submit_trigger_async(Trigger::manual(message))
            .await
        {
            Ok(Submission::Accepted(job_id)) => {
                println!("{} job {}", "→".cyan(), util::short_id(&job_id).yellow())
            }
            Ok(Submission::Rejected(rejection)) => {
                println!("{} {}", "·".yellow(), rejection.to_string().yellow())
            }
            Err(e) => println!("{} {}", "✗".red(), e.to_string().red()),
        },
        Command::Cancel => {
            if scheduler.cancel() {
                println!("{}", "Cancellation requested".yellow());
            } else {
                println!("{}", "No job is running".dimmed());
            }
        }
        Command::Status => {
            let status = scheduler.status();
            println!("State:     {}", status.state.to_string().cyan());
            if let Some(job_id) = status.running {
                println!("Job:       {}", util::short_id(&job_id).yellow());
            }
            println!("Uploads:   {}", status.ledger_len);
            if !status.cooldown_remaining.is_zero() {
                println!(
                    "Cooldown:  {}s remaining",
                    status.cooldown_remaining.as_secs_f64().ceil() as u64
                );
            }
        }
    }
}

pub(crate) fn print_report(report: &JobReport) {
    let id = util::short_id(&report.job_id);
    match &report.outcome {
        JobOutcome::Succeeded(record) => println!(
            "{} {} {} ({}, {} attempt{})",
            "✓".green(),
            id.yellow(),
            report.message,
            format_size(record.artifact_bytes),
            record.attempts,
            if record.attempts == 1 { "" } else { "s" }
        ),
        JobOutcome::Failed(failure) => {
            println!("{} {} {}", "✗".red(), id.yellow(), failure.to_string().red())
        }
        JobOutcome::Cancelled(reason) => {
            println!("{} {} cancelled: {}", "-".yellow(), id.yellow(), reason)
        }
    }
}
