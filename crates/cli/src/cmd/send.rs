//! Upload the current document state once

use crate::cmd::watch::print_report;
use crate::locks::{LedgerLock, Role};
use crate::util::{self, GlobalArgs};
use anyhow::{Context as _, Result};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use pipeline::JobOutcome;
use qs_core::SystemClock;
use scheduler::{Context, JobReport, Scheduler, Submission, Trigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

pub async fn run(args: &GlobalArgs, message: Option<String>) -> Result<()> {
    let (config, _document, layout) = util::load_document_config(args)?;
    if config.upload.webhook_url.is_empty() {
        anyhow::bail!("No webhook configured. Run 'qs config set upload.webhook_url <url>'");
    }

    let _lock = LedgerLock::acquire(&layout, Role::Send)?;

    let ctx = Context::from_config(config, Arc::new(SystemClock))
        .context("Failed to initialize quicksave")?;
    let (scheduler, mut reports) = Scheduler::start(ctx, &Handle::current());

    let result = submit_and_wait(&scheduler, &mut reports, message).await;
    scheduler.shutdown().await;
    result
}

async fn submit_and_wait(
    scheduler: &Scheduler,
    reports: &mut UnboundedReceiver<JobReport>,
    message: Option<String>,
) -> Result<()> {
    let submission = scheduler
        .submit_trigger_async(Trigger::manual(message))
        .await
        .context("Failed to capture the document")?;

    let job_id = match submission {
        Submission::Accepted(job_id) => job_id,
        Submission::Rejected(rejection) => {
            println!("{} {}", "Nothing sent:".yellow(), rejection);
            return Ok(());
        }
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Archiving and uploading {}", util::short_id(&job_id)));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let report = tokio::select! {
        report = reports.recv() => report,
        _ = tokio::signal::ctrl_c() => {
            spinner.set_message("Cancelling");
            scheduler.cancel();
            reports.recv().await
        }
    };
    spinner.finish_and_clear();

    let report = report.context("Scheduler stopped before the job finished")?;
    print_report(&report);

    match report.outcome {
        JobOutcome::Failed(_) => anyhow::bail!("Upload failed"),
        JobOutcome::Succeeded(_) | JobOutcome::Cancelled(_) => Ok(()),
    }
}
