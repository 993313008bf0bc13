//! Commit message composition
//!
//! Turns a change summary into the message sent with an upload, unless the
//! user supplied their own.

use crate::fingerprint::ChangeSummary;
use chrono::{DateTime, Utc};

/// Options for commit message formatting
#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    /// Custom template (see [`expand_template`] for placeholders)
    pub template: Option<String>,
}

/// Compose the message for an upload
///
/// A non-empty override wins (trimmed, otherwise verbatim). Without one, the
/// template or the default rendering describes the summary; an empty summary
/// falls back to a timestamp-only message.
pub fn compose(
    summary: &ChangeSummary,
    override_message: Option<&str>,
    options: &ComposeOptions,
    now_ms: u64,
) -> String {
    if let Some(text) = override_message.map(str::trim).filter(|t| !t.is_empty()) {
        return text.to_string();
    }

    if let Some(ref template) = options.template {
        return expand_template(template, summary, now_ms);
    }

    match summary {
        ChangeSummary::Structural {
            added,
            removed,
            modified,
            kinds,
        } if !summary.is_empty() => {
            let mut msg = format!(
                "Update: {} modified, {} added, {} removed",
                modified, added, removed
            );
            if !kinds.is_empty() {
                let kinds: Vec<&str> = kinds.iter().map(String::as_str).collect();
                msg.push_str(&format!(" ({})", kinds.join(", ")));
            }
            msg
        }
        ChangeSummary::Coarse {
            previous_size,
            current_size,
        } => {
            if previous_size == current_size {
                format!("Update: scene modified ({})", format_size(*current_size))
            } else {
                format!(
                    "Update: scene modified ({} -> {})",
                    format_size(*previous_size),
                    format_size(*current_size)
                )
            }
        }
        _ => format!("Update: scene saved at {}", format_utc(now_ms)),
    }
}

/// Expand template string with summary data
///
/// Supported placeholders:
/// - {added} / {removed} / {modified} - element counts (0 when unknown)
/// - {kinds} - comma separated element categories
/// - {timestamp} - UTC time of composition
fn expand_template(template: &str, summary: &ChangeSummary, now_ms: u64) -> String {
    let (added, removed, modified, kinds) = match summary {
        ChangeSummary::Structural {
            added,
            removed,
            modified,
            kinds,
        } => (
            *added,
            *removed,
            *modified,
            kinds.iter().cloned().collect::<Vec<_>>().join(", "),
        ),
        _ => (0, 0, 0, String::new()),
    };

    template
        .replace("{added}", &added.to_string())
        .replace("{removed}", &removed.to_string())
        .replace("{modified}", &modified.to_string())
        .replace("{kinds}", &kinds)
        .replace("{timestamp}", &format_utc(now_ms))
}

/// Format Unix milliseconds as `2024-01-03 14:30:00 UTC`
pub fn format_utc(ts_ms: u64) -> String {
    i64::try_from(ts_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
