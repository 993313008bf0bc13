//! Shared utilities for CLI commands

use crate::system_config;
use anyhow::{Context, Result};
use qs_core::Config;
use scheduler::StateLayout;
use std::path::{Path, PathBuf};

/// Options accepted by every command
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub document: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn config_path(&self) -> Result<PathBuf> {
        system_config::resolve_path(self.config.as_deref())
    }
}

/// Load the config file and apply `--document`
pub fn load_config(args: &GlobalArgs) -> Result<Config> {
    let mut config = system_config::load(&args.config_path()?)?;
    if let Some(document) = &args.document {
        config.document.path = Some(absolute(document)?);
    }
    Ok(config)
}

/// Like `load_config`, but a document is required
pub fn load_document_config(args: &GlobalArgs) -> Result<(Config, PathBuf, StateLayout)> {
    let config = load_config(args)?;
    let document = config
        .document
        .path
        .clone()
        .context("No document configured. Pass --document or run 'qs config set document.path <file>'")?;
    let state_dir = config
        .state_dir()
        .context("Could not determine state directory")?;
    Ok((config, document, StateLayout::new(state_dir)))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    Ok(cwd.join(path))
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(ts_ms: u64) -> String {
    format_elapsed(qs_core::clock::unix_now_ms(), ts_ms)
}

fn format_elapsed(now_ms: u64, ts_ms: u64) -> String {
    if ts_ms > now_ms {
        return "in the future".to_string();
    }
    let seconds = (now_ms - ts_ms) / 1000;

    if seconds < 60 {
        format!("{} seconds ago", seconds)
    } else if seconds < 3600 {
        format!("{} minutes ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours ago", seconds / 3600)
    } else if seconds < 604800 {
        format!("{} days ago", seconds / 86400)
    } else {
        format!("{} weeks ago", seconds / 604800)
    }
}

/// First 10 characters of an id
pub fn short_id(id: &impl ToString) -> String {
    id.to_string().chars().take(10).collect()
}
