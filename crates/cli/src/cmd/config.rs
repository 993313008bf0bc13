//! Configuration management command
//!
//! Provides CLI interface to view and edit the configuration file.

use crate::system_config;
use crate::util::GlobalArgs;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use qs_core::config::example_config;
use qs_core::Config;

/// Valid ranges shown by `list`
const RANGES: &[(&str, &str)] = &[
    ("gate.cooldown_secs", "0-3600 (0 = no cooldown)"),
    ("ledger.retention_count", "1-10,000"),
    ("upload.retry_bound", "1-10"),
    ("upload.timeout_secs", "1-600"),
    ("archive.level", "0-9"),
    ("fingerprint.policy", "structural | whole | sampled"),
    ("watch.debounce_ms", "50-60,000"),
];

/// Keys whose values are never printed in full
const SECRET_KEYS: &[&str] = &["upload.webhook_url", "upload.token"];

/// List all configuration values
pub async fn run_list(args: &GlobalArgs) -> Result<()> {
    let path = args.config_path()?;
    let config = system_config::load(&path)?;
    let table = to_table(&config)?;

    println!("{}", "Configuration".bold());
    println!("{}: {}\n", "Location".dimmed(), path.display().dimmed());

    let mut first = true;
    for (section, values) in &table {
        let Some(values) = values.as_table() else {
            continue;
        };
        if !first {
            println!();
        }
        first = false;

        println!("{}", format!("[{}]", section).yellow());
        for (key, value) in values {
            let full_key = format!("{}.{}", section, key);
            println!("  {} = {}", key.cyan(), display_value(&full_key, value));
        }
    }

    println!("\n{}", "Valid Ranges:".bold());
    for (key, range) in RANGES {
        println!("  {}: {}", key, range);
    }

    Ok(())
}

/// Get a single configuration value
pub async fn run_get(args: &GlobalArgs, key: &str) -> Result<()> {
    let config = system_config::load(&args.config_path()?)?;
    let table = to_table(&config)?;

    let (section, field) = split_key(key)?;
    match table.get(section).and_then(|s| s.get(field)) {
        Some(value) => println!("{}", plain_value(value)),
        // Unset optional values are omitted from the serialized table
        None if is_known_key(section, field) => println!(),
        None => anyhow::bail!(
            "Unknown config key: {}. Use 'qs config list' to see available keys.",
            key
        ),
    }
    Ok(())
}

/// Set a configuration value
pub async fn run_set(args: &GlobalArgs, key: &str, value: &str) -> Result<()> {
    let path = args.config_path()?;
    let config = system_config::load(&path)?;
    let updated = apply(&config, key, value)?;

    system_config::save(&path, &updated)?;

    println!("{} {} = {}", "✓".green(), key.cyan(), value);
    println!(
        "{}",
        "Note: Restart 'qs watch' for changes to take effect".yellow()
    );
    Ok(())
}

/// Show the config file path and optionally create it
pub async fn run_path(args: &GlobalArgs, create: bool) -> Result<()> {
    let path = args.config_path()?;

    if create && system_config::init_if_missing(&path)? {
        println!("{} Created config file at: {}", "✓".green(), path.display());
    } else {
        println!("{}", path.display());
        if !path.exists() {
            println!("{}", "File does not exist. Use --create to create it.".yellow());
        }
    }
    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", example_config());
    Ok(())
}

fn to_table(config: &Config) -> Result<toml::Table> {
    let text = config.to_toml_string()?;
    text.parse::<toml::Table>()
        .context("Failed to render configuration")
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    key.split_once('.')
        .filter(|(section, field)| !section.is_empty() && !field.is_empty())
        .with_context(|| format!("Config keys look like 'section.key', got '{}'", key))
}

fn is_known_key(section: &str, field: &str) -> bool {
    matches!(
        (section, field),
        ("document", "path")
            | ("document", "state_dir")
            | ("upload", "token")
            | ("archive", "archiver_path")
            | ("message", "template")
    )
}

/// Set `key` to `raw` and validate the result
fn apply(config: &Config, key: &str, raw: &str) -> Result<Config> {
    let (section, field) = split_key(key)?;
    let mut table = to_table(config)?;

    let current = table.get(section).and_then(|s| s.get(field)).cloned();
    if current.is_none() && !is_known_key(section, field) {
        anyhow::bail!(
            "Unknown config key: {}. Use 'qs config list' to see available keys.",
            key
        );
    }

    let value = parse_value(raw, current.as_ref())
        .with_context(|| format!("Invalid value for {}: '{}'", key, raw))?;

    let section_table = table
        .entry(section.to_string())
        .or_insert(toml::Value::Table(toml::Table::new()))
        .as_table_mut()
        .with_context(|| format!("'{}' is not a section", section))?;
    section_table.insert(field.to_string(), value);

    let text = toml::to_string(&table).context("Failed to render configuration")?;
    Config::from_toml_str(&text).context("Invalid configuration value")
}

/// Parse with the type of the current value (strings when unknown)
fn parse_value(raw: &str, current: Option<&toml::Value>) -> Result<toml::Value> {
    Ok(match current {
        Some(toml::Value::Integer(_)) => toml::Value::Integer(
            raw.parse()
                .context("must be a non-negative integer")?,
        ),
        Some(toml::Value::Boolean(_)) => {
            toml::Value::Boolean(raw.parse().context("must be 'true' or 'false'")?)
        }
        _ => toml::Value::String(raw.to_string()),
    })
}

fn plain_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn display_value(key: &str, value: &toml::Value) -> String {
    let text = plain_value(value);
    if SECRET_KEYS.contains(&key) && !text.is_empty() {
        pipeline::upload::redact(&text)
    } else {
        text
    }
}
