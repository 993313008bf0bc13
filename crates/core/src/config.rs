//! Configuration model
//!
//! Loading and saving the file is the binary's job; this module only knows
//! the shape, the defaults and the valid ranges.

use crate::error::ConfigError;
use crate::fingerprint::FingerprintPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-document state directory
pub const STATE_DIR_NAME: &str = ".quicksave";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub document: DocumentConfig,
    pub gate: GateConfig,
    pub ledger: LedgerConfig,
    pub upload: UploadConfig,
    pub archive: ArchiveConfig,
    pub fingerprint: FingerprintConfig,
    pub message: MessageConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Scene file to track
    pub path: Option<PathBuf>,
    /// Ledger, staging, locks and logs (default: `<document dir>/.quicksave`)
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum interval between accepted triggers (0 disables the gate)
    pub cooldown_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { cooldown_secs: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Number of successful uploads remembered
    pub retention_count: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { retention_count: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub webhook_url: String,
    /// Sent as a bearer token when present
    pub token: Option<String>,
    /// Total upload attempts per job, first try included
    pub retry_bound: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            token: None,
            retry_bound: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// External 7-Zip executable; in-process zstd when unset
    pub archiver_path: Option<PathBuf>,
    /// 0 (fastest) to 9 (smallest)
    pub level: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archiver_path: None,
            level: 9,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub policy: FingerprintPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    pub template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Submit a trigger on every detected save (off: uploads are manual)
    pub auto_send: bool,
    /// Quiet period after the last save event before triggering
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            auto_send: false,
            debounce_ms: 500,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every value against its valid range
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("gate.cooldown_secs", self.gate.cooldown_secs, 0, 3_600)?;
        check_range(
            "ledger.retention_count",
            self.ledger.retention_count as u64,
            1,
            10_000,
        )?;
        check_range("upload.retry_bound", u64::from(self.upload.retry_bound), 1, 10)?;
        check_range("upload.timeout_secs", self.upload.timeout_secs, 1, 600)?;
        check_range("archive.level", u64::from(self.archive.level), 0, 9)?;
        check_range("watch.debounce_ms", self.watch.debounce_ms, 50, 60_000)?;

        if self.upload.backoff_max_ms < self.upload.backoff_base_ms {
            return Err(ConfigError::Invalid {
                key: "upload.backoff_max_ms",
                message: "must be at least upload.backoff_base_ms".to_string(),
            });
        }

        if !self.upload.webhook_url.is_empty()
            && !(self.upload.webhook_url.starts_with("https://")
                || self.upload.webhook_url.starts_with("http://"))
        {
            return Err(ConfigError::Invalid {
                key: "upload.webhook_url",
                message: "must be an http(s) URL".to_string(),
            });
        }

        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.gate.cooldown_secs)
    }

    /// Explicit state dir, or `.quicksave` next to the document
    pub fn state_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.document.state_dir {
            return Some(dir.clone());
        }
        let document = self.document.path.as_deref()?;
        let parent = document.parent().unwrap_or_else(|| Path::new("."));
        Some(parent.join(STATE_DIR_NAME))
    }
}

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("{} is outside {}-{}", value, min, max),
        })
    }
}

/// Commented example configuration
pub fn example_config() -> &'static str {
    r#"# quicksave configuration

[document]
path = "/home/artist/projects/shot_010/scene.blend"
# state_dir = "/home/artist/projects/shot_010/.quicksave"

[gate]
cooldown_secs = 30          # 0-3600, 0 disables the cooldown

[ledger]
retention_count = 50        # 1-10000

[upload]
webhook_url = "https://discord.com/api/webhooks/<id>/<token>"
# token = "bearer-token"
retry_bound = 3             # 1-10 attempts per job
backoff_base_ms = 1000
backoff_max_ms = 30000
timeout_secs = 30

[archive]
# archiver_path = "/usr/bin/7z"   # unset: built-in zstd
level = 9                   # 0-9

[fingerprint]
# structural skips thumbnails, UI layout and memory addresses that change per session
policy = "structural"       # structural | whole | sampled

[message]
# template = "Update: {modified} modified, {added} added ({kinds})"

[watch]
auto_send = false           # true: every changed save is uploaded
debounce_ms = 500
"#
}
