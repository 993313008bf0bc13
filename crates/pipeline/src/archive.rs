//! Compressing a snapshot into an uploadable artifact

use async_trait::async_trait;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Archive written by an [`Archiver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
}

impl Artifact {
    /// File name sent to the webhook
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string())
    }

    /// Delete the artifact; failures are only logged
    pub async fn remove(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove artifact");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// 0 (fastest) to 9 (smallest)
    pub level: u32,
    /// Where artifacts are written
    pub output_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to launch {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archiver exited with {status}: {stderr}")]
    ToolFailed { status: String, stderr: String },
    #[error("archiver reported success but produced no output at {}", .0.display())]
    MissingOutput(PathBuf),
    #[error("archive task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, source: &Path, options: &ArchiveOptions)
        -> Result<Artifact, ArchiveError>;
}

/// Output path `<output_dir>/<source file name>.<ext>`
fn artifact_path(source: &Path, options: &ArchiveOptions, ext: &str) -> PathBuf {
    let mut name: OsString = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("snapshot"));
    name.push(".");
    name.push(ext);
    options.output_dir.join(name)
}

async fn prepare_output(options: &ArchiveOptions, output: &Path) -> Result<(), ArchiveError> {
    tokio::fs::create_dir_all(&options.output_dir)
        .await
        .map_err(|source| ArchiveError::Io {
            path: options.output_dir.clone(),
            source,
        })?;

    // 7-Zip appends to an existing archive instead of replacing it
    match tokio::fs::remove_file(output).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ArchiveError::Io {
            path: output.to_path_buf(),
            source,
        }),
    }
}

/// Remove whatever a failed run left at `output`
async fn discard_partial(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!(path = %output.display(), "removed partial archive"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %output.display(), error = %e, "failed to remove partial archive"),
    }
}

async fn artifact_at(path: PathBuf) -> Result<Artifact, ArchiveError> {
    match tokio::fs::metadata(&path).await {
        Ok(meta) => Ok(Artifact {
            path,
            size: meta.len(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ArchiveError::MissingOutput(path)),
        Err(source) => Err(ArchiveError::Io { path, source }),
    }
}

/// Runs an external 7-Zip executable (`a -t7z -mx=N -m0=lzma2`)
#[derive(Debug, Clone)]
pub struct SevenZipArchiver {
    program: PathBuf,
}

impl SevenZipArchiver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Archiver for SevenZipArchiver {
    async fn archive(
        &self,
        source: &Path,
        options: &ArchiveOptions,
    ) -> Result<Artifact, ArchiveError> {
        let output = artifact_path(source, options, "7z");
        prepare_output(options, &output).await?;

        debug!(program = %self.program.display(), source = %source.display(), level = options.level, "running 7-Zip");

        let result = Command::new(&self.program)
            .arg("a")
            .arg("-t7z")
            .arg(format!("-mx={}", options.level.min(9)))
            .arg("-m0=lzma2")
            .arg(&output)
            .arg(source)
            .output()
            .await
            .map_err(|source| ArchiveError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            discard_partial(&output).await;
            return Err(ArchiveError::ToolFailed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        artifact_at(output).await
    }
}

/// Compresses in-process with zstd on a blocking thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdArchiver;

impl ZstdArchiver {
    /// Map the 0-9 archive level onto zstd's 1-19
    fn zstd_level(level: u32) -> i32 {
        (level.min(9) as i32 * 2).clamp(1, 19)
    }
}

#[async_trait]
impl Archiver for ZstdArchiver {
    async fn archive(
        &self,
        source: &Path,
        options: &ArchiveOptions,
    ) -> Result<Artifact, ArchiveError> {
        let output = artifact_path(source, options, "zst");
        prepare_output(options, &output).await?;

        let level = Self::zstd_level(options.level);
        let src = source.to_path_buf();
        let dst = output.clone();

        let encoded = tokio::task::spawn_blocking(move || -> Result<(), ArchiveError> {
            let input = File::open(&src).map_err(|source| ArchiveError::Io {
                path: src.clone(),
                source,
            })?;
            let out = File::create(&dst).map_err(|source| ArchiveError::Io {
                path: dst.clone(),
                source,
            })?;
            let mut writer = BufWriter::new(out);
            zstd::stream::copy_encode(BufReader::new(input), &mut writer, level)
                .and_then(|()| writer.flush())
                .map_err(|source| ArchiveError::Io { path: dst, source })
        })
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))
        .and_then(|r| r);

        if let Err(e) = encoded {
            discard_partial(&output).await;
            return Err(e);
        }

        artifact_at(output).await
    }
}
