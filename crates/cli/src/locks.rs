//! Ownership of a state directory's ledger
//!
//! sled opens a database from one process at a time. `qs watch` owns the
//! ledger for its whole run; `send`, `status` and `log` own it for a single
//! command. The owner writes its role and pid into the lock file so a refused
//! command can say who has it. The flock itself is the source of truth: the
//! kernel drops it when the owner exits, so leftover file content never
//! blocks anyone.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use qs_core::clock::unix_now_ms;
use scheduler::StateLayout;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

const LOCK_FILE: &str = "ledger.lock";

/// Command that owns the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Watch,
    Send,
    Status,
    Log,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Watch => "watch",
            Self::Send => "send",
            Self::Status => "status",
            Self::Log => "log",
        };
        f.write_str(name)
    }
}

/// Recorded in the lock file by the owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub role: Role,
    pub pid: u32,
    pub since_ms: u64,
}

impl Owner {
    /// Why a command cannot run right now
    pub fn refusal(&self) -> String {
        match self.role {
            Role::Watch => format!(
                "qs watch is running (pid {}) and owns the ledger. \
                 Press Enter in its terminal to send now, or stop it first.",
                self.pid
            ),
            role => format!(
                "qs {} (pid {}) is using the ledger. Try again in a moment.",
                role, self.pid
            ),
        }
    }
}

/// Held for as long as this process owns the ledger
pub struct LedgerLock {
    // Closing the file releases the flock
    _file: File,
}

pub enum Acquire {
    Acquired(LedgerLock),
    /// Owned elsewhere; `None` when the owner has not written its record yet
    Busy(Option<Owner>),
}

impl LedgerLock {
    /// Take ownership, or report who has it
    pub fn try_acquire(layout: &StateLayout, role: Role) -> Result<Acquire> {
        let mut file = open_lock_file(layout)?;

        if !try_flock(&file, FlockArg::LockExclusiveNonblock)? {
            return Ok(Acquire::Busy(read_owner(&mut file)));
        }

        let owner = Owner {
            role,
            pid: std::process::id(),
            since_ms: unix_now_ms(),
        };
        let record = serde_json::to_vec(&owner).context("Failed to serialize lock owner")?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&record)?;
        file.sync_all()?;

        Ok(Acquire::Acquired(Self { _file: file }))
    }

    /// Take ownership or fail with a message naming the owner
    pub fn acquire(layout: &StateLayout, role: Role) -> Result<Self> {
        match Self::try_acquire(layout, role)? {
            Acquire::Acquired(lock) => Ok(lock),
            Acquire::Busy(Some(owner)) => anyhow::bail!(owner.refusal()),
            Acquire::Busy(None) => anyhow::bail!("The ledger is in use by another qs command"),
        }
    }

    /// Current owner, if any process holds the lock
    pub fn owner(layout: &StateLayout) -> Option<Owner> {
        let mut file = File::open(lock_path(layout)).ok()?;
        match try_flock(&file, FlockArg::LockSharedNonblock) {
            // Nobody holds it exclusively; the shared lock ends with `file`
            Ok(true) => None,
            Ok(false) => read_owner(&mut file),
            Err(_) => None,
        }
    }
}

fn lock_path(layout: &StateLayout) -> PathBuf {
    layout.locks().join(LOCK_FILE)
}

fn open_lock_file(layout: &StateLayout) -> Result<File> {
    let dir = layout.locks();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    // Never truncate on open: the content belongs to the current owner
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path(layout))
        .context("Failed to open ledger lock file")
}

/// `Ok(false)` when another open file holds a conflicting lock
fn try_flock(file: &File, arg: FlockArg) -> Result<bool> {
    match flock(file.as_raw_fd(), arg) {
        Ok(()) => Ok(true),
        Err(Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e).context("flock failed"),
    }
}

fn read_owner(file: &mut File) -> Option<Owner> {
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
}
