//! Degraded-object log.
//!
//! When a stripe closes with missing or corrupt blocks the MC driver
//! appends one line per object to a log that the rebuild tooling reads
//! later. There is one log file per process, placed under
//! `<dir>/<hostname>/<pid % LOG_SCATTER_WIDTH>/degraded_objects.<pid>` so
//! a large fleet neither contends on one file nor piles every file into
//! one directory.

use std::fs::{DirBuilder, File, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::Placement;

/// Number of pid buckets per host.
pub const LOG_SCATTER_WIDTH: u32 = 10;

const LOG_DIR_MODE: u32 = 0o777;
// writable by everyone, readable by the owner only
const LOG_FILE_MODE: u32 = 0o622;

/// One degraded-object record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedRecord<'a> {
    /// Path template of the object.
    pub path_template: &'a str,
    /// Data blocks.
    pub n: u32,
    /// Erasure blocks.
    pub e: u32,
    /// First block of the stripe.
    pub start_block: u32,
    /// Bad-block bitmask reported by the engine.
    pub error_pattern: i32,
    /// Repository name.
    pub repo: &'a str,
    /// Placement of the object.
    pub placement: Placement,
}

impl DegradedRecord<'_> {
    /// Renders the record as a log line:
    /// `<path-template> <N> <E> <start-block> <error-pattern> <repo> <pod> <cap>`.
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {} {} {} {}\n",
            self.path_template,
            self.n,
            self.e,
            self.start_block,
            self.error_pattern,
            self.repo,
            self.placement.pod,
            self.placement.cap
        )
    }
}

/// Process-wide degraded-object log of one configured MC driver.
///
/// The file is opened on the first append (retried on later appends if
/// that fails). Appends are serialized.
pub struct DegradedLog {
    dir: PathBuf,
    file: Mutex<Option<File>>,
}

impl std::fmt::Debug for DegradedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradedLog").field("dir", &self.dir).finish()
    }
}

fn hostname() -> std::io::Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn make_shared_dir(path: &Path) {
    // an existing directory is fine; a real failure shows up at open time
    if DirBuilder::new().mode(LOG_DIR_MODE).create(path).is_ok() {
        if let Err(e) = std::fs::set_permissions(path, Permissions::from_mode(LOG_DIR_MODE)) {
            warn!("chmod {} failed: {}", path.display(), e);
        }
    }
}

impl DegradedLog {
    /// Creates a log rooted at `dir`. Nothing is touched on disk until
    /// the first append.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: Mutex::new(None),
        }
    }

    /// Root directory of the log.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of this process's log file.
    pub fn file_path(&self) -> std::io::Result<PathBuf> {
        let pid = std::process::id();
        Ok(self
            .dir
            .join(hostname()?)
            .join((pid % LOG_SCATTER_WIDTH).to_string())
            .join(format!("degraded_objects.{}", pid)))
    }

    fn open(&self) -> std::io::Result<File> {
        let path = self.file_path()?;
        if let Some(scatter_dir) = path.parent() {
            if let Some(host_dir) = scatter_dir.parent() {
                make_shared_dir(host_dir);
            }
            make_shared_dir(scatter_dir);
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(LOG_FILE_MODE)
            .open(&path)?;
        if let Err(e) = std::fs::set_permissions(&path, Permissions::from_mode(LOG_FILE_MODE)) {
            warn!("chmod {} failed: {}", path.display(), e);
        }
        info!("opened degraded object log {}", path.display());
        Ok(file)
    }

    /// Appends `record`. Failures are logged and swallowed: the data
    /// operation that produced the record has already succeeded.
    pub fn append(&self, record: &DegradedRecord<'_>) {
        let line = record.to_line();
        let mut guard = self.file.lock();

        if guard.is_none() {
            match self.open() {
                Ok(file) => *guard = Some(file),
                Err(e) => error!(
                    "failed to open degraded object log under {}: {}",
                    self.dir.display(),
                    e
                ),
            }
        }

        match guard.as_mut() {
            Some(file) => {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    error!("failed to write to degraded object log: {}", e);
                }
            }
            None => error!("degraded object log unavailable, dropping: {}", line.trim_end()),
        }
    }
}
