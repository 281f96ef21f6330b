//! Rotatable log file writer.
//!
//! [`RollingFile`] appends log lines to a single file. Calling
//! [`RollingFile::rotate`] renames the current file to
//! `<stem>-<UTC timestamp>.<ext>` in the same directory and reopens a fresh
//! file under the original name. Rotation also happens automatically before a
//! write that would push the file past `max_size_bytes`, and rotated backups
//! beyond `max_backups` are deleted oldest first.
//!
//! The writer is cheap to clone; all clones share one file handle.
//!
//! # Example
//!
//! ```rust,no_run
//! use pylon_telemetry::RollingFile;
//! use std::io::Write;
//!
//! let log = RollingFile::open("/var/log/pylon/pylon.log")?;
//! let mut writer = log.clone();
//! writer.write_all(b"hello\n")?;
//! log.rotate()?;
//! # Ok::<(), std::io::Error>(())
//! ```

use chrono::Utc;
use parking_lot::Mutex;
use pylon_core::LogRotate;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6f";

/// An append-only log file that supports rotation.
#[derive(Debug, Clone)]
pub struct RollingFile {
    inner: Arc<Mutex<RollingState>>,
}

#[derive(Debug)]
struct RollingState {
    path: PathBuf,
    file: File,
    written: u64,
    max_size_bytes: Option<u64>,
    max_backups: Option<usize>,
}

impl RollingFile {
    /// Opens (or creates) the log file, creating missing parent directories.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            inner: Arc::new(Mutex::new(RollingState {
                path,
                file,
                written,
                max_size_bytes: None,
                max_backups: None,
            })),
        })
    }

    /// Rotates automatically once the file would exceed `bytes`.
    #[must_use]
    pub fn with_max_size(self, bytes: u64) -> Self {
        self.inner.lock().max_size_bytes = Some(bytes).filter(|b| *b > 0);
        self
    }

    /// Keeps at most `count` rotated backups.
    #[must_use]
    pub fn with_max_backups(self, count: usize) -> Self {
        self.inner.lock().max_backups = Some(count);
        self
    }

    /// Path of the active log file.
    pub fn path(&self) -> PathBuf {
        self.inner.lock().path.clone()
    }

    /// Archives the current file and starts a new one.
    pub fn rotate(&self) -> io::Result<()> {
        self.inner.lock().rotate()
    }
}

impl RollingState {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.written > 0 || self.path.exists() {
            let backup = self.backup_path();
            fs::rename(&self.path, &backup)?;
        }

        self.file = open_append(&self.path)?;
        self.written = 0;
        self.prune()
    }

    fn backup_path(&self) -> PathBuf {
        let (stem, ext) = split_name(&self.path);
        let stamp = Utc::now().format(BACKUP_TIME_FORMAT).to_string();
        let dir = self.path.parent().unwrap_or_else(|| Path::new(""));

        let mut candidate = dir.join(backup_name(&stem, &stamp, ext.as_deref()));
        let mut n = 1;
        while candidate.exists() {
            candidate = dir.join(backup_name(&stem, &format!("{stamp}_{n}"), ext.as_deref()));
            n += 1;
        }
        candidate
    }

    fn prune(&self) -> io::Result<()> {
        let Some(keep) = self.max_backups else {
            return Ok(());
        };

        let mut backups = list_backups(&self.path)?;
        if backups.len() <= keep {
            return Ok(());
        }
        backups.sort();
        let excess = backups.len() - keep;
        for old in backups.into_iter().take(excess) {
            fs::remove_file(old)?;
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(limit) = self.max_size_bytes {
            if self.written > 0 && self.written + buf.len() as u64 > limit {
                self.rotate()?;
            }
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn split_name(path: &Path) -> (String, Option<String>) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (stem, ext)
}

fn backup_name(stem: &str, stamp: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{stem}-{stamp}.{ext}"),
        None => format!("{stem}-{stamp}"),
    }
}

/// Lists rotated backups belonging to `path`.
fn list_backups(path: &Path) -> io::Result<Vec<PathBuf>> {
    let (stem, ext) = split_name(path);
    let prefix = format!("{stem}-");
    let suffix = ext.map(|e| format!(".{e}"));
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from("."),
    };

    let mut found = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let matches_suffix = suffix.as_deref().map_or(true, |s| name.ends_with(s));
        if name.starts_with(&prefix) && matches_suffix && entry.path() != path {
            found.push(entry.path());
        }
    }
    Ok(found)
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RollingFile {
    type Writer = RollingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl LogRotate for RollingFile {
    fn rotate(&self) -> io::Result<()> {
        RollingFile::rotate(self)
    }
}
