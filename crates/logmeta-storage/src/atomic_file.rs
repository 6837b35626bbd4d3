//! Atomic file replacement
//!
//! Data is written to a `<name>.tmp` sibling of the target. On commit the
//! temporary file is flushed, fsynced and renamed over the target, so a
//! reader of the target path sees either the complete old content or the
//! complete new content. Keeping the temporary file in the same directory
//! keeps the rename within one filesystem.
//!
//! On platforms where rename does not replace an existing file the target is
//! deleted first and the temporary file moved into place. That fallback is
//! not atomic.

use crate::retry::RetryPolicy;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Suffix appended to the target file name while writing
pub const TMP_EXTENSION: &str = "tmp";

/// Durability and publish steps of a commit
pub(crate) trait FileOps: std::fmt::Debug + Send + Sync {
    fn sync(&self, writer: &mut BufWriter<File>) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

#[derive(Debug)]
struct StdFileOps;

impl FileOps for StdFileOps {
    fn sync(&self, writer: &mut BufWriter<File>) -> io::Result<()> {
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// Writer that only publishes its content at the target path on `commit`
#[derive(Debug)]
pub struct AtomicFileWriter {
    target: PathBuf,
    tmp: PathBuf,
    /// `None` once committed or aborted
    writer: Option<BufWriter<File>>,
    policy: RetryPolicy,
    ops: Box<dyn FileOps>,
}

impl AtomicFileWriter {
    /// Start writing a replacement for `target`, retrying I/O forever
    pub fn create(target: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_policy(target, RetryPolicy::default())
    }

    /// Start writing a replacement for `target` with an explicit retry policy
    pub fn with_policy(target: impl AsRef<Path>, policy: RetryPolicy) -> io::Result<Self> {
        Self::with_ops(target, policy, Box::new(StdFileOps))
    }

    pub(crate) fn with_ops(
        target: impl AsRef<Path>,
        policy: RetryPolicy,
        ops: Box<dyn FileOps>,
    ) -> io::Result<Self> {
        let target = target.as_ref().to_path_buf();
        let tmp = tmp_path_for(&target)?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;

        Ok(Self {
            target,
            tmp,
            writer: Some(BufWriter::new(file)),
            policy,
            ops,
        })
    }

    /// Write `data` to `target` atomically in one call
    pub fn write_atomic(target: impl AsRef<Path>, data: &[u8], policy: RetryPolicy) -> io::Result<()> {
        let mut writer = Self::with_policy(target, policy)?;
        if let Err(e) = writer.write_all(data) {
            writer.abort();
            return Err(e);
        }
        writer.commit()
    }

    /// Path the content is published to
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target
    }

    /// Path of the temporary file being written
    #[must_use]
    pub fn tmp_path(&self) -> &Path {
        &self.tmp
    }

    /// Flush, fsync and move the temporary file over the target.
    ///
    /// If flushing or syncing fails the temporary file is removed and the
    /// target is left untouched.
    pub fn commit(mut self) -> io::Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Err(io::Error::other("atomic writer already finished"));
        };

        let synced = self
            .policy
            .run("flush and sync", || self.ops.sync(&mut writer));

        // Dropping the writer closes the descriptor on both paths.
        drop(writer);

        if let Err(e) = synced {
            error!("Failed to sync {:?}, discarding: {}", self.tmp, e);
            self.discard_tmp("failed commit");
            return Err(e);
        }

        self.publish()?;
        sync_parent_dir(&self.target);
        debug!("Atomically replaced {:?}", self.target);
        Ok(())
    }

    /// Close the temporary file without publishing it
    pub fn abort(mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            self.discard_tmp("abort");
        }
    }

    fn publish(&self) -> io::Result<()> {
        let Err(e) = self.ops.rename(&self.tmp, &self.target) else {
            return Ok(());
        };
        warn!(
            "Rename of {:?} over {:?} failed ({}), replacing target explicitly",
            self.tmp, self.target, e
        );

        let target = &self.target;
        self.policy.run("delete original", || match fs::remove_file(target) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        })?;
        self.policy
            .run("move into place", || self.ops.rename(&self.tmp, target))
    }

    fn discard_tmp(&self, reason: &str) {
        let tmp = &self.tmp;
        let removed = self.policy.run_until_true("delete tmp file", || match fs::remove_file(tmp) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        });
        if !matches!(removed, Ok(true)) {
            warn!("Unable to delete tmp file {:?} during {}", tmp, reason);
        }
    }
}

impl Write for AtomicFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::other("atomic writer already finished")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFileWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            self.discard_tmp("drop without commit");
        }
    }
}

fn tmp_path_for(target: &Path) -> io::Result<PathBuf> {
    let Some(name) = target.file_name() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} does not name a file", target.display()),
        ));
    };
    let mut tmp_name = OsString::from(name);
    tmp_name.push(".");
    tmp_name.push(TMP_EXTENSION);
    Ok(target.with_file_name(tmp_name))
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Directory sync of {:?} failed: {}", dir, e);
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
