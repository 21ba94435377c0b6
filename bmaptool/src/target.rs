use crate::tune::TuningGuard;
use snafu::{IntoError, ResultExt, Snafu};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

use target_error::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    RegularFile,
    BlockDevice { rdev: u64 },
    Other,
}

/// The file or block device an image is written to.
///
/// Block devices are opened with `O_EXCL`, so a device that is mounted or
/// opened exclusively elsewhere is refused with [`TargetError::Busy`].
/// Regular files are created or truncated.
pub struct Target {
    file: File,
    path: PathBuf,
    kind: Kind,
    capacity: Option<u64>,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Target {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TargetError> {
        let path = path.as_ref();
        let kind = match std::fs::metadata(path) {
            Ok(meta) if meta.file_type().is_block_device() => Kind::BlockDevice { rdev: meta.rdev() },
            Ok(meta) if !meta.is_file() => Kind::Other,
            _ => Kind::RegularFile,
        };

        let mut options = OpenOptions::new();

        options.write(true);

        match kind {
            Kind::RegularFile => {
                options.create(true).truncate(true);
            }
            Kind::BlockDevice { .. } => {
                options.custom_flags(libc::O_EXCL);
            }
            Kind::Other => {}
        }

        let file = options.open(path).map_err(|err| open_error(path, err))?;

        Self::with_kind(file, path.to_owned(), kind)
    }

    /// Uses an already opened target.
    pub fn from_file(file: File, path: impl Into<PathBuf>) -> Result<Self, TargetError> {
        let path = path.into();
        let meta = file.metadata().context(MetadataSnafu { path: &path })?;
        let kind = if meta.file_type().is_block_device() {
            Kind::BlockDevice { rdev: meta.rdev() }
        } else if meta.is_file() {
            Kind::RegularFile
        } else {
            Kind::Other
        };

        Self::with_kind(file, path, kind)
    }

    fn with_kind(mut file: File, path: PathBuf, kind: Kind) -> Result<Self, TargetError> {
        let capacity = match kind {
            Kind::BlockDevice { .. } => {
                let size = file
                    .seek(SeekFrom::End(0))
                    .and_then(|size| file.seek(SeekFrom::Start(0)).map(|_| size))
                    .context(CapacitySnafu { path: &path })?;

                Some(size)
            }
            _ => None,
        };

        debug!(path = %path.display(), ?kind, ?capacity, "opened target");

        Ok(Self {
            file,
            path,
            kind,
            capacity,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_block_device(&self) -> bool {
        matches!(self.kind, Kind::BlockDevice { .. })
    }

    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        self.kind == Kind::RegularFile
    }

    /// Size of a block device target.
    #[must_use]
    pub fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    /// Applies I/O tuning hints when the target is a block device.
    pub fn tune(&self) -> Option<TuningGuard> {
        match self.kind {
            Kind::BlockDevice { rdev } => Some(TuningGuard::apply(dev_major(rdev), dev_minor(rdev))),
            _ => None,
        }
    }

    /// Resizes a regular file target; other targets are left alone.
    pub fn set_size(&mut self, size: u64) -> io::Result<()> {
        if self.is_regular_file() {
            self.file.set_len(size)?;
        }

        Ok(())
    }

    /// Flushes and durably syncs everything written.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

impl Write for Target {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for Target {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

// glibc encoding of dev_t.
fn dev_major(dev: u64) -> u32 {
    (((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff)) as u32
}

fn dev_minor(dev: u64) -> u32 {
    (((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff)) as u32
}

#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum TargetError {
    #[snafu(display("target '{}' is busy, it may be mounted or in use", path.display()))]
    Busy { path: PathBuf },

    #[snafu(display("cannot open target '{}'", path.display()))]
    Open { path: PathBuf, source: io::Error },

    #[snafu(display("cannot stat target '{}'", path.display()))]
    Metadata { path: PathBuf, source: io::Error },

    #[snafu(display("cannot get the size of block device '{}'", path.display()))]
    Capacity { path: PathBuf, source: io::Error },
}

/// `EBUSY` from an exclusive open means the device is in use elsewhere.
fn open_error(path: &Path, err: io::Error) -> TargetError {
    if err.raw_os_error() == Some(libc::EBUSY) {
        BusySnafu { path }.build()
    } else {
        OpenSnafu { path }.into_error(err)
    }
}
