mod error;

pub use self::error::{CopyError, FailureKind};

use self::error::{
    ArchiveShapeSnafu, ChecksumMismatchSnafu, InconsistentDocumentSnafu, ReadImageSnafu,
    ResizeSnafu, SeekImageSnafu, SeekTargetSnafu, SyncSnafu, TargetTooSmallSnafu,
    TruncatedImageSnafu, WriteTargetSnafu,
};
use crate::progress::CopyProgress;
use crate::target::Target;
use bmap_format::{BlockRange, BmapDocument, ChecksumHasher};
use bmap_image::{ImageSource, archive_shape_error};
use snafu::{IntoError, ResultExt, ensure};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Upper bound of a single read or write.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Block size reported for copies made without a bmap.
pub const NOMAP_BLOCK_SIZE: u64 = 4096;

/// Runtime switches of a copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyOptions {
    /// Compare every range that carries a checksum.
    pub verify: bool,
    /// Flush and sync the target once all data is written.
    pub sync: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            verify: true,
            sync: true,
        }
    }
}

/// Where a [`CopyEngine`] is in its run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyState {
    Idle,
    Preparing,
    Copying,
    /// Comparing the checksum of blocks `first..=last`.
    Verifying { first: u64, last: u64 },
    Syncing,
    Done,
    Failed(FailureKind),
}

/// Outcome of a finished copy.
#[derive(Clone, Debug, PartialEq)]
pub struct CopyReport {
    /// Image size; in no-map mode, the number of bytes streamed.
    pub image_size: u64,
    pub block_size: u64,
    pub blocks_count: u64,
    pub mapped_blocks_count: u64,
    /// Bytes written to the target.
    pub bytes_written: u64,
    /// Ranges whose checksum was compared.
    pub verified_ranges: usize,
    pub elapsed: Duration,
}

impl CopyReport {
    /// Bytes covered by mapped blocks, clamped to the image size.
    #[must_use]
    pub fn mapped_size(&self) -> u64 {
        self.mapped_blocks_count
            .saturating_mul(self.block_size)
            .min(self.image_size)
    }

    #[must_use]
    pub fn mapped_percent(&self) -> f64 {
        if self.blocks_count == 0 {
            0.0
        } else {
            self.mapped_blocks_count as f64 * 100.0 / self.blocks_count as f64
        }
    }
}

/// Copies an image to a target, driven by an optional bmap.
///
/// With a bmap only the mapped ranges are written, each one read from the
/// image at its own offset and optionally checked against its checksum.
/// Without one the whole image is streamed sequentially.
///
/// A failed copy leaves the target partially written.
pub struct CopyEngine<'a, P: CopyProgress> {
    bmap: Option<&'a BmapDocument>,
    progress: P,
    options: CopyOptions,
    state: CopyState,
}

impl<'a, P: CopyProgress> CopyEngine<'a, P> {
    pub fn new(bmap: Option<&'a BmapDocument>, progress: P, options: CopyOptions) -> Self {
        Self {
            bmap,
            progress,
            options,
            state: CopyState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> CopyState {
        self.state
    }

    /// Runs the copy. The engine ends in [`CopyState::Done`] or
    /// [`CopyState::Failed`].
    pub fn copy(&mut self, source: &mut ImageSource, target: &mut Target) -> Result<CopyReport, CopyError> {
        match self.run(source, target) {
            Ok(report) => {
                self.state = CopyState::Done;
                Ok(report)
            }
            Err(err) => {
                self.state = CopyState::Failed(err.kind());
                Err(err)
            }
        }
    }

    fn run(&mut self, source: &mut ImageSource, target: &mut Target) -> Result<CopyReport, CopyError> {
        let started = Instant::now();

        self.state = CopyState::Preparing;

        let mut report = match self.bmap {
            Some(bmap) => self.copy_mapped(bmap, source, target)?,
            None => self.copy_all(source, target)?,
        };

        self.progress.copy_finished(report.bytes_written);

        if self.options.sync {
            self.state = CopyState::Syncing;
            target.sync().context(SyncSnafu {
                path: target.path(),
            })?;
        }

        report.elapsed = started.elapsed();

        info!(
            written = report.bytes_written,
            verified = report.verified_ranges,
            elapsed = ?report.elapsed,
            "copy finished"
        );

        Ok(report)
    }

    fn copy_mapped(
        &mut self,
        bmap: &BmapDocument,
        source: &mut ImageSource,
        target: &mut Target,
    ) -> Result<CopyReport, CopyError> {
        let block_size = bmap.block_size();
        let image_size = bmap.image_size();

        if target.is_block_device() {
            check_capacity(target.path(), image_size, target.capacity())?;
        }

        let _tuning = target.tune();
        let spans = move || {
            bmap.ranges()
                .iter()
                .map(move |r| r.byte_span(block_size, image_size).1)
        };
        let total: u64 = spans().sum();

        self.progress.copy_started(Some(total));
        self.state = CopyState::Copying;

        // Blocks larger than the chunk budget are split across several reads.
        let longest = spans().max().unwrap_or(0);
        let mut buf = vec![0u8; chunk_len(longest.min(CHUNK_SIZE))];
        let mut written_blocks = 0u64;
        let mut bytes_written = 0u64;
        let mut verified_ranges = 0;

        for range in bmap.ranges() {
            let (start, len) = range.byte_span(block_size, image_size);
            let verify = self.options.verify && range.checksum().is_some();

            debug!(first = range.first(), last = range.last(), start, len, verify, "copying range");

            self.state = CopyState::Copying;
            seek_source(source, range, start)?;
            target
                .seek(SeekFrom::Start(start))
                .context(SeekTargetSnafu {
                    path: target.path(),
                    offset: start,
                })?;

            let mut hasher = range
                .checksum()
                .filter(|_| verify)
                .map(|c| ChecksumHasher::new(c.kind()));
            let mut done = 0u64;

            while done < len {
                let n = chunk_len((len - done).min(buf.len() as u64));
                let chunk = &mut buf[..n];

                read_range(source, range, chunk)?;

                if let Some(hasher) = hasher.as_mut() {
                    hasher.update(chunk);
                }

                target.write_all(chunk).context(WriteTargetSnafu {
                    path: target.path(),
                    offset: start + done,
                })?;

                self.progress.bytes_written(n as u64);
                done += n as u64;
            }

            written_blocks += range.block_count();
            bytes_written += len;

            if let (Some(hasher), Some(expected)) = (hasher, range.checksum()) {
                self.state = CopyState::Verifying {
                    first: range.first(),
                    last: range.last(),
                };

                let actual = hasher.finalize();

                ensure!(
                    actual == *expected,
                    ChecksumMismatchSnafu {
                        first: range.first(),
                        last: range.last(),
                        expected: expected.clone(),
                        actual,
                    }
                );

                self.progress.range_verified(range.first(), range.last());
                verified_ranges += 1;
            }
        }

        // An archive must not hold anything after its only member.
        if source.compression().is_archive() {
            source.finish().map_err(|err| read_failure(source, err))?;
        }

        ensure!(
            written_blocks == bmap.mapped_blocks_count(),
            InconsistentDocumentSnafu {
                written: written_blocks,
                declared: bmap.mapped_blocks_count(),
            }
        );

        target.set_size(image_size).context(ResizeSnafu {
            path: target.path(),
            size: image_size,
        })?;

        Ok(CopyReport {
            image_size,
            block_size,
            blocks_count: bmap.blocks_count(),
            mapped_blocks_count: written_blocks,
            bytes_written,
            verified_ranges,
            elapsed: Duration::ZERO,
        })
    }

    fn copy_all(&mut self, source: &mut ImageSource, target: &mut Target) -> Result<CopyReport, CopyError> {
        let _tuning = target.tune();

        self.progress.copy_started(source.size());
        self.state = CopyState::Copying;

        let mut buf = vec![0u8; chunk_len(CHUNK_SIZE)];
        let mut written = 0u64;

        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(read_failure(source, err)),
            };

            target.write_all(&buf[..n]).context(WriteTargetSnafu {
                path: target.path(),
                offset: written,
            })?;

            self.progress.bytes_written(n as u64);
            written += n as u64;
        }

        let blocks_count = written.div_ceil(NOMAP_BLOCK_SIZE);

        Ok(CopyReport {
            image_size: written,
            block_size: NOMAP_BLOCK_SIZE,
            blocks_count,
            mapped_blocks_count: blocks_count,
            bytes_written: written,
            verified_ranges: 0,
            elapsed: Duration::ZERO,
        })
    }
}

/// Copies `source` to `target` with default options and no progress output.
pub fn copy(
    source: &mut ImageSource,
    target: &mut Target,
    bmap: Option<&BmapDocument>,
) -> Result<CopyReport, CopyError> {
    CopyEngine::new(bmap, crate::progress::SilentProgress, CopyOptions::default()).copy(source, target)
}

/// Refuses an image larger than a target of known `capacity`.
fn check_capacity(path: &Path, image_size: u64, capacity: Option<u64>) -> Result<(), CopyError> {
    match capacity {
        Some(capacity) => {
            ensure!(
                image_size <= capacity,
                TargetTooSmallSnafu {
                    path,
                    image_size,
                    capacity,
                }
            );
            Ok(())
        }
        None => Ok(()),
    }
}

fn chunk_len(len: u64) -> usize {
    usize::try_from(len).unwrap_or(usize::MAX)
}

fn seek_source(source: &mut ImageSource, range: &BlockRange, offset: u64) -> Result<(), CopyError> {
    match source.seek_to(offset) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => TruncatedImageSnafu {
            path: source.path(),
            first: range.first(),
            last: range.last(),
            offset: source.position(),
        }
        .fail(),
        Err(err) if archive_shape_error(&err).is_some() => Err(read_failure(source, err)),
        Err(err) => Err(err).context(SeekImageSnafu {
            path: source.path(),
            offset,
        }),
    }
}

fn read_range(source: &mut ImageSource, range: &BlockRange, buf: &mut [u8]) -> Result<(), CopyError> {
    match source.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => TruncatedImageSnafu {
            path: source.path(),
            first: range.first(),
            last: range.last(),
            offset: source.position(),
        }
        .fail(),
        Err(err) => Err(read_failure(source, err)),
    }
}

fn read_failure(source: &ImageSource, err: io::Error) -> CopyError {
    if archive_shape_error(&err).is_some() {
        ArchiveShapeSnafu {
            path: source.path(),
        }
        .into_error(err)
    } else {
        ReadImageSnafu {
            path: source.path(),
            offset: source.position(),
        }
        .into_error(err)
    }
}
