use crate::coalesce::RangeCoalescer;
use crate::extent::{ExtentScanner, ScanError, Strategy};
use crate::geometry::{self, GeometryError};
use bmap_format::{
    BlockRange, BmapDocument, BmapHeader, BmapWriter, ChecksumKind, DocumentError, DocumentParts,
};
use snafu::{ResultExt, Snafu, ensure};
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use generate_error::*;

/// Size of the buffer used to hash mapped ranges.
pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Settings for [`BmapGenerator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Digest to compute for every mapped range, or `None` to skip hashing.
    pub checksum: Option<ChecksumKind>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            checksum: Some(ChecksumKind::Sha1),
        }
    }
}

/// Summary of a streamed generation.
#[derive(Clone, Copy, Debug)]
pub struct GenerateReport {
    pub header: BmapHeader,
    pub mapped_blocks_count: u64,
    pub strategy: Strategy,
}

/// Builds the block map of a sparse image file.
///
/// # Example
///
/// ```no_run
/// use bmap_image::{BmapGenerator, GenerateOptions};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let generator = BmapGenerator::open("disk.img")?;
/// let report = generator.generate_to(GenerateOptions::default(), std::io::stdout())?;
///
/// eprintln!("{} blocks mapped", report.mapped_blocks_count);
/// # Ok(())
/// # }
/// ```
pub struct BmapGenerator {
    file: File,
    path: PathBuf,
    image_size: u64,
    block_size: u64,
    blocks_count: u64,
}

impl std::fmt::Debug for BmapGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BmapGenerator")
            .field("path", &self.path)
            .field("image_size", &self.image_size)
            .field("block_size", &self.block_size)
            .field("blocks_count", &self.blocks_count)
            .finish_non_exhaustive()
    }
}

impl BmapGenerator {
    /// Opens the image at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GenerateError> {
        let path = path.as_ref();
        let file = File::open(path).context(OpenFailedSnafu { path })?;

        Self::from_file(file, path)
    }

    /// Uses an already opened image. `path` is only used in messages.
    pub fn from_file(file: File, path: impl Into<PathBuf>) -> Result<Self, GenerateError> {
        let path = path.into();
        let image_size = file.metadata().context(MetadataSnafu { path: &path })?.len();

        ensure!(image_size > 0, EmptyImageSnafu { path });

        let block_size = geometry::block_size_of(&file).context(GeometrySnafu { path: &path })?;
        let blocks_count = image_size.div_ceil(block_size);

        Ok(Self {
            file,
            path,
            image_size,
            block_size,
            blocks_count,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn image_size(&self) -> u64 {
        self.image_size
    }

    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    #[must_use]
    pub fn blocks_count(&self) -> u64 {
        self.blocks_count
    }

    fn header(&self, options: GenerateOptions) -> BmapHeader {
        BmapHeader {
            image_size: self.image_size,
            block_size: self.block_size,
            blocks_count: self.blocks_count,
            checksum: options.checksum,
        }
    }

    /// Scans the image and returns the document.
    pub fn generate(&self, options: GenerateOptions) -> Result<BmapDocument, GenerateError> {
        let header = self.header(options);
        let mut ranges = Vec::new();

        let (mapped_blocks_count, _) = self.scan(options, |range| {
            ranges.push(range);
            Ok(())
        })?;

        BmapDocument::from_parts(DocumentParts {
            version: header.version(),
            image_size: self.image_size,
            block_size: self.block_size,
            blocks_count: self.blocks_count,
            mapped_blocks_count,
            checksum_kind: options.checksum,
            ranges,
        })
        .context(InconsistentSnafu { path: &self.path })
    }

    /// Scans the image and writes the bmap text to `out` as ranges are
    /// found, so memory use does not depend on the image layout.
    pub fn generate_to<W: Write>(
        &self,
        options: GenerateOptions,
        out: W,
    ) -> Result<GenerateReport, GenerateError> {
        let header = self.header(options);
        let mut writer = BmapWriter::start(out, header).context(WriteFailedSnafu)?;

        let (mapped_blocks_count, strategy) = self.scan(options, |range| {
            writer.write_range(&range).context(WriteFailedSnafu)
        })?;

        let (_, written) = writer.finish().context(WriteFailedSnafu)?;

        if written != mapped_blocks_count || mapped_blocks_count > self.blocks_count {
            return Err(DocumentError::MappedCountMismatch {
                declared: written,
                counted: mapped_blocks_count,
            })
            .context(InconsistentSnafu { path: &self.path });
        }

        Ok(GenerateReport {
            header,
            mapped_blocks_count,
            strategy,
        })
    }

    /// Syncs the image, then walks its blocks and hands every mapped range
    /// to `emit` in ascending order.
    fn scan<F>(&self, options: GenerateOptions, mut emit: F) -> Result<(u64, Strategy), GenerateError>
    where
        F: FnMut(BlockRange) -> Result<(), GenerateError>,
    {
        // Extents of data still in the page cache may not be allocated yet.
        self.file
            .sync_all()
            .context(SyncFailedSnafu { path: &self.path })?;

        let scanner = ExtentScanner::new(&self.file, self.block_size, self.blocks_count)
            .context(ScanSnafu { path: &self.path })?;

        info!(
            path = %self.path.display(),
            image_size = self.image_size,
            block_size = self.block_size,
            blocks_count = self.blocks_count,
            strategy = %scanner.strategy(),
            "generating bmap"
        );

        let mut mapped_blocks_count = 0u64;
        let mut buf = Vec::new();

        let runs = RangeCoalescer::new(self.blocks_count, |block| scanner.is_block_mapped(block));

        for run in runs.mapped() {
            let (first, last) = run.context(ScanSnafu { path: &self.path })?;
            let mut range = BlockRange::new(first, last).context(InvalidRunSnafu)?;

            if let Some(kind) = options.checksum {
                let sum = self.hash_range(&range, kind, &mut buf)?;
                range = range.with_checksum(sum);
            }

            debug!(first, last, "mapped range");

            mapped_blocks_count += range.block_count();
            emit(range)?;
        }

        Ok((mapped_blocks_count, scanner.strategy()))
    }

    fn hash_range(
        &self,
        range: &BlockRange,
        kind: ChecksumKind,
        buf: &mut Vec<u8>,
    ) -> Result<bmap_format::Checksum, GenerateError> {
        let (start, len) = range.byte_span(self.block_size, self.image_size);
        let mut hasher = kind.hasher();
        let mut done = 0u64;

        buf.resize(HASH_CHUNK_SIZE, 0);

        while done < len {
            let n = (len - done).min(HASH_CHUNK_SIZE as u64) as usize;
            let offset = start + done;

            self.file
                .read_exact_at(&mut buf[..n], offset)
                .context(ReadFailedSnafu {
                    path: &self.path,
                    offset,
                })?;

            hasher.update(&buf[..n]);
            done += n as u64;
        }

        Ok(hasher.finalize())
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum GenerateError {
    #[snafu(display("cannot open image file '{}'", path.display()))]
    OpenFailed { path: PathBuf, source: io::Error },

    #[snafu(display("cannot stat image file '{}'", path.display()))]
    Metadata { path: PathBuf, source: io::Error },

    #[snafu(display("cannot generate bmap for zero-sized image file '{}'", path.display()))]
    EmptyImage { path: PathBuf },

    #[snafu(display("cannot get block size for '{}'", path.display()))]
    Geometry {
        path: PathBuf,
        source: GeometryError,
    },

    #[snafu(display("cannot synchronize image file '{}'", path.display()))]
    SyncFailed { path: PathBuf, source: io::Error },

    #[snafu(display("cannot scan the blocks of '{}'", path.display()))]
    Scan { path: PathBuf, source: ScanError },

    #[snafu(display("invalid mapped run"))]
    InvalidRun {
        source: bmap_format::InvertedRangeError,
    },

    #[snafu(display("cannot read image file '{}' at offset {offset}", path.display()))]
    ReadFailed {
        path: PathBuf,
        offset: u64,
        source: io::Error,
    },

    #[snafu(display("cannot write the bmap"))]
    WriteFailed { source: io::Error },

    #[snafu(display("generated bmap for '{}' is inconsistent", path.display()))]
    Inconsistent {
        path: PathBuf,
        source: DocumentError,
    },
}
