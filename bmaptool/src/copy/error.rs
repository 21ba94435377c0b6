use bmap_format::Checksum;
use snafu::Snafu;
use std::path::PathBuf;

/// Classification of a failed copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Reading the image or writing the target failed.
    Io,
    /// A tar archive turned out to hold more than one member.
    ArchiveShape,
    /// The image ended inside a mapped range.
    TruncatedImage,
    /// A range did not match its checksum.
    ChecksumMismatch,
    /// The written block count differs from the bmap.
    InconsistentDocument,
    /// The image does not fit on the target device.
    TargetTooSmall,
    /// The data was written but could not be synced.
    Sync,
}

/// Errors that can occur while copying an image.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum CopyError {
    #[snafu(display("cannot seek image '{}' to offset {offset}", path.display()))]
    SeekImage {
        path: PathBuf,
        offset: u64,
        source: std::io::Error,
    },

    #[snafu(display("cannot read image '{}' at offset {offset}", path.display()))]
    ReadImage {
        path: PathBuf,
        offset: u64,
        source: std::io::Error,
    },

    #[snafu(display("unsupported archive layout in '{}'", path.display()))]
    ArchiveShape {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "image '{}' ends at offset {offset}, inside mapped blocks {first}-{last}",
        path.display()
    ))]
    TruncatedImage {
        path: PathBuf,
        first: u64,
        last: u64,
        offset: u64,
    },

    #[snafu(display(
        "checksum mismatch for blocks {first}-{last}: expected {expected}, calculated {actual}"
    ))]
    ChecksumMismatch {
        first: u64,
        last: u64,
        expected: Checksum,
        actual: Checksum,
    },

    #[snafu(display("wrote {written} blocks, but the bmap declares {declared} mapped blocks"))]
    InconsistentDocument { written: u64, declared: u64 },

    #[snafu(display(
        "image has size {image_size} bytes and will not fit '{}' which has {capacity} bytes",
        path.display()
    ))]
    TargetTooSmall {
        path: PathBuf,
        image_size: u64,
        capacity: u64,
    },

    #[snafu(display("cannot seek target '{}' to offset {offset}", path.display()))]
    SeekTarget {
        path: PathBuf,
        offset: u64,
        source: std::io::Error,
    },

    #[snafu(display("cannot write target '{}' at offset {offset}", path.display()))]
    WriteTarget {
        path: PathBuf,
        offset: u64,
        source: std::io::Error,
    },

    #[snafu(display("cannot resize target '{}' to {size} bytes", path.display()))]
    Resize {
        path: PathBuf,
        size: u64,
        source: std::io::Error,
    },

    #[snafu(display("cannot synchronize target '{}'", path.display()))]
    Sync {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CopyError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ArchiveShape { .. } => FailureKind::ArchiveShape,
            Self::TruncatedImage { .. } => FailureKind::TruncatedImage,
            Self::ChecksumMismatch { .. } => FailureKind::ChecksumMismatch,
            Self::InconsistentDocument { .. } => FailureKind::InconsistentDocument,
            Self::TargetTooSmall { .. } => FailureKind::TargetTooSmall,
            Self::Sync { .. } => FailureKind::Sync,
            Self::SeekImage { .. }
            | Self::ReadImage { .. }
            | Self::SeekTarget { .. }
            | Self::WriteTarget { .. }
            | Self::Resize { .. } => FailureKind::Io,
        }
    }
}
