//! Library for copying images to block devices and files with the help of a
//! bmap.
//!
//! A bmap lists the blocks of an image that carry data. Copying only those
//! blocks, and checking them against the checksums the bmap records, is
//! much faster than a plain `dd` of a sparse image.
//!
//! # Overview
//!
//! The main entry point is [`CopyEngine`], which takes an optional parsed
//! [`BmapDocument`], a [`CopyProgress`] implementation and [`CopyOptions`],
//! then copies an [`ImageSource`](bmap_image::ImageSource) to a [`Target`].
//!
//! # Example
//!
//! ```no_run
//! use bmap_image::ImageSource;
//! use bmaptool::{CopyEngine, CopyOptions, SilentProgress, Target, open_bmap};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bmap = open_bmap("disk.img.bmap".as_ref())?;
//! let mut source = ImageSource::open("disk.img.gz")?;
//! let mut target = Target::open("/dev/sdX")?;
//!
//! CopyEngine::new(Some(&bmap), SilentProgress, CopyOptions::default())
//!     .copy(&mut source, &mut target)?;
//! # Ok(())
//! # }
//! ```

pub mod copy;
pub mod progress;
pub mod target;
pub mod tune;

pub use self::copy::{
    CHUNK_SIZE, CopyEngine, CopyError, CopyOptions, CopyReport, CopyState, FailureKind,
    NOMAP_BLOCK_SIZE, copy,
};
pub use self::progress::{CopyProgress, SilentProgress};
pub use self::target::{Target, TargetError};
pub use self::tune::TuningGuard;
pub use bmap_format::BmapDocument;

#[cfg(feature = "cli")]
pub use self::progress::ConsoleProgress;

use snafu::{ResultExt, Snafu};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Errors that can occur when loading a bmap file from disk.
#[derive(Debug, Snafu)]
pub enum OpenBmapError {
    #[snafu(display("cannot open bmap file '{}'", path.display()))]
    OpenFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("cannot parse bmap file '{}'", path.display()))]
    ParseBmap {
        path: PathBuf,
        source: bmap_format::ParseError,
    },
}

/// Opens and parses a bmap file.
pub fn open_bmap(path: &Path) -> Result<BmapDocument, OpenBmapError> {
    let file = File::open(path).context(OpenFileSnafu { path })?;

    bmap_format::from_reader(BufReader::new(file)).context(ParseBmapSnafu { path })
}

/// Paths where the bmap of `image` may live, most specific first.
///
/// `disk.img.gz` yields `disk.img.gz.bmap`, `disk.img.bmap` and `disk.bmap`.
#[must_use]
pub fn bmap_candidates(image: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let mut base = image.to_path_buf();

    loop {
        let mut name = base.clone().into_os_string();

        name.push(".bmap");
        candidates.push(PathBuf::from(name));

        if base.extension().is_none() {
            break;
        }

        base.set_extension("");
    }

    candidates
}

/// Returns the first existing bmap file for `image`.
#[must_use]
pub fn discover_bmap(image: &Path) -> Option<PathBuf> {
    bmap_candidates(image).into_iter().find(|p| p.is_file())
}
