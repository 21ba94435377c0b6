//! Block maps of sparse image files and transparent reading of compressed
//! images.
//!
//! The generation side asks the kernel which blocks of an image file are
//! allocated (`FIEMAP`, or `FIBMAP` where that is unavailable), groups them
//! into ranges and produces a [`bmap_format::BmapDocument`]. The reading side
//! opens an image that may be gzip or bzip2 compressed, or wrapped in a
//! single-member tar archive, and exposes it as one byte stream.
//!
//! # Example
//!
//! ```no_run
//! use bmap_image::{BmapGenerator, GenerateOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let generator = BmapGenerator::open("disk.img")?;
//! let doc = generator.generate(GenerateOptions::default())?;
//!
//! for range in doc.ranges() {
//!     println!("{range}");
//! }
//! # Ok(())
//! # }
//! ```

pub use self::coalesce::{RangeCoalescer, Run};
pub use self::extent::{ExtentScanner, ScanError, Strategy};
pub use self::generate::{BmapGenerator, GenerateError, GenerateOptions, GenerateReport};
pub use self::geometry::{GeometryError, block_size_of};
pub use self::source::{Compression, ImageSource, SourceError, archive_shape_error};
pub use self::tar::{TarError, TarMember};

pub mod coalesce;
pub mod extent;
pub mod generate;
pub mod geometry;
pub mod source;
mod sys;
pub mod tar;
