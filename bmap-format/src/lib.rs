//! A library for reading and writing block map (bmap) documents.
//!
//! A bmap describes which blocks of a sparse disk image actually carry data.
//! Flashing tools use it to copy only those blocks to the target device and
//! to verify each copied range against its checksum.
//!
//! # Format
//!
//! A bmap is a small XML document:
//!
//! ```text
//! <bmap version="1.2">
//!     <ImageSize> 8388608 </ImageSize>
//!     <BlockSize> 4096 </BlockSize>
//!     <BlocksCount> 2048 </BlocksCount>
//!     <BlockMap>
//!         <Range sha1="..."> 0-99 </Range>
//!         <Range sha1="..."> 2000-2047 </Range>
//!     </BlockMap>
//!     <MappedBlocksCount> 148 </MappedBlocksCount>
//! </bmap>
//! ```
//!
//! Comments in the document are informational only and never parsed.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let doc = bmap_format::from_reader(File::open("image.bmap")?)?;
//!
//! println!(
//!     "{} of {} blocks mapped ({:.1}%)",
//!     doc.mapped_blocks_count(),
//!     doc.blocks_count(),
//!     doc.mapped_percent()
//! );
//!
//! for range in doc.ranges() {
//!     println!("{range}");
//! }
//! # Ok(())
//! # }
//! ```

pub use self::checksum::{Checksum, ChecksumError, ChecksumHasher, ChecksumKind};
pub use self::document::{BmapDocument, DocumentError, DocumentParts};
pub use self::human::{human_size, human_time};
pub use self::parse::{ParseError, ParseErrorKind, SUPPORTED_MAJOR_VERSION, from_reader, parse};
pub use self::range::{BlockRange, InvertedRangeError};
pub use self::version::{Version, VersionError};
pub use self::write::{BmapHeader, BmapWriter, write_document};

pub mod checksum;
pub mod document;
pub mod human;
pub mod parse;
pub mod range;
pub mod version;
pub mod write;
pub mod xml;
