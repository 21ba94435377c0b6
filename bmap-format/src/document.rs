use crate::checksum::ChecksumKind;
use crate::range::BlockRange;
use crate::version::Version;
use snafu::{Snafu, ensure};

use document_error::*;

/// A block map: the geometry of an image and the list of its mapped block
/// ranges.
///
/// A document is always consistent. Both [`BmapDocument::from_parts`] and the
/// parser run [`BmapDocument::validate`] before handing one out, so
/// `mapped_blocks_count` is guaranteed to equal the number of blocks covered
/// by the ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BmapDocument {
    version: Version,
    image_size: u64,
    block_size: u64,
    blocks_count: u64,
    mapped_blocks_count: u64,
    checksum_kind: Option<ChecksumKind>,
    ranges: Vec<BlockRange>,
}

/// Unvalidated fields of a [`BmapDocument`].
#[derive(Clone, Debug)]
pub struct DocumentParts {
    pub version: Version,
    pub image_size: u64,
    pub block_size: u64,
    pub blocks_count: u64,
    pub mapped_blocks_count: u64,
    pub checksum_kind: Option<ChecksumKind>,
    pub ranges: Vec<BlockRange>,
}

impl BmapDocument {
    /// Builds a document from its parts, checking every invariant.
    pub fn from_parts(parts: DocumentParts) -> Result<Self, DocumentError> {
        let doc = Self {
            version: parts.version,
            image_size: parts.image_size,
            block_size: parts.block_size,
            blocks_count: parts.blocks_count,
            mapped_blocks_count: parts.mapped_blocks_count,
            checksum_kind: parts.checksum_kind,
            ranges: parts.ranges,
        };

        doc.validate()?;

        Ok(doc)
    }

    /// Checks the geometry, the range ordering and the mapped block count.
    pub fn validate(&self) -> Result<(), DocumentError> {
        ensure!(self.block_size != 0, ZeroBlockSizeSnafu);

        ensure!(
            self.blocks_count
                .checked_mul(self.block_size)
                .is_some_and(|covered| covered >= self.image_size),
            BlocksCountTooSmallSnafu {
                blocks_count: self.blocks_count,
                block_size: self.block_size,
                image_size: self.image_size,
            }
        );

        let mut counted = 0u64;
        let mut next_free = 0u64;

        for (i, range) in self.ranges.iter().enumerate() {
            ensure!(
                range.last() < self.blocks_count,
                RangeOutOfBoundsSnafu {
                    first: range.first(),
                    last: range.last(),
                    blocks_count: self.blocks_count,
                }
            );

            ensure!(
                i == 0 || range.first() >= next_free,
                RangesOutOfOrderSnafu {
                    first: range.first(),
                    last: range.last(),
                }
            );

            next_free = range.last() + 1;
            counted += range.block_count();
        }

        ensure!(
            counted == self.mapped_blocks_count,
            MappedCountMismatchSnafu {
                declared: self.mapped_blocks_count,
                counted,
            }
        );

        ensure!(
            self.mapped_blocks_count <= self.blocks_count,
            MappedExceedsTotalSnafu {
                mapped: self.mapped_blocks_count,
                total: self.blocks_count,
            }
        );

        Ok(())
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
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

    #[must_use]
    pub fn mapped_blocks_count(&self) -> u64 {
        self.mapped_blocks_count
    }

    /// Digest algorithm of the range checksums, if the ranges carry any.
    #[must_use]
    pub fn checksum_kind(&self) -> Option<ChecksumKind> {
        self.checksum_kind
    }

    #[must_use]
    pub fn ranges(&self) -> &[BlockRange] {
        &self.ranges
    }

    /// Number of bytes covered by mapped blocks.
    #[must_use]
    pub fn mapped_size(&self) -> u64 {
        self.mapped_blocks_count.saturating_mul(self.block_size)
    }

    /// Share of mapped blocks, in percent.
    #[must_use]
    pub fn mapped_percent(&self) -> f64 {
        mapped_percent(self.mapped_blocks_count, self.blocks_count)
    }
}

pub(crate) fn mapped_percent(mapped: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        mapped as f64 * 100.0 / total as f64
    }
}

/// Violations of the document invariants.
#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum DocumentError {
    #[snafu(display("block size is zero"))]
    ZeroBlockSize,

    #[snafu(display(
        "{blocks_count} blocks of {block_size} bytes do not cover the image size of {image_size} bytes"
    ))]
    BlocksCountTooSmall {
        blocks_count: u64,
        block_size: u64,
        image_size: u64,
    },

    #[snafu(display("range {first}-{last} is outside of the {blocks_count} image blocks"))]
    RangeOutOfBounds {
        first: u64,
        last: u64,
        blocks_count: u64,
    },

    #[snafu(display("range {first}-{last} overlaps or precedes the previous range"))]
    RangesOutOfOrder { first: u64, last: u64 },

    #[snafu(display(
        "mapped blocks count is {declared}, but the ranges cover {counted} blocks"
    ))]
    MappedCountMismatch { declared: u64, counted: u64 },

    #[snafu(display("mapped blocks count {mapped} exceeds the total of {total} blocks"))]
    MappedExceedsTotal { mapped: u64, total: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(ranges: &[(u64, u64)], mapped: u64) -> DocumentParts {
        DocumentParts {
            version: Version::new(1, 2),
            image_size: 8 << 20,
            block_size: 4096,
            blocks_count: 2048,
            mapped_blocks_count: mapped,
            checksum_kind: None,
            ranges: ranges
                .iter()
                .map(|&(f, l)| BlockRange::new(f, l).unwrap())
                .collect(),
        }
    }

    #[test]
    fn test_valid_document() {
        let doc = BmapDocument::from_parts(parts(&[(0, 99), (2000, 2047)], 148)).unwrap();
        assert_eq!(doc.mapped_blocks_count(), 148);
        assert_eq!(doc.mapped_size(), 148 * 4096);
        assert!((doc.mapped_percent() - 148.0 * 100.0 / 2048.0).abs() < 1e-9);
    }

    #[test]
    fn test_count_mismatch() {
        let err = BmapDocument::from_parts(parts(&[(0, 99)], 101)).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::MappedCountMismatch {
                declared: 101,
                counted: 100
            }
        ));
    }

    #[test]
    fn test_overlap_and_order() {
        let err = BmapDocument::from_parts(parts(&[(0, 10), (10, 20)], 22)).unwrap_err();
        assert!(matches!(err, DocumentError::RangesOutOfOrder { first: 10, .. }));

        let err = BmapDocument::from_parts(parts(&[(50, 60), (0, 10)], 22)).unwrap_err();
        assert!(matches!(err, DocumentError::RangesOutOfOrder { first: 0, .. }));
    }

    #[test]
    fn test_out_of_bounds() {
        let err = BmapDocument::from_parts(parts(&[(2040, 2048)], 9)).unwrap_err();
        assert!(matches!(err, DocumentError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn test_geometry() {
        let mut p = parts(&[], 0);
        p.blocks_count = 2047;
        assert!(matches!(
            BmapDocument::from_parts(p),
            Err(DocumentError::BlocksCountTooSmall {
                blocks_count: 2047,
                ..
            })
        ));

        // Extra blocks past the image end are allowed.
        let mut p = parts(&[(2048, 2048)], 1);
        p.blocks_count = 2049;
        assert!(BmapDocument::from_parts(p).is_ok());

        let mut p = parts(&[], 0);
        p.block_size = 1 << 40;
        p.blocks_count = 1 << 30;
        assert!(matches!(
            BmapDocument::from_parts(p),
            Err(DocumentError::BlocksCountTooSmall { .. })
        ));

        let mut p = parts(&[], 0);
        p.block_size = 0;
        assert!(matches!(
            BmapDocument::from_parts(p),
            Err(DocumentError::ZeroBlockSize)
        ));

        // A partial tail block still counts as a block.
        let mut p = parts(&[(2048, 2048)], 1);
        p.image_size = (8 << 20) + 1;
        p.blocks_count = 2049;
        assert!(BmapDocument::from_parts(p).is_ok());
    }
}
