use crate::checksum::Checksum;
use snafu::{Snafu, ensure};
use std::fmt::{Display, Formatter};

/// Error for a range whose first block is after its last block.
#[derive(Debug, Snafu)]
#[snafu(display("bad range (first > last): {first}-{last}"))]
pub struct InvertedRangeError {
    pub first: u64,
    pub last: u64,
}

/// An inclusive run of mapped blocks, optionally with the checksum of its
/// contents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockRange {
    first: u64,
    last: u64,
    checksum: Option<Checksum>,
}

impl BlockRange {
    pub fn new(first: u64, last: u64) -> Result<Self, InvertedRangeError> {
        ensure!(first <= last, InvertedRangeSnafu { first, last });

        Ok(Self {
            first,
            last,
            checksum: None,
        })
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    #[must_use]
    pub fn first(&self) -> u64 {
        self.first
    }

    #[must_use]
    pub fn last(&self) -> u64 {
        self.last
    }

    #[must_use]
    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    /// Number of blocks covered by this range.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.last - self.first + 1
    }

    /// Returns the byte offset and byte length of this range.
    ///
    /// The span is clamped to `image_size` so the partial tail block of an
    /// image whose size is not a multiple of `block_size` is not overrun.
    #[must_use]
    pub fn byte_span(&self, block_size: u64, image_size: u64) -> (u64, u64) {
        let start = self.first.saturating_mul(block_size);
        let end = (self.last + 1).saturating_mul(block_size).min(image_size);

        (start, end.saturating_sub(start))
    }
}

impl Display for BlockRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}
