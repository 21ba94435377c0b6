use crate::sys;
use snafu::{Snafu, ensure};
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io;
use tracing::debug;

use scan_error::*;

/// Mechanism used to ask the kernel whether a block is allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// `FS_IOC_FIEMAP`, works for unprivileged users.
    ExtentMap,
    /// `FIBMAP`, needs `CAP_SYS_RAWIO`.
    LegacyBlockMap,
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ExtentMap => "FIEMAP",
            Self::LegacyBlockMap => "FIBMAP",
        })
    }
}

/// Tells which blocks of a file are physically allocated.
///
/// The strategy is chosen once in [`ExtentScanner::new`] by probing block 0
/// and is never re-probed afterwards. Scanning does not modify the file.
pub struct ExtentScanner<'a> {
    file: &'a File,
    block_size: u64,
    blocks_count: u64,
    strategy: Strategy,
}

impl std::fmt::Debug for ExtentScanner<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtentScanner")
            .field("block_size", &self.block_size)
            .field("blocks_count", &self.blocks_count)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl<'a> ExtentScanner<'a> {
    /// Probes the file and selects the scanning strategy.
    ///
    /// Fails with [`ScanError::Capability`] when `FIEMAP` is not supported
    /// and `FIBMAP` is denied for lack of privilege.
    pub fn new(file: &'a File, block_size: u64, blocks_count: u64) -> Result<Self, ScanError> {
        ensure!(block_size > 0, ZeroBlockSizeSnafu);

        let strategy = select_strategy(sys::fiemap_mapped_extents(file, 0, block_size), || {
            sys::fibmap(file, 0)
        })?;
        let scanner = Self {
            file,
            block_size,
            blocks_count,
            strategy,
        };

        debug!(strategy = %scanner.strategy, block_size, "extent scanner ready");

        Ok(scanner)
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    #[must_use]
    pub fn blocks_count(&self) -> u64 {
        self.blocks_count
    }

    /// Returns `true` if block `block` of the file is allocated.
    pub fn is_block_mapped(&self, block: u64) -> Result<bool, ScanError> {
        ensure!(
            block < self.blocks_count,
            BlockOutOfRangeSnafu {
                block,
                blocks_count: self.blocks_count,
            }
        );

        let result = match self.strategy {
            Strategy::ExtentMap => {
                sys::fiemap_mapped_extents(self.file, block * self.block_size, self.block_size)
                    .map(|n| n != 0)
            }
            Strategy::LegacyBlockMap => sys::fibmap(self.file, block).map(|phys| phys != 0),
        };

        result.map_err(|source| ScanError::QueryFailed {
            strategy: self.strategy,
            block,
            source,
        })
    }
}

/// Picks the strategy from the outcome of a `FIEMAP` query on block 0. The
/// `FIBMAP` query runs only when `FIEMAP` is not supported.
fn select_strategy(
    extent_map: io::Result<u32>,
    legacy_map: impl FnOnce() -> io::Result<u64>,
) -> Result<Strategy, ScanError> {
    match extent_map {
        Ok(_) => Ok(Strategy::ExtentMap),
        Err(err) if sys::is_unsupported(&err) => {
            debug!(error = %err, "FIEMAP is not supported, falling back to FIBMAP");

            match legacy_map() {
                Ok(_) => Ok(Strategy::LegacyBlockMap),
                Err(err) if sys::is_permission_denied(&err) || sys::is_unsupported(&err) => {
                    Err(ScanError::Capability { source: err })
                }
                Err(err) => Err(ScanError::QueryFailed {
                    strategy: Strategy::LegacyBlockMap,
                    block: 0,
                    source: err,
                }),
            }
        }
        Err(err) if sys::is_permission_denied(&err) => Err(ScanError::Capability { source: err }),
        Err(err) => Err(ScanError::QueryFailed {
            strategy: Strategy::ExtentMap,
            block: 0,
            source: err,
        }),
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum ScanError {
    #[snafu(display(
        "the FIEMAP ioctl is not supported and the FIBMAP ioctl requires the \
         CAP_SYS_RAWIO capability, which is missing; run as root or use a \
         kernel and file system supporting FIEMAP"
    ))]
    Capability { source: std::io::Error },

    #[snafu(display("the {strategy} ioctl failed for block {block}"))]
    QueryFailed {
        strategy: Strategy,
        block: u64,
        source: std::io::Error,
    },

    #[snafu(display("block {block} is outside of the {blocks_count} file blocks"))]
    BlockOutOfRange { block: u64, blocks_count: u64 },

    #[snafu(display("block size is zero"))]
    ZeroBlockSize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    fn os_error(code: i32) -> io::Error {
        io::Error::from_raw_os_error(code)
    }

    #[test]
    fn test_extent_map_is_preferred() {
        let strategy = select_strategy(Ok(1), || panic!("FIBMAP must not be tried")).unwrap();

        assert_eq!(strategy, Strategy::ExtentMap);
    }

    #[test]
    fn test_fallback_when_extent_map_unsupported() {
        for code in [libc::ENOTTY, libc::EOPNOTSUPP] {
            let strategy = select_strategy(Err(os_error(code)), || Ok(1234)).unwrap();

            assert_eq!(strategy, Strategy::LegacyBlockMap, "errno {code}");
        }
    }

    #[test]
    fn test_missing_privilege_is_a_capability_error() {
        let err = select_strategy(Err(os_error(libc::EOPNOTSUPP)), || Err(os_error(libc::EPERM)))
            .unwrap_err();

        assert!(matches!(err, ScanError::Capability { .. }));

        let err = select_strategy(Err(os_error(libc::EPERM)), || panic!("FIBMAP must not be tried"))
            .unwrap_err();

        assert!(matches!(err, ScanError::Capability { .. }));
    }

    #[test]
    fn test_other_ioctl_failures_are_query_errors() {
        let err = select_strategy(Err(os_error(libc::EIO)), || panic!("FIBMAP must not be tried"))
            .unwrap_err();

        assert!(matches!(
            err,
            ScanError::QueryFailed {
                strategy: Strategy::ExtentMap,
                block: 0,
                ..
            }
        ));

        let err = select_strategy(Err(os_error(libc::ENOTTY)), || Err(os_error(libc::EIO))).unwrap_err();

        assert!(matches!(
            err,
            ScanError::QueryFailed {
                strategy: Strategy::LegacyBlockMap,
                ..
            }
        ));
    }

    #[test]
    fn test_holes_are_not_mapped() {
        let mut file = tempfile::tempfile().unwrap();
        let block_size = crate::geometry::block_size_of(&file).unwrap();

        file.write_all(&vec![0xAA; block_size as usize]).unwrap();
        file.seek(SeekFrom::Start(block_size * 9)).unwrap();
        file.write_all(&vec![0xBB; block_size as usize]).unwrap();
        file.sync_all().unwrap();

        let scanner = match ExtentScanner::new(&file, block_size, 10) {
            Ok(s) => s,
            Err(err) => {
                eprintln!("skipping, extent scanning unavailable: {err}");
                return;
            }
        };

        assert!(scanner.is_block_mapped(0).unwrap());
        assert!(scanner.is_block_mapped(9).unwrap());
        assert!(matches!(
            scanner.is_block_mapped(10),
            Err(ScanError::BlockOutOfRange { block: 10, .. })
        ));
    }
}
