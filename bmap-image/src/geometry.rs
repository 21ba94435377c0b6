use crate::sys;
use snafu::{ResultExt, Snafu, ensure};
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use tracing::debug;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum GeometryError {
    #[snafu(display("cannot stat the file"))]
    Stat { source: std::io::Error },

    #[snafu(display("unable to determine block size"))]
    Unknown,
}

/// Returns the block size of the file system holding `file`.
///
/// The `FIGETBSZ` ioctl is asked first. When it fails or reports zero, the
/// preferred I/O size from `stat` is used instead.
pub fn block_size_of(file: &File) -> Result<u64, GeometryError> {
    match sys::figetbsz(file) {
        Ok(size) if size > 0 => return Ok(size),
        Ok(_) => debug!("FIGETBSZ reported a zero block size"),
        Err(err) => debug!(error = %err, "FIGETBSZ failed"),
    }

    let size = file.metadata().context(StatSnafu)?.blksize();

    ensure!(size > 0, UnknownSnafu);

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_file_has_block_size() {
        let file = tempfile::tempfile().unwrap();
        let size = block_size_of(&file).unwrap();

        assert!(size >= 512);
    }
}
