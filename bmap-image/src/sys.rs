//! Thin wrappers around the block mapping ioctls.

use std::fs::File;
use std::io;

#[cfg(target_os = "linux")]
mod imp {
    use super::*;

    use std::os::fd::AsRawFd;
    use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

    const FIBMAP: libc::c_ulong = 1;
    const FIGETBSZ: libc::c_ulong = 2;
    const FS_IOC_FIEMAP: libc::c_ulong = 0xC020660B;

    /// `struct fiemap` with room for a single extent.
    #[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
    #[repr(C)]
    struct FiemapRaw {
        start: u64,           // 0x00
        length: u64,          // 0x08
        flags: u32,           // 0x10
        mapped_extents: u32,  // 0x14
        extent_count: u32,    // 0x18
        reserved: u32,        // 0x1C
        extent: FiemapExtent, // 0x20
    }

    #[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
    #[repr(C)]
    struct FiemapExtent {
        logical: u64,         // 0x00
        physical: u64,        // 0x08
        length: u64,          // 0x10
        reserved64: [u64; 2], // 0x18
        flags: u32,           // 0x28
        reserved: [u32; 3],   // 0x2C
    }

    pub fn figetbsz(file: &File) -> io::Result<u64> {
        let mut size: libc::c_int = 0;
        // SAFETY: FIGETBSZ writes one c_int through the pointer, which points
        // to a live local of that type; the descriptor is owned by `file`.
        let res = unsafe { libc::ioctl(file.as_raw_fd(), FIGETBSZ as _, &mut size) };

        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(size.max(0) as u64)
    }

    pub fn fiemap_mapped_extents(file: &File, start: u64, length: u64) -> io::Result<u32> {
        let mut req = FiemapRaw::new_zeroed();

        req.start = start;
        req.length = length;
        req.extent_count = 1;

        // SAFETY: `req` is a `struct fiemap` followed by room for exactly
        // `extent_count` (1) extents, so the kernel never writes past it.
        let res = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                FS_IOC_FIEMAP as _,
                req.as_mut_bytes().as_mut_ptr(),
            )
        };

        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(req.mapped_extents)
    }

    pub fn fibmap(file: &File, block: u64) -> io::Result<u64> {
        let mut block = libc::c_int::try_from(block)
            .map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
        // SAFETY: FIBMAP reads and overwrites one c_int through the pointer,
        // which points to a live local of that type.
        let res = unsafe { libc::ioctl(file.as_raw_fd(), FIBMAP as _, &mut block) };

        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(block as u32 as u64)
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "block mapping ioctls need Linux")
    }

    pub fn figetbsz(_: &File) -> io::Result<u64> {
        Err(unsupported())
    }

    pub fn fiemap_mapped_extents(_: &File, _: u64, _: u64) -> io::Result<u32> {
        Err(unsupported())
    }

    pub fn fibmap(_: &File, _: u64) -> io::Result<u64> {
        Err(unsupported())
    }
}

pub(crate) use imp::{fibmap, fiemap_mapped_extents, figetbsz};

/// Returns `true` if `err` means the request is not implemented for the
/// descriptor, as opposed to a failure of a supported request.
pub(crate) fn is_unsupported(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported
        || matches!(
            err.raw_os_error(),
            Some(libc::ENOTTY | libc::EOPNOTSUPP | libc::ENOSYS)
        )
}

pub(crate) fn is_permission_denied(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EPERM | libc::EACCES))
}
