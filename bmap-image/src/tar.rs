//! Reader for tar archives holding exactly one regular file.

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use std::io::{self, Read};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use tar_error::*;

const BLOCK_SIZE: u64 = 512;

/// Longest GNU long name accepted.
const MAX_LONG_NAME: u64 = 64 * 1024;

#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum TarError {
    #[snafu(display("archive contains no files"))]
    NoMembers,

    #[snafu(display("archive member '{name}' is not a regular file (type '{type_flag}')"))]
    NotRegularFile { name: String, type_flag: char },

    #[snafu(display("archive contains more than one member, '{name}' is followed by another"))]
    MultipleMembers { name: String },

    #[snafu(display("invalid tar header: {reason}"))]
    InvalidHeader { reason: &'static str },

    #[snafu(display("cannot read the archive"))]
    Read { source: io::Error },
}

impl TarError {
    /// Returns `true` for errors about the archive layout rather than I/O.
    #[must_use]
    pub fn is_shape(&self) -> bool {
        !matches!(self, Self::Read { .. })
    }
}

/// A POSIX ustar header block.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct UstarHeader {
    name: [u8; 100],      // 0x000
    mode: [u8; 8],        // 0x064
    uid: [u8; 8],         // 0x06C
    gid: [u8; 8],         // 0x074
    size: [u8; 12],       // 0x07C
    mtime: [u8; 12],      // 0x088
    checksum: [u8; 8],    // 0x094
    type_flag: u8,        // 0x09C
    link_name: [u8; 100], // 0x09D
    magic: [u8; 6],       // 0x101
    version: [u8; 2],     // 0x107
    uname: [u8; 32],      // 0x109
    gname: [u8; 32],      // 0x129
    dev_major: [u8; 8],   // 0x149
    dev_minor: [u8; 8],   // 0x151
    prefix: [u8; 155],    // 0x159
    pad: [u8; 12],        // 0x1F4
}

impl UstarHeader {
    fn verify_checksum(&self) -> Result<(), TarError> {
        let stored = parse_octal(&self.checksum).context(InvalidHeaderSnafu {
            reason: "bad checksum field",
        })?;
        let computed: u64 = self
            .as_bytes()
            .iter()
            .enumerate()
            .map(|(i, &b)| if (0x94..0x9C).contains(&i) { b' ' } else { b })
            .map(u64::from)
            .sum();

        ensure!(
            stored == computed,
            InvalidHeaderSnafu {
                reason: "checksum mismatch",
            }
        );

        Ok(())
    }

    fn size(&self) -> Result<u64, TarError> {
        // GNU base-256 encoding for sizes of 8 GiB and more.
        if self.size[0] & 0x80 != 0 {
            let (high, low) = self.size.split_at(4);

            ensure!(
                high[0] & 0x7F == 0 && high[1..].iter().all(|&b| b == 0),
                InvalidHeaderSnafu {
                    reason: "size does not fit 64 bits",
                }
            );

            return Ok(low.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)));
        }

        parse_octal(&self.size).context(InvalidHeaderSnafu {
            reason: "bad size field",
        })
    }

    fn name(&self) -> String {
        let name = cstr(&self.name);
        let prefix = cstr(&self.prefix);

        if &self.magic[..5] == b"ustar" && !prefix.is_empty() {
            format!("{prefix}/{name}")
        } else {
            name
        }
    }
}

fn cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(field).ok()?;
    let text = text.trim_matches(|c: char| c == '\0' || c == ' ');

    if text.is_empty() {
        return Some(0);
    }

    u64::from_str_radix(text, 8).ok()
}

fn padding(size: u64) -> u64 {
    (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE
}

/// Reads one header block. Returns `None` at a clean end of input.
fn read_block<R: Read>(reader: &mut R) -> Result<Option<[u8; 512]>, TarError> {
    let mut block = [0u8; 512];
    let mut filled = 0;

    while filled < block.len() {
        match reader.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e).context(ReadSnafu),
        }
    }

    match filled {
        0 => Ok(None),
        512 => Ok(Some(block)),
        _ => InvalidHeaderSnafu {
            reason: "truncated header block",
        }
        .fail(),
    }
}

fn skip<R: Read>(reader: &mut R, len: u64) -> Result<(), TarError> {
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink()).context(ReadSnafu)?;

    ensure!(
        skipped == len,
        InvalidHeaderSnafu {
            reason: "archive ends inside an entry",
        }
    );

    Ok(())
}

/// The only member of a tar archive, read sequentially.
///
/// Construction reads up to the first regular file, skipping pax and GNU
/// long-name headers. Whether another member follows is checked when the
/// member has been read to its end; a second member then fails the read
/// with an [`io::ErrorKind::InvalidData`] error wrapping
/// [`TarError::MultipleMembers`].
pub struct TarMember<R> {
    inner: R,
    name: String,
    size: u64,
    remaining: u64,
    finished: bool,
}

impl<R> std::fmt::Debug for TarMember<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarMember")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl<R: Read> TarMember<R> {
    pub fn new(mut inner: R) -> Result<Self, TarError> {
        let mut long_name = None;

        loop {
            let block = match read_block(&mut inner)? {
                Some(b) if b.iter().any(|&x| x != 0) => b,
                _ => return NoMembersSnafu.fail(),
            };

            let header = UstarHeader::read_from_bytes(&block).map_err(|_| {
                InvalidHeaderSnafu {
                    reason: "short header",
                }
                .build()
            })?;

            header.verify_checksum()?;

            let size = header.size()?;
            let padded = size
                .checked_add(padding(size))
                .context(InvalidHeaderSnafu {
                    reason: "size too large",
                })?;

            match header.type_flag {
                b'0' | b'\0' | b'7' => {
                    let name = long_name.take().unwrap_or_else(|| header.name());

                    return Ok(Self {
                        inner,
                        name,
                        size,
                        remaining: size,
                        finished: false,
                    });
                }
                b'L' => {
                    ensure!(
                        size <= MAX_LONG_NAME,
                        InvalidHeaderSnafu {
                            reason: "long name is too long",
                        }
                    );

                    let mut name = vec![0u8; size as usize];

                    inner.read_exact(&mut name).context(ReadSnafu)?;
                    skip(&mut inner, padding(size))?;

                    long_name = Some(cstr(&name));
                }
                b'x' | b'g' | b'K' => skip(&mut inner, padded)?,
                other => {
                    return NotRegularFileSnafu {
                        name: long_name.take().unwrap_or_else(|| header.name()),
                        type_flag: other as char,
                    }
                    .fail();
                }
            }
        }
    }

    /// Path of the member inside the archive.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Skips the padding after the member and makes sure nothing but the
    /// end-of-archive marker follows.
    fn finish(&mut self) -> Result<(), TarError> {
        if self.finished {
            return Ok(());
        }

        self.finished = true;
        skip(&mut self.inner, padding(self.size))?;

        match read_block(&mut self.inner)? {
            Some(block) if block.iter().any(|&b| b != 0) => MultipleMembersSnafu {
                name: self.name.clone(),
            }
            .fail(),
            _ => Ok(()),
        }
    }
}

impl<R: Read> Read for TarMember<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return match self.finish() {
                Ok(()) => Ok(0),
                Err(TarError::Read { source }) => Err(source),
                Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            };
        }

        let len = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..len])?;

        if n == 0 && len > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("archive member '{}' is truncated", self.name),
            ));
        }

        self.remaining -= n as u64;

        Ok(n)
    }
}

/// Builds tar archives in memory for tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use zerocopy::FromZeros;

    pub fn header(name: &str, type_flag: u8, size: u64) -> [u8; 512] {
        let mut h = UstarHeader::new_zeroed();

        h.name[..name.len()].copy_from_slice(name.as_bytes());
        h.mode.copy_from_slice(b"0000644\0");
        h.size.copy_from_slice(format!("{size:011o}\0").as_bytes());
        h.type_flag = type_flag;
        h.magic.copy_from_slice(b"ustar\0");
        h.version.copy_from_slice(b"00");
        h.checksum.copy_from_slice(b"        ");

        let sum: u64 = h.as_bytes().iter().map(|&b| u64::from(b)).sum();

        h.checksum.copy_from_slice(format!("{sum:06o}\0 ").as_bytes());

        let mut out = [0u8; 512];
        out.copy_from_slice(h.as_bytes());
        out
    }

    /// An archive with one entry per `(name, type, data)`.
    pub fn archive(entries: &[(&str, u8, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();

        for &(name, type_flag, data) in entries {
            out.extend_from_slice(&header(name, type_flag, data.len() as u64));
            out.extend_from_slice(data);
            out.resize(out.len() + padding(data.len() as u64) as usize, 0);
        }

        out.resize(out.len() + 1024, 0);
        out
    }
}
