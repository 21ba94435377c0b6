use crate::tar::{TarError, TarMember};
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use snafu::{ResultExt, Snafu, ensure};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

use source_error::*;

/// Encoding of an image file, derived from its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    /// A tar archive with a single member, compressed with gzip.
    TarGzip,
    /// A tar archive with a single member, compressed with bzip2.
    TarBzip2,
}

impl Compression {
    /// Maps a file name suffix to its encoding. Unknown suffixes are raw.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGzip
        } else if name.ends_with(".tar.bz2") {
            Self::TarBzip2
        } else if name.ends_with(".gz") {
            Self::Gzip
        } else if name.ends_with(".bz2") {
            Self::Bzip2
        } else {
            Self::None
        }
    }

    #[must_use]
    pub fn is_archive(self) -> bool {
        matches!(self, Self::TarGzip | Self::TarBzip2)
    }
}

enum Inner {
    Raw(File),
    Stream(Box<dyn Read + Send>),
}

/// A readable image, decompressed on the fly.
///
/// Raw images support seeking anywhere. Compressed images are forward-only:
/// [`ImageSource::seek_to`] reads and discards up to the requested offset and
/// refuses to go back.
///
/// # Example
///
/// ```no_run
/// use bmap_image::ImageSource;
/// use std::io::Read;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut source = ImageSource::open("disk.img.gz")?;
/// let mut head = [0u8; 512];
///
/// source.seek_to(1 << 20)?;
/// source.read_exact(&mut head)?;
/// # Ok(())
/// # }
/// ```
pub struct ImageSource {
    inner: Inner,
    path: PathBuf,
    compression: Compression,
    position: u64,
    size: Option<u64>,
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSource")
            .field("path", &self.path)
            .field("compression", &self.compression)
            .field("position", &self.position)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl ImageSource {
    /// Opens the image at `path`, choosing the decoder from its suffix.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).context(StatSnafu { path })?;

        ensure!(meta.is_file(), NotRegularFileSnafu { path });

        let file = File::open(path).context(OpenSnafu { path })?;

        Self::from_file(file, path)
    }

    /// Uses an already opened image file. The decoder is chosen from the
    /// suffix of `path`.
    pub fn from_file(file: File, path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let compression = Compression::from_path(&path);

        if compression == Compression::None {
            let size = file.metadata().context(StatSnafu { path: &path })?.len();

            return Ok(Self {
                inner: Inner::Raw(file),
                path,
                compression,
                position: 0,
                size: Some(size),
            });
        }

        Self::from_reader(BufReader::new(file), path, compression)
    }

    /// Wraps an arbitrary reader holding data in the given encoding.
    pub fn from_reader<R>(
        reader: R,
        path: impl Into<PathBuf>,
        compression: Compression,
    ) -> Result<Self, SourceError>
    where
        R: Read + Send + 'static,
    {
        let path = path.into();

        let (stream, size): (Box<dyn Read + Send>, _) = match compression {
            Compression::None => (Box::new(reader), None),
            Compression::Gzip => (Box::new(MultiGzDecoder::new(reader)), None),
            Compression::Bzip2 => (Box::new(MultiBzDecoder::new(reader)), None),
            Compression::TarGzip => {
                let member = open_member(MultiGzDecoder::new(reader), &path)?;
                let size = member.size();
                (Box::new(member), Some(size))
            }
            Compression::TarBzip2 => {
                let member = open_member(MultiBzDecoder::new(reader), &path)?;
                let size = member.size();
                (Box::new(member), Some(size))
            }
        };

        debug!(path = %path.display(), ?compression, ?size, "opened image stream");

        Ok(Self {
            inner: Inner::Stream(stream),
            path,
            compression,
            position: 0,
            size,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Offset of the next byte to be read.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Uncompressed size, when known without reading the whole stream.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Returns `true` if the source can seek backwards.
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        matches!(self.inner, Inner::Raw(_))
    }

    /// Moves the read cursor to the absolute offset `offset`.
    ///
    /// Streams can only move forward; the bytes in between are read and
    /// dropped. Reaching the end of a stream before `offset` is an
    /// [`io::ErrorKind::UnexpectedEof`] error.
    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        match &mut self.inner {
            Inner::Raw(file) => {
                file.seek(SeekFrom::Start(offset))?;
            }
            Inner::Stream(stream) => {
                if offset < self.position {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!(
                            "cannot seek back from {} to {offset} in a compressed image",
                            self.position
                        ),
                    ));
                }

                let wanted = offset - self.position;
                let skipped = io::copy(&mut stream.by_ref().take(wanted), &mut io::sink())?;

                if skipped < wanted {
                    self.position += skipped;
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("image ends at {} before offset {offset}", self.position),
                    ));
                }
            }
        }

        self.position = offset;

        Ok(())
    }
}

impl ImageSource {
    /// Reads an archive member to its end so that a member following it is
    /// detected. Returns the number of bytes drained; other encodings are
    /// left untouched.
    pub fn finish(&mut self) -> io::Result<u64> {
        if !self.compression.is_archive() {
            return Ok(0);
        }

        io::copy(self, &mut io::sink())
    }
}

impl Read for ImageSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.inner {
            Inner::Raw(file) => file.read(buf)?,
            Inner::Stream(stream) => stream.read(buf)?,
        };

        self.position += n as u64;

        Ok(n)
    }
}

fn open_member<R: Read>(reader: R, path: &Path) -> Result<TarMember<R>, SourceError> {
    match TarMember::new(reader) {
        Ok(member) => {
            debug!(member = member.name(), size = member.size(), "found archive member");
            Ok(member)
        }
        Err(TarError::Read { source }) => Err(source).context(ReadArchiveSnafu { path }),
        Err(source) => Err(source).context(ArchiveShapeSnafu { path }),
    }
}

/// Returns the archive layout error carried by `err`, if any.
///
/// Reads of a [`TarMember`] report a second archive member through an
/// [`io::Error`]; this recovers the original [`TarError`].
#[must_use]
pub fn archive_shape_error(err: &io::Error) -> Option<&TarError> {
    err.get_ref()
        .and_then(|e| e.downcast_ref::<TarError>())
        .filter(|e| e.is_shape())
}

#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum SourceError {
    #[snafu(display("cannot access image file '{}'", path.display()))]
    Stat { path: PathBuf, source: io::Error },

    #[snafu(display("image file '{}' is not a regular file", path.display()))]
    NotRegularFile { path: PathBuf },

    #[snafu(display("cannot open image file '{}'", path.display()))]
    Open { path: PathBuf, source: io::Error },

    #[snafu(display("unsupported archive layout in '{}'", path.display()))]
    ArchiveShape { path: PathBuf, source: TarError },

    #[snafu(display("cannot read archive '{}'", path.display()))]
    ReadArchive { path: PathBuf, source: io::Error },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tar::testing::archive;
    use std::io::Write;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn test_compression_from_suffix() {
        let cases = [
            ("a.img", Compression::None),
            ("a.img.gz", Compression::Gzip),
            ("a.img.bz2", Compression::Bzip2),
            ("a.tar.gz", Compression::TarGzip),
            ("a.tgz", Compression::TarGzip),
            ("a.tar.bz2", Compression::TarBzip2),
            ("a.tar", Compression::None),
            ("gz", Compression::None),
        ];

        for (name, expected) in cases {
            assert_eq!(Compression::from_path(Path::new(name)), expected, "{name}");
        }
    }

    #[test]
    fn test_raw_seeks_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.raw");
        let data = pattern(10_000);

        std::fs::write(&path, &data).unwrap();

        let mut source = ImageSource::open(&path).unwrap();
        let mut buf = [0u8; 4];

        assert!(source.is_seekable());
        assert_eq!(source.size(), Some(10_000));

        source.seek_to(9000).unwrap();
        source.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[9000..9004]);

        source.seek_to(10).unwrap();
        source.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[10..14]);
        assert_eq!(source.position(), 14);
    }

    #[test]
    fn test_gzip_forward_only() {
        let data = pattern(100_000);
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        enc.write_all(&data).unwrap();
        let gz = enc.finish().unwrap();

        let mut source = ImageSource::from_reader(io::Cursor::new(gz), "x.gz", Compression::Gzip).unwrap();
        let mut buf = [0u8; 8];

        assert!(!source.is_seekable());
        assert_eq!(source.size(), None);

        source.seek_to(50_000).unwrap();
        source.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[50_000..50_008]);

        let err = source.seek_to(100).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err = source.seek_to(200_000).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(source.position(), 100_000);
    }

    #[test]
    fn test_bzip2_stream() {
        let data = pattern(30_000);
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::fast());
        enc.write_all(&data).unwrap();
        let bz = enc.finish().unwrap();

        let mut source = ImageSource::from_reader(io::Cursor::new(bz), "x.bz2", Compression::Bzip2).unwrap();
        let mut out = Vec::new();

        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_tar_gz_member() {
        let data = pattern(5000);
        let tar = archive(&[("disk.img", b'0', &data)]);
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        enc.write_all(&tar).unwrap();
        let tgz = enc.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.tgz");
        std::fs::write(&path, tgz).unwrap();

        let mut source = ImageSource::open(&path).unwrap();
        let mut out = Vec::new();

        assert_eq!(source.compression(), Compression::TarGzip);
        assert_eq!(source.size(), Some(5000));
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_tar_shape_errors() {
        let gz = |bytes: &[u8]| {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            enc.write_all(bytes).unwrap();
            enc.finish().unwrap()
        };

        let empty = gz(&archive(&[]));
        assert!(matches!(
            ImageSource::from_reader(io::Cursor::new(empty), "e.tar.gz", Compression::TarGzip),
            Err(SourceError::ArchiveShape {
                source: TarError::NoMembers,
                ..
            })
        ));

        let two = gz(&archive(&[("a", b'0', b"aaaa"), ("b", b'0', b"bbbb")]));
        let mut source =
            ImageSource::from_reader(io::Cursor::new(two), "t.tar.gz", Compression::TarGzip).unwrap();
        let err = source.read_to_end(&mut Vec::new()).unwrap_err();

        assert!(matches!(
            archive_shape_error(&err),
            Some(TarError::MultipleMembers { .. })
        ));
    }

    #[test]
    fn test_finish_detects_second_member() {
        let gz = |bytes: &[u8]| {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            enc.write_all(bytes).unwrap();
            enc.finish().unwrap()
        };

        let one = gz(&archive(&[("a", b'0', &pattern(3000))]));
        let mut source =
            ImageSource::from_reader(io::Cursor::new(one), "o.tar.gz", Compression::TarGzip).unwrap();
        let mut head = [0u8; 100];

        source.read_exact(&mut head).unwrap();
        assert_eq!(source.finish().unwrap(), 2900);
        assert_eq!(source.position(), 3000);

        let two = gz(&archive(&[("a", b'0', &pattern(3000)), ("b", b'0', b"bbbb")]));
        let mut source =
            ImageSource::from_reader(io::Cursor::new(two), "t.tar.gz", Compression::TarGzip).unwrap();

        source.read_exact(&mut head).unwrap();

        let err = source.finish().unwrap_err();

        assert!(matches!(
            archive_shape_error(&err),
            Some(TarError::MultipleMembers { .. })
        ));
    }

    #[test]
    fn test_finish_leaves_plain_streams_alone() {
        let data = pattern(1000);
        let mut source =
            ImageSource::from_reader(io::Cursor::new(data), "x.img", Compression::None).unwrap();

        assert_eq!(source.finish().unwrap(), 0);
        assert_eq!(source.position(), 0);
    }

    #[test]
    fn test_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            ImageSource::open(dir.path()),
            Err(SourceError::NotRegularFile { .. })
        ));
    }
}
