use crate::checksum::ChecksumKind;
use crate::document::{BmapDocument, mapped_percent};
use crate::human::human_size;
use crate::range::BlockRange;
use crate::version::Version;
use std::io::{self, Write};

/// Version written for SHA-1 checksums or no checksums at all.
pub const SHA1_FORMAT_VERSION: Version = Version::new(1, 2);

/// Version written for SHA-256 checksums, the first one with `ChecksumType`.
pub const SHA256_FORMAT_VERSION: Version = Version::new(1, 4);

/// Geometry written at the top of a bmap, before any range is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BmapHeader {
    pub image_size: u64,
    pub block_size: u64,
    pub blocks_count: u64,
    pub checksum: Option<ChecksumKind>,
}

impl BmapHeader {
    /// Format version implied by the checksum kind.
    #[must_use]
    pub fn version(&self) -> Version {
        match self.checksum {
            Some(ChecksumKind::Sha256) => SHA256_FORMAT_VERSION,
            _ => SHA1_FORMAT_VERSION,
        }
    }

    fn checksum_attribute(&self) -> &'static str {
        match self.checksum {
            Some(ChecksumKind::Sha256) => "chksum",
            _ => "sha1",
        }
    }
}

/// Streams a bmap document out range by range.
///
/// The header is written by [`BmapWriter::start`], every range as soon as it
/// is passed to [`BmapWriter::write_range`], and the mapped blocks count,
/// which is only known at the end, by [`BmapWriter::finish`]. Memory use does
/// not depend on the number of ranges.
///
/// The writer does not validate the ranges, callers are expected to check the
/// resulting document.
pub struct BmapWriter<W: Write> {
    out: W,
    header: BmapHeader,
    mapped_blocks_count: u64,
}

impl<W: Write> std::fmt::Debug for BmapWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BmapWriter")
            .field("header", &self.header)
            .field("mapped_blocks_count", &self.mapped_blocks_count)
            .finish_non_exhaustive()
    }
}

impl<W: Write> BmapWriter<W> {
    pub fn start(mut out: W, header: BmapHeader) -> io::Result<Self> {
        write_prologue(&mut out, &header)?;

        Ok(Self {
            out,
            header,
            mapped_blocks_count: 0,
        })
    }

    pub fn write_range(&mut self, range: &BlockRange) -> io::Result<()> {
        self.mapped_blocks_count += range.block_count();

        match (self.header.checksum, range.checksum()) {
            (Some(_), Some(sum)) => writeln!(
                self.out,
                "\t\t<Range {}=\"{}\"> {} </Range>",
                self.header.checksum_attribute(),
                sum,
                range
            ),
            _ => writeln!(self.out, "\t\t<Range> {range} </Range>"),
        }
    }

    /// Number of mapped blocks written so far.
    #[must_use]
    pub fn mapped_blocks_count(&self) -> u64 {
        self.mapped_blocks_count
    }

    /// Writes the closing part and returns the output with the final mapped
    /// blocks count.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        let header = &self.header;
        let mapped = self.mapped_blocks_count;
        let mapped_size = human_size(mapped.saturating_mul(header.block_size));
        let percent = mapped_percent(mapped, header.blocks_count);

        write!(
            self.out,
            "\t</BlockMap>\n\n\
             \t<!-- Count of mapped blocks ({mapped_size} or {percent:.1}% mapped) -->\n\
             \t<MappedBlocksCount> {mapped} </MappedBlocksCount>\n\
             </bmap>\n"
        )?;

        self.out.flush()?;

        Ok((self.out, mapped))
    }
}

/// Serializes a whole document.
pub fn write_document<W: Write>(doc: &BmapDocument, out: W) -> io::Result<W> {
    let mut writer = BmapWriter::start(
        out,
        BmapHeader {
            image_size: doc.image_size(),
            block_size: doc.block_size(),
            blocks_count: doc.blocks_count(),
            checksum: doc.checksum_kind(),
        },
    )?;

    for range in doc.ranges() {
        writer.write_range(range)?;
    }

    writer.finish().map(|(out, _)| out)
}

fn write_prologue<W: Write>(out: &mut W, header: &BmapHeader) -> io::Result<()> {
    out.write_all(
        concat!(
            "<?xml version=\"1.0\" ?>\n\n",
            "<!-- This file contains block map for an image file. The block map\n",
            "     is basically a list of block numbers in the image file. It lists\n",
            "     only those blocks which contain data (boot sector, partition\n",
            "     table, file-system metadata, files, directories, extents, etc).\n",
            "     These blocks have to be copied to the target device. The other\n",
            "     blocks do not contain any useful data and do not have to be\n",
            "     copied to the target device. Thus, using the block map users can\n",
            "     flash the image fast. So the block map is just an optimization.\n",
            "     It is OK to ignore this file and just flash the entire image to\n",
            "     the target device if the flashing speed is not important.\n\n",
            "     Note, this file contains commentaries with useful information\n",
            "     like image size in gigabytes, percentage of mapped data, etc.\n",
            "     This data is there merely to make the XML file human-readable.\n\n",
            "     The 'version' attribute is the block map file format version in\n",
            "     the 'major.minor' format. The version major number is increased\n",
            "     whenever we make incompatible changes to the block map format,\n",
            "     meaning that the bmap-aware flasher would have to be modified in\n",
            "     order to support the new format. The minor version is increased\n",
            "     in case of compatible changes. For example, if we add an attribute\n",
            "     which is optional for the bmap-aware flasher. -->\n\n",
        )
        .as_bytes(),
    )?;

    write!(
        out,
        "<bmap version=\"{version}\">\n\
         \t<!-- Image size in bytes ({size}) -->\n\
         \t<ImageSize> {image_size} </ImageSize>\n\n\
         \t<!-- Size of a block in bytes -->\n\
         \t<BlockSize> {block_size} </BlockSize>\n\n\
         \t<!-- Count of blocks in the image file -->\n\
         \t<BlocksCount> {blocks_count} </BlocksCount>\n\n",
        version = header.version(),
        size = human_size(header.image_size),
        image_size = header.image_size,
        block_size = header.block_size,
        blocks_count = header.blocks_count,
    )?;

    if let Some(kind @ ChecksumKind::Sha256) = header.checksum {
        write!(
            out,
            "\t<!-- Type of checksum used in this file -->\n\
             \t<ChecksumType> {kind} </ChecksumType>\n\n"
        )?;
    }

    write!(
        out,
        "\t<!-- The block map which consists of elements which may\n\
         \t     either be a range of blocks or a single block. The\n\
         \t     '{attr}' attribute (if present) is the checksum of\n\
         \t     this blocks range. -->\n\
         \t<BlockMap>\n",
        attr = header.checksum_attribute(),
    )
}
