use crate::checksum::{Checksum, ChecksumError, ChecksumKind};
use crate::document::{BmapDocument, DocumentError, DocumentParts};
use crate::range::{BlockRange, InvertedRangeError};
use crate::version::{Version, VersionError};
use crate::xml::{self, Element, XmlError};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use std::io::Read;
use std::num::ParseIntError;

use parse_error::*;

/// Highest bmap major version this parser understands.
pub const SUPPORTED_MAJOR_VERSION: u32 = 1;

/// Parses a bmap document from its XML text.
///
/// The `version` attribute is checked before anything else is interpreted:
/// a document with a major version above [`SUPPORTED_MAJOR_VERSION`] is
/// rejected as a whole, while unknown elements and attributes of a
/// supported major version are ignored.
///
/// # Example
///
/// ```
/// let doc = bmap_format::parse(
///     r#"<bmap version="1.2">
///         <ImageSize> 8192 </ImageSize>
///         <BlockSize> 4096 </BlockSize>
///         <BlocksCount> 2 </BlocksCount>
///         <BlockMap> <Range> 1 </Range> </BlockMap>
///         <MappedBlocksCount> 1 </MappedBlocksCount>
///     </bmap>"#,
/// )
/// .unwrap();
///
/// assert_eq!(doc.mapped_blocks_count(), 1);
/// ```
pub fn parse(text: &str) -> Result<BmapDocument, ParseError> {
    let root = xml::parse(text).context(NotWellFormedSnafu)?;

    ensure!(
        root.name() == "bmap",
        UnexpectedRootSnafu { name: root.name() }
    );

    let version_text = root.attribute("version").context(MissingVersionSnafu)?;
    let major =
        Version::parse_major(version_text).context(InvalidVersionSnafu { text: version_text })?;

    // The rest of the version string may change meaning with the major number.
    ensure!(
        major <= SUPPORTED_MAJOR_VERSION,
        UnsupportedVersionSnafu {
            supported: SUPPORTED_MAJOR_VERSION,
            found: version_text.trim(),
        }
    );

    let version: Version = version_text
        .parse()
        .context(InvalidVersionSnafu { text: version_text })?;

    let block_size = number(&root, "BlockSize")?;
    let blocks_count = number(&root, "BlocksCount")?;
    let mapped_blocks_count = number(&root, "MappedBlocksCount")?;

    // Format 1.0 has no ImageSize, the image is a whole number of blocks.
    let image_size = match root.child("ImageSize") {
        Some(_) => number(&root, "ImageSize")?,
        None => blocks_count.saturating_mul(block_size),
    };

    let declared_kind = match root.child("ChecksumType") {
        Some(e) => {
            let name = e.text().trim();
            Some(ChecksumKind::from_name(name).context(UnknownChecksumTypeSnafu { name })?)
        }
        None => None,
    };

    let block_map = root.child("BlockMap").context(MissingFieldSnafu {
        field: "BlockMap",
    })?;

    let mut ranges = Vec::new();

    for element in block_map.children().iter().filter(|e| e.name() == "Range") {
        ranges.push(range(element, declared_kind)?);
    }

    let checksum_kind = declared_kind.or_else(|| {
        ranges
            .iter()
            .find_map(|r| r.checksum().map(Checksum::kind))
    });

    BmapDocument::from_parts(DocumentParts {
        version,
        image_size,
        block_size,
        blocks_count,
        mapped_blocks_count,
        checksum_kind,
        ranges,
    })
    .context(InconsistentDocumentSnafu)
}

/// Reads the whole of `reader` and parses it with [`parse()`].
pub fn from_reader<R: Read>(mut reader: R) -> Result<BmapDocument, ParseError> {
    let mut text = String::new();

    reader.read_to_string(&mut text).context(ReadFailedSnafu)?;

    parse(&text)
}

fn number(root: &Element, field: &'static str) -> Result<u64, ParseError> {
    let text = root.child(field).context(MissingFieldSnafu { field })?.text().trim();

    text.parse().context(InvalidNumberSnafu { field, text })
}

fn range(element: &Element, declared_kind: Option<ChecksumKind>) -> Result<BlockRange, ParseError> {
    let text = element.text().trim();

    let (first, last) = match text.split_once('-') {
        Some((first, last)) => (first.trim(), last.trim()),
        None => (text, text),
    };

    let first: u64 = first.parse().context(InvalidRangeSyntaxSnafu { text })?;
    let last: u64 = last.parse().context(InvalidRangeSyntaxSnafu { text })?;

    let range = BlockRange::new(first, last).context(InvalidRangeSnafu { text })?;

    // Formats up to 1.2 name the attribute after the algorithm, later ones
    // use "chksum" together with the ChecksumType element.
    let checksum = if let Some(hex) = element.attribute("chksum") {
        Some((declared_kind.unwrap_or_default(), hex))
    } else {
        element.attribute("sha1").map(|hex| (ChecksumKind::Sha1, hex))
    };

    match checksum {
        Some((kind, hex)) => {
            let checksum = Checksum::from_hex(kind, hex).context(InvalidChecksumSnafu { text })?;
            Ok(range.with_checksum(checksum))
        }
        None => Ok(range),
    }
}

/// Coarse classification of a [`ParseError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Not well-formed, a required field is missing or has a bad value.
    Malformed,
    UnsupportedVersion,
    /// A range whose first block is after its last block.
    InvalidRange,
    /// The fields contradict each other, e.g. the mapped blocks count.
    Inconsistent,
    Io,
}

#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum ParseError {
    #[snafu(display("bmap is not a well-formed XML document"))]
    NotWellFormed { source: XmlError },

    #[snafu(display("unexpected root element <{name}>, expected <bmap>"))]
    UnexpectedRoot { name: String },

    #[snafu(display("bmap has no version attribute"))]
    MissingVersion,

    #[snafu(display("invalid bmap version '{text}'"))]
    InvalidVersion { text: String, source: VersionError },

    #[snafu(display(
        "only bmap format version up to {supported} is supported, version {found} is not supported"
    ))]
    UnsupportedVersion { supported: u32, found: String },

    #[snafu(display("bmap has no <{field}> element"))]
    MissingField { field: &'static str },

    #[snafu(display("<{field}> has an invalid value '{text}'"))]
    InvalidNumber {
        field: &'static str,
        text: String,
        source: ParseIntError,
    },

    #[snafu(display("unknown checksum type '{name}'"))]
    UnknownChecksumType { name: String },

    #[snafu(display("invalid checksum for range '{text}'"))]
    InvalidChecksum { text: String, source: ChecksumError },

    #[snafu(display("invalid block range '{text}'"))]
    InvalidRangeSyntax { text: String, source: ParseIntError },

    #[snafu(display("invalid block range '{text}'"))]
    InvalidRange {
        text: String,
        source: InvertedRangeError,
    },

    #[snafu(display("inconsistent bmap"))]
    InconsistentDocument { source: DocumentError },

    #[snafu(display("cannot read bmap"))]
    ReadFailed { source: std::io::Error },
}

impl ParseError {
    #[must_use]
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            Self::UnsupportedVersion { .. } => ParseErrorKind::UnsupportedVersion,
            Self::InvalidRange { .. } => ParseErrorKind::InvalidRange,
            Self::InconsistentDocument { .. } => ParseErrorKind::Inconsistent,
            Self::ReadFailed { .. } => ParseErrorKind::Io,
            _ => ParseErrorKind::Malformed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA1_ABC: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

    fn bmap_text(version: &str, extra: &str, ranges: &str, mapped: u64) -> String {
        format!(
            r#"<?xml version="1.0" ?>
<bmap version="{version}">
    <ImageSize> 8388608 </ImageSize>
    <BlockSize> 4096 </BlockSize>
    <BlocksCount> 2048 </BlocksCount>
    {extra}
    <BlockMap>
        {ranges}
    </BlockMap>
    <MappedBlocksCount> {mapped} </MappedBlocksCount>
</bmap>"#
        )
    }

    #[test]
    fn test_parse_ranges() {
        let text = bmap_text(
            "1.2",
            "",
            &format!(r#"<Range sha1="{SHA1_ABC}"> 0-99 </Range> <Range> 2000 - 2047 </Range> <Range>2048</Range>"#),
            149,
        );
        // 2048 is out of bounds for 2048 blocks.
        let err = parse(&text).unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::Inconsistent);

        let text = bmap_text(
            "1.2",
            "",
            &format!(r#"<Range sha1="{SHA1_ABC}"> 0-99 </Range> <Range> 2000 - 2047 </Range>"#),
            148,
        );
        let doc = parse(&text).unwrap();
        assert_eq!(doc.version(), Version::new(1, 2));
        assert_eq!(doc.ranges().len(), 2);
        assert_eq!(doc.ranges()[0].checksum().unwrap().to_string(), SHA1_ABC);
        assert_eq!((doc.ranges()[1].first(), doc.ranges()[1].last()), (2000, 2047));
        assert!(doc.ranges()[1].checksum().is_none());
        assert_eq!(doc.checksum_kind(), Some(ChecksumKind::Sha1));
    }

    #[test]
    fn test_version_gate() {
        let err = parse(&bmap_text("2.0", "", "", 0)).unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::UnsupportedVersion);
        assert!(matches!(
            err,
            ParseError::UnsupportedVersion {
                supported: 1,
                found
            } if found == "2.0"
        ));

        let err = parse(r#"<bmap version="2.beta"><Whatever/></bmap>"#).unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::UnsupportedVersion);

        // Checked before the fields, so a future layout is not misread.
        let err = parse(r#"<bmap version="3.1"><Whatever/></bmap>"#).unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::UnsupportedVersion);

        let doc = parse(&bmap_text(
            "1.99",
            "<FutureField attr='x'>data</FutureField>",
            r#"<Range future="yes"> 5 </Range>"#,
            1,
        ))
        .unwrap();
        assert_eq!(doc.version(), Version::new(1, 99));
        assert_eq!(doc.ranges()[0].block_count(), 1);
    }

    #[test]
    fn test_inverted_range() {
        let err = parse(&bmap_text("1.2", "", "<Range> 10-5 </Range>", 0)).unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::InvalidRange);
    }

    #[test]
    fn test_mapped_count_mismatch() {
        let err = parse(&bmap_text("1.2", "", "<Range> 0-99 </Range>", 101)).unwrap_err();
        assert!(matches!(
            err,
            ParseError::InconsistentDocument {
                source: DocumentError::MappedCountMismatch {
                    declared: 101,
                    counted: 100
                }
            }
        ));
    }

    #[test]
    fn test_chksum_with_type() {
        let sha256 = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        let doc = parse(&bmap_text(
            "1.4",
            "<ChecksumType> sha256 </ChecksumType>",
            &format!(r#"<Range chksum="{sha256}"> 1-2 </Range>"#),
            2,
        ))
        .unwrap();
        assert_eq!(doc.checksum_kind(), Some(ChecksumKind::Sha256));
        assert_eq!(doc.ranges()[0].checksum().unwrap().kind(), ChecksumKind::Sha256);

        // A SHA-1 digest does not fit a SHA-256 document.
        let err = parse(&bmap_text(
            "1.4",
            "<ChecksumType> sha256 </ChecksumType>",
            &format!(r#"<Range chksum="{SHA1_ABC}"> 1-2 </Range>"#),
            2,
        ))
        .unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::Malformed);

        let err = parse(&bmap_text("1.4", "<ChecksumType> md5 </ChecksumType>", "", 0)).unwrap_err();
        assert!(matches!(err, ParseError::UnknownChecksumType { .. }));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            parse("<bmap version='1.0'>"),
            Err(ParseError::NotWellFormed { .. })
        ));
        assert!(matches!(
            parse("<bmap><BlockSize>1</BlockSize></bmap>"),
            Err(ParseError::MissingVersion)
        ));
        assert!(matches!(
            parse("<bmap version='1.0'><BlockSize>x</BlockSize></bmap>"),
            Err(ParseError::InvalidNumber {
                field: "BlockSize",
                ..
            })
        ));
        assert!(matches!(
            parse(&bmap_text("1.2", "", "<Range> a-b </Range>", 0)),
            Err(ParseError::InvalidRangeSyntax { .. })
        ));
        assert!(matches!(
            parse("<map version='1.0'/>"),
            Err(ParseError::UnexpectedRoot { .. })
        ));
    }

    #[test]
    fn test_spare_blocks_past_image_end() {
        let doc = parse(
            "<bmap version='1.4'>
                <ImageSize> 4096 </ImageSize>
                <BlockSize> 4096 </BlockSize>
                <BlocksCount> 2 </BlocksCount>
                <MappedBlocksCount> 1 </MappedBlocksCount>
                <BlockMap><Range> 0 </Range></BlockMap>
            </bmap>",
        )
        .unwrap();

        assert_eq!(doc.blocks_count(), 2);
        assert_eq!(doc.ranges()[0].byte_span(doc.block_size(), doc.image_size()), (0, 4096));
    }

    #[test]
    fn test_without_image_size() {
        let doc = parse(
            "<bmap version='1.0'>
                <BlockSize> 4096 </BlockSize>
                <BlocksCount> 4 </BlocksCount>
                <MappedBlocksCount> 4 </MappedBlocksCount>
                <BlockMap><Range> 0-3 </Range></BlockMap>
            </bmap>",
        )
        .unwrap();
        assert_eq!(doc.image_size(), 4 * 4096);
    }
}
