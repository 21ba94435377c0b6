use snafu::{ResultExt, Snafu, ensure};
use std::fmt::{Display, Formatter};
use std::num::ParseIntError;
use std::str::FromStr;

/// Errors when parsing a `MAJOR.MINOR` version string.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum VersionError {
    #[snafu(display("version string is empty"))]
    Empty,

    #[snafu(display("invalid version component in '{text}'"))]
    InvalidComponent { text: String, source: ParseIntError },
}

/// A bmap format version.
///
/// The major number is increased on incompatible changes, the minor number on
/// compatible ones (e.g. a new optional attribute). A missing minor number is
/// read as `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    major: u32,
    minor: u32,
}

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    #[must_use]
    pub const fn major(&self) -> u32 {
        self.major
    }

    #[must_use]
    pub const fn minor(&self) -> u32 {
        self.minor
    }

    /// Reads only the major number of a version string, ignoring whatever
    /// follows the first dot.
    pub fn parse_major(s: &str) -> Result<u32, VersionError> {
        let text = s.trim();

        ensure!(!text.is_empty(), EmptySnafu);

        let major = text.split_once('.').map_or(text, |(major, _)| major);

        major.parse().context(InvalidComponentSnafu { text })
    }

    /// Returns `true` if a reader understanding major versions up to
    /// `max_major` can read this version.
    #[must_use]
    pub const fn is_readable_by(&self, max_major: u32) -> bool {
        self.major <= max_major
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();

        ensure!(!text.is_empty(), EmptySnafu);

        let (major, minor) = match text.split_once('.') {
            Some((major, minor)) => (major, Some(minor)),
            None => (text, None),
        };

        let major = major.parse().context(InvalidComponentSnafu { text })?;
        let minor = match minor {
            Some(v) => v.parse().context(InvalidComponentSnafu { text })?,
            None => 0,
        };

        Ok(Self { major, minor })
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
