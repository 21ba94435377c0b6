use sha1::Sha1;
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu, ensure};
use std::fmt::{Display, Formatter};

/// Errors when decoding a hex-encoded checksum.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ChecksumError {
    #[snafu(display("checksum is not valid hex"))]
    InvalidHex { source: hex::FromHexError },

    #[snafu(display("{kind} checksum must be {expected} bytes, found {found}"))]
    WrongLength {
        kind: ChecksumKind,
        expected: usize,
        found: usize,
    },
}

/// Digest algorithm used for block range checksums.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChecksumKind {
    #[default]
    Sha1,
    Sha256,
}

impl ChecksumKind {
    /// Returns the digest length in bytes.
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Returns the name used by the `ChecksumType` element.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Looks up a kind by its `ChecksumType` name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("sha1") {
            Some(Self::Sha1)
        } else if name.eq_ignore_ascii_case("sha256") {
            Some(Self::Sha256)
        } else {
            None
        }
    }

    pub fn hasher(self) -> ChecksumHasher {
        ChecksumHasher::new(self)
    }
}

impl Display for ChecksumKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A digest of one block range.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Checksum {
    kind: ChecksumKind,
    digest: Vec<u8>,
}

impl Checksum {
    /// Decodes a hex string, checking its length against `kind`.
    pub fn from_hex(kind: ChecksumKind, text: &str) -> Result<Self, ChecksumError> {
        let digest = hex::decode(text.trim()).context(InvalidHexSnafu)?;

        ensure!(
            digest.len() == kind.digest_len(),
            WrongLengthSnafu {
                kind,
                expected: kind.digest_len(),
                found: digest.len(),
            }
        );

        Ok(Self { kind, digest })
    }

    #[must_use]
    pub fn kind(&self) -> ChecksumKind {
        self.kind
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.digest
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.digest))
    }
}

/// Incremental hasher producing a [`Checksum`].
#[derive(Clone)]
pub enum ChecksumHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl ChecksumHasher {
    pub fn new(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::Sha1 => Self::Sha1(Sha1::new()),
            ChecksumKind::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        match self {
            Self::Sha1(h) => Checksum {
                kind: ChecksumKind::Sha1,
                digest: h.finalize().to_vec(),
            },
            Self::Sha256(h) => Checksum {
                kind: ChecksumKind::Sha256,
                digest: h.finalize().to_vec(),
            },
        }
    }
}

impl std::fmt::Debug for ChecksumHasher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Sha1(_) => ChecksumKind::Sha1,
            Self::Sha256(_) => ChecksumKind::Sha256,
        };

        f.debug_tuple("ChecksumHasher").field(&kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_value() {
        let mut hasher = ChecksumKind::Sha1.hasher();
        hasher.update(b"a");
        hasher.update(b"bc");
        let sum = hasher.finalize();
        assert_eq!(sum.to_string(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_sha256_known_value() {
        let mut hasher = ChecksumKind::Sha256.hasher();
        hasher.update(b"abc");
        let sum = hasher.finalize();
        assert_eq!(
            sum.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_from_hex_checks_length() {
        let err = Checksum::from_hex(ChecksumKind::Sha256, "a9993e364706816aba3e25717850c26c9cd0d89d")
            .unwrap_err();
        assert!(matches!(
            err,
            ChecksumError::WrongLength {
                expected: 32,
                found: 20,
                ..
            }
        ));
        assert!(matches!(
            Checksum::from_hex(ChecksumKind::Sha1, "zz"),
            Err(ChecksumError::InvalidHex { .. })
        ));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ChecksumKind::from_name("SHA256"), Some(ChecksumKind::Sha256));
        assert_eq!(ChecksumKind::from_name("md5"), None);
        assert_eq!(ChecksumKind::Sha1.to_string(), "sha1");
    }
}
