use std::fmt::{Display, Formatter};
use std::str::FromStr;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("unsupported integrity algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("invalid integrity value `{0}`")]
    InvalidValue(String),
    #[error("invalid hex checksum `{0}`")]
    InvalidHexChecksum(String),
    #[error("manifest has neither an integrity digest nor a legacy checksum")]
    Missing,
}

/// The digest algorithm of an [`Integrity`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityAlgorithm {
    Sha512,
    Sha1,
}

impl IntegrityAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha512 => "sha512",
            Self::Sha1 => "sha1",
        }
    }
}

/// A subresource-integrity style content digest, e.g. `sha512-deadbeef…` with the digest
/// base64-encoded. Used both as the content-addressable cache key and as a tamper check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Integrity {
    algorithm: IntegrityAlgorithm,
    bytes: Vec<u8>,
}

impl Integrity {
    pub fn from_sha512(digest: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm: IntegrityAlgorithm::Sha512,
            bytes: digest.into(),
        }
    }

    pub fn from_sha1(digest: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm: IntegrityAlgorithm::Sha1,
            bytes: digest.into(),
        }
    }

    /// Reinterpret a legacy hex-encoded SHA-1 checksum (`dist.shasum`) as an integrity value:
    /// the hex bytes re-encoded as base64 under the `sha1-` prefix.
    pub fn from_hex_shasum(shasum: &str) -> Result<Self, IntegrityError> {
        let bytes = hex::decode(shasum)
            .map_err(|_| IntegrityError::InvalidHexChecksum(shasum.to_string()))?;
        Ok(Self {
            algorithm: IntegrityAlgorithm::Sha1,
            bytes,
        })
    }

    pub fn algorithm(&self) -> IntegrityAlgorithm {
        self.algorithm
    }

    /// The raw digest bytes.
    pub fn digest(&self) -> &[u8] {
        &self.bytes
    }

    /// A filesystem-safe hex rendition of the digest, used for cache paths (the base64 form
    /// contains `/`).
    pub fn hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl Display for Integrity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.algorithm.as_str(),
            BASE64_STANDARD.encode(&self.bytes)
        )
    }
}

impl FromStr for Integrity {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((algorithm, value)) = s.split_once('-') else {
            return Err(IntegrityError::InvalidValue(s.to_string()));
        };
        let algorithm = match algorithm {
            "sha512" => IntegrityAlgorithm::Sha512,
            "sha1" => IntegrityAlgorithm::Sha1,
            other => return Err(IntegrityError::UnsupportedAlgorithm(other.to_string())),
        };
        let bytes = BASE64_STANDARD
            .decode(value)
            .map_err(|_| IntegrityError::InvalidValue(s.to_string()))?;
        Ok(Self { algorithm, bytes })
    }
}

impl From<Integrity> for String {
    fn from(integrity: Integrity) -> Self {
        integrity.to_string()
    }
}

impl TryFrom<String> for Integrity {
    type Error = IntegrityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
