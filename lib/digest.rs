use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::{TarsinkError, TarsinkResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Algorithm prefix used in the string form of a digest.
pub const DIGEST_PREFIX: &str = "sha256:";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Content digest of a layer.
///
/// A `Digest` is the SHA-256 hash of a layer's canonical serialized bytes and doubles as the
/// layer's storage key. Two layers with identical logical content always hash to the same
/// digest, which is what makes cross-image deduplication sound.
///
/// The string form is `sha256:<lowercase hex>`; parsing accepts the hex with or without the
/// algorithm prefix.
///
/// ## Examples
///
/// ```
/// use std::str::FromStr;
/// use tarsink::Digest;
///
/// let digest = Digest::compute(b"layer bytes");
/// let parsed = Digest::from_str(&digest.to_string()).unwrap();
///
/// assert_eq!(digest, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Digest {
    /// Computes the digest of the given bytes.
    pub fn compute(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self::from_hasher(hasher)
    }

    /// Finalizes an incrementally fed hasher into a digest.
    pub(crate) fn from_hasher(hasher: Sha256) -> Self {
        Digest(hasher.finalize().into())
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the lowercase hex form without the algorithm prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Digest {
    type Err = TarsinkError;

    fn from_str(s: &str) -> TarsinkResult<Self> {
        let hex_part = s.strip_prefix(DIGEST_PREFIX).unwrap_or(s);
        let bytes = hex::decode(hex_part).map_err(|_| TarsinkError::InvalidDigest(s.into()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TarsinkError::InvalidDigest(s.into()))?;
        Ok(Digest(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DIGEST_PREFIX}{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_str(&s).map_err(serde::de::Error::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_compute_is_stable() {
        let a = Digest::compute(b"some layer bytes");
        let b = Digest::compute(b"some layer bytes");
        let c = Digest::compute(b"other layer bytes");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_digest_string_roundtrip() -> anyhow::Result<()> {
        let digest = Digest::compute(b"hello");

        let with_prefix = digest.to_string();
        assert!(with_prefix.starts_with(DIGEST_PREFIX));
        assert_eq!(Digest::from_str(&with_prefix)?, digest);

        // The bare hex form parses too.
        assert_eq!(Digest::from_str(&digest.to_hex())?, digest);

        Ok(())
    }

    #[test]
    fn test_digest_rejects_invalid_strings() {
        assert!(Digest::from_str("sha256:not-hex").is_err());
        assert!(Digest::from_str("abcd").is_err()); // wrong length
        assert!(Digest::from_str("").is_err());
    }
}
