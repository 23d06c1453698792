//! Content hashes declared on manifest sources.
//!
//! A hash is either a bare 64-digit hex string (SHA-256) or carries an
//! algorithm prefix: `sha256:<hex>` or `blake3:<hex>`. Digests are compared
//! in constant time.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::ResolutionError;

/// Digest length in bytes for both supported algorithms.
const DIGEST_LEN: usize = 32;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256, the default when no prefix is given.
    Sha256,
    /// BLAKE3 with a 32-byte output.
    Blake3,
}

impl HashAlgorithm {
    /// Prefix used in the textual form.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Digest `data` with this algorithm.
    #[must_use]
    pub fn digest(self, data: &[u8]) -> [u8; DIGEST_LEN] {
        match self {
            Self::Sha256 => Sha256::digest(data).into(),
            Self::Blake3 => *blake3::hash(data).as_bytes(),
        }
    }
}

/// A parsed content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    digest: [u8; DIGEST_LEN],
}

impl ContentHash {
    /// Parse a declared hash.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::InvalidHash`] for unknown prefixes, bad hex
    /// or a digest of the wrong length.
    pub fn parse(declared: &str) -> Result<Self, ResolutionError> {
        let invalid = |message: String| ResolutionError::InvalidHash {
            hash: declared.to_string(),
            message,
        };
        let trimmed = declared.trim();
        let (algorithm, hex_digest) = match trimmed.split_once(':') {
            Some(("sha256", rest)) => (HashAlgorithm::Sha256, rest),
            Some(("blake3", rest)) => (HashAlgorithm::Blake3, rest),
            Some((other, _)) => return Err(invalid(format!("unsupported algorithm {other:?}"))),
            None => (HashAlgorithm::Sha256, trimmed),
        };
        let bytes = hex::decode(hex_digest).map_err(|e| invalid(e.to_string()))?;
        let digest = <[u8; DIGEST_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            invalid(format!(
                "expected {DIGEST_LEN}-byte digest, got {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self { algorithm, digest })
    }

    /// Hash `data` with `algorithm`.
    #[must_use]
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            digest: algorithm.digest(data),
        }
    }

    /// Digest algorithm.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest without prefix.
    #[must_use]
    pub fn hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Check `data` against this hash in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::HashMismatch`] when the digests differ.
    pub fn verify(&self, data: &[u8]) -> Result<(), ResolutionError> {
        let actual = Self::compute(self.algorithm, data);
        if bool::from(actual.digest.as_slice().ct_eq(self.digest.as_slice())) {
            Ok(())
        } else {
            Err(ResolutionError::HashMismatch {
                expected: self.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.prefix(), self.hex())
    }
}

impl FromStr for ContentHash {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_bare_hex_is_sha256() {
        let hash = ContentHash::parse(HELLO_SHA256).unwrap();
        assert_eq!(hash.algorithm(), HashAlgorithm::Sha256);
        hash.verify(b"hello").unwrap();
        assert_eq!(hash.to_string(), format!("sha256:{HELLO_SHA256}"));
    }

    #[test]
    fn test_prefixed_forms() {
        ContentHash::parse(&format!("sha256:{HELLO_SHA256}"))
            .unwrap()
            .verify(b"hello")
            .unwrap();

        let blake = ContentHash::compute(HashAlgorithm::Blake3, b"hello");
        let parsed: ContentHash = blake.to_string().parse().unwrap();
        assert_eq!(parsed, blake);
        assert_eq!(parsed.hex(), blake3::hash(b"hello").to_hex().to_string());
    }

    #[test]
    fn test_hash_verification_mismatch() {
        let hash = ContentHash::parse(HELLO_SHA256).unwrap();
        let err = hash.verify(b"goodbye").unwrap_err();
        match err {
            ResolutionError::HashMismatch { expected, actual } => {
                assert!(expected.ends_with(HELLO_SHA256));
                assert_ne!(expected, actual);
            },
            other => panic!("expected HashMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_hashes() {
        for bad in ["md5:abcd", "sha256:zz", "abcd", ""] {
            assert!(
                matches!(
                    ContentHash::parse(bad),
                    Err(ResolutionError::InvalidHash { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }
}
