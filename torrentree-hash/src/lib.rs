// File: torrentree-hash/src/lib.rs
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use sha3::Sha3_256;
use std::{fmt, str::FromStr};

pub const DIGEST_LEN: usize = 32; // 256-bit output

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid hex digest: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("digest must be {DIGEST_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("unknown hash algorithm {0:?}, expected \"sha256\" or \"sha3-256\"")]
    UnknownAlgorithm(String),
}

/// A 256-bit digest of a piece or of two concatenated child digests.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub const fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let arr: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated hex preview, e.g. `3a985da7...`.
    pub fn short(&self, hex_chars: usize) -> String {
        let full = self.to_hex();
        if hex_chars >= full.len() {
            return full;
        }
        format!("{}...", &full[..hex_chars])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short(16))
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Common interface over the digest functions used to hash pieces and tree nodes.
pub trait Hasher {
    fn digest(&self, data: &[u8]) -> Digest;

    /// Parent node digest: `digest(left || right)` over the raw digest bytes.
    fn digest_pair(&self, left: &Digest, right: &Digest) -> Digest {
        let mut buf = [0u8; 2 * DIGEST_LEN];
        buf[..DIGEST_LEN].copy_from_slice(left.as_bytes());
        buf[DIGEST_LEN..].copy_from_slice(right.as_bytes());
        self.digest(&buf)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "sha3-256")]
    Sha3_256,
}

impl Algorithm {
    pub const fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha3_256 => "sha3-256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Algorithm::Sha256),
            "sha3-256" | "sha3_256" | "sha3" => Ok(Algorithm::Sha3_256),
            _ => Err(Error::UnknownAlgorithm(s.to_owned())),
        }
    }
}

impl Hasher for Algorithm {
    fn digest(&self, data: &[u8]) -> Digest {
        match self {
            Algorithm::Sha256 => sha256(data),
            Algorithm::Sha3_256 => sha3_256(data),
        }
    }
}

#[inline]
pub fn sha256(data: &[u8]) -> Digest {
    Digest(Sha256::digest(data).into())
}

#[inline]
pub fn sha3_256(data: &[u8]) -> Digest {
    Digest(Sha3_256::digest(data).into())
}

/// Digest with the default algorithm (SHA-256).
#[inline]
pub fn digest(data: &[u8]) -> Digest {
    Algorithm::default().digest(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest(b"abc"), sha256(b"abc"));
    }

    #[test]
    fn sha3_256_known_vector() {
        assert_eq!(
            sha3_256(b"abc").to_hex(),
            "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532"
        );
        assert_eq!(Algorithm::Sha3_256.digest(b"abc"), sha3_256(b"abc"));
    }

    #[test]
    fn algorithms_differ_and_are_deterministic() {
        let a = Algorithm::Sha256.digest(b"piece");
        let b = Algorithm::Sha3_256.digest(b"piece");
        assert_ne!(a, b);
        assert_eq!(a, Algorithm::Sha256.digest(b"piece"));
    }

    #[test]
    fn digest_pair_hashes_concatenated_bytes() {
        let h = Algorithm::Sha256;
        let left = h.digest(b"left");
        let right = h.digest(b"right");
        let mut concat = left.as_bytes().to_vec();
        concat.extend_from_slice(right.as_bytes());
        assert_eq!(h.digest_pair(&left, &right), h.digest(&concat));
        // Order matters.
        assert_ne!(h.digest_pair(&left, &right), h.digest_pair(&right, &left));
    }

    #[test]
    fn hex_parse_and_short_preview() {
        let d = digest(b"hello");
        let parsed: Digest = d.to_hex().parse().unwrap();
        assert_eq!(parsed, d);
        assert_eq!(d.short(8), format!("{}...", &d.to_hex()[..8]));
        assert_eq!(d.short(64), d.to_hex());

        assert!(matches!("zz".parse::<Digest>(), Err(Error::InvalidHex(_))));
        assert_eq!(
            "zz".parse::<Digest>(),
            Err(Error::InvalidHex(hex::FromHexError::InvalidHexCharacter {
                c: 'z',
                index: 0
            }))
        );
        assert_eq!("abcd".parse::<Digest>(), Err(Error::InvalidLength(2)));
    }

    #[test]
    fn serde_uses_hex_strings() {
        let d = digest(b"hello");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.to_hex()));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);

        assert_eq!(serde_json::to_string(&Algorithm::Sha3_256).unwrap(), "\"sha3-256\"");
        let alg: Algorithm = serde_json::from_str("\"sha256\"").unwrap();
        assert_eq!(alg, Algorithm::Sha256);
    }

    #[test]
    fn algorithm_from_str() {
        assert_eq!("SHA256".parse::<Algorithm>().unwrap(), Algorithm::Sha256);
        assert_eq!("sha3-256".parse::<Algorithm>().unwrap(), Algorithm::Sha3_256);
        assert!(matches!("md5".parse::<Algorithm>(), Err(Error::UnknownAlgorithm(_))));
    }
}
