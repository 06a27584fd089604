//! Hash algorithms and the persisted algorithm descriptor.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use md5::Md5;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Result, RingError};
use crate::hashspace;

/// The digest functions a ring can place keys with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha1,
    Md5,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 3] = [HashAlgorithm::Sha256, HashAlgorithm::Sha1, HashAlgorithm::Md5];

    /// Canonical lower-case name, as persisted in `algorithm.NAME`.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Md5 => "md5",
        }
    }

    pub fn digest_bits(self) -> u32 {
        match self {
            HashAlgorithm::Sha256 => 256,
            HashAlgorithm::Sha1 => 160,
            HashAlgorithm::Md5 => 128,
        }
    }

    /// Largest digest value, `2^bits - 1`.
    pub fn max(self) -> BigUint {
        (BigUint::one() << self.digest_bits()) - BigUint::one()
    }

    /// Digests `input` and reads the result as a big-endian unsigned integer.
    pub fn digest(self, input: &[u8]) -> BigUint {
        match self {
            HashAlgorithm::Sha256 => BigUint::from_bytes_be(&Sha256::digest(input)),
            HashAlgorithm::Sha1 => BigUint::from_bytes_be(&Sha1::digest(input)),
            HashAlgorithm::Md5 => BigUint::from_bytes_be(&Md5::digest(input)),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = RingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" | "sha-256" | "SHA256" | "SHA-256" => Ok(HashAlgorithm::Sha256),
            "sha1" | "sha-1" | "SHA1" | "SHA-1" => Ok(HashAlgorithm::Sha1),
            "md5" | "MD5" => Ok(HashAlgorithm::Md5),
            other => Err(RingError::Config(format!("algorithm {} is not supported", other))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Algorithm, hash-space maximum and per-vnode interval width of a ring.
///
/// Serialized as
/// `{"NAME": "sha256", "MAX": "<hex>", "VNODE_HASH_INTERVAL": "<hex>"}` with
/// upper-case hex. Immutable once the ring exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AlgorithmWire", into = "AlgorithmWire")]
pub struct AlgorithmDescriptor {
    algorithm: HashAlgorithm,
    max: BigUint,
    vnode_hash_interval: BigUint,
}

impl AlgorithmDescriptor {
    /// Builds the descriptor for a fresh ring of `vnodes` vnodes.
    pub fn new(algorithm: HashAlgorithm, vnodes: NonZeroU32) -> Result<Self> {
        let max = algorithm.max();
        let vnode_hash_interval = hashspace::vnode_hash_interval(&max, vnodes);
        if vnode_hash_interval.is_zero() {
            return Err(RingError::Config(format!(
                "{} vnodes do not fit in the {} hash space",
                vnodes, algorithm
            )));
        }
        Ok(Self {
            algorithm,
            max,
            vnode_hash_interval,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn max(&self) -> &BigUint {
        &self.max
    }

    pub fn vnode_hash_interval(&self) -> &BigUint {
        &self.vnode_hash_interval
    }
}

#[derive(Serialize, Deserialize)]
struct AlgorithmWire {
    #[serde(rename = "NAME")]
    name: String,
    #[serde(rename = "MAX")]
    max: String,
    #[serde(rename = "VNODE_HASH_INTERVAL")]
    vnode_hash_interval: String,
}

impl From<AlgorithmDescriptor> for AlgorithmWire {
    fn from(d: AlgorithmDescriptor) -> Self {
        Self {
            name: d.algorithm.name().to_string(),
            max: format!("{:X}", d.max),
            vnode_hash_interval: format!("{:X}", d.vnode_hash_interval),
        }
    }
}

impl TryFrom<AlgorithmWire> for AlgorithmDescriptor {
    type Error = RingError;

    fn try_from(w: AlgorithmWire) -> Result<Self> {
        let algorithm: HashAlgorithm = w.name.parse()?;
        let max = parse_hex("algorithm.MAX", &w.max)?;
        if max != algorithm.max() {
            return Err(RingError::Format(format!(
                "algorithm.MAX {} does not match {}",
                w.max, algorithm
            )));
        }
        let vnode_hash_interval = parse_hex("algorithm.VNODE_HASH_INTERVAL", &w.vnode_hash_interval)?;
        if vnode_hash_interval.is_zero() {
            return Err(RingError::Format(
                "algorithm.VNODE_HASH_INTERVAL must not be zero".to_string(),
            ));
        }
        Ok(Self {
            algorithm,
            max,
            vnode_hash_interval,
        })
    }
}

pub(crate) fn parse_hex(field: &str, s: &str) -> Result<BigUint> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| RingError::Format(format!("{} is not a hex number: {:?}", field, s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_parse() {
        for name in ["sha256", "sha-256", "SHA256", "SHA-256"] {
            assert_eq!(name.parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        }
        for name in ["sha1", "sha-1", "SHA1", "SHA-1"] {
            assert_eq!(name.parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        }
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
    }

    #[test]
    fn unsupported_algorithm_is_config_error() {
        let err = "crc32".parse::<HashAlgorithm>().unwrap_err();
        assert!(matches!(err, RingError::Config(_)));
    }

    #[test]
    fn max_matches_digest_width() {
        assert_eq!(format!("{:X}", HashAlgorithm::Md5.max()), "F".repeat(32));
        assert_eq!(format!("{:X}", HashAlgorithm::Sha1.max()), "F".repeat(40));
        assert_eq!(format!("{:X}", HashAlgorithm::Sha256.max()), "F".repeat(64));
    }

    #[test]
    fn digest_is_big_endian() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        let d = HashAlgorithm::Md5.digest(b"");
        assert_eq!(format!("{:x}", d), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn descriptor_json_shape() {
        let d = AlgorithmDescriptor::new(HashAlgorithm::Md5, NonZeroU32::new(2).unwrap()).unwrap();
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["NAME"], "md5");
        assert_eq!(v["MAX"], "F".repeat(32));
        assert_eq!(v["VNODE_HASH_INTERVAL"], format!("8{}", "0".repeat(31)));

        let back: AlgorithmDescriptor = serde_json::from_value(v).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn descriptor_accepts_lower_case_hex() {
        let json = format!(
            r#"{{"NAME":"md5","MAX":"{}","VNODE_HASH_INTERVAL":"4{}"}}"#,
            "f".repeat(32),
            "0".repeat(31)
        );
        let d: AlgorithmDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(d.vnode_hash_interval(), &(BigUint::one() << 126u32));
    }

    #[test]
    fn descriptor_rejects_bad_fields() {
        let bad_hex = r#"{"NAME":"md5","MAX":"zz","VNODE_HASH_INTERVAL":"1"}"#;
        assert!(serde_json::from_str::<AlgorithmDescriptor>(bad_hex).is_err());

        let wrong_max = r#"{"NAME":"md5","MAX":"FF","VNODE_HASH_INTERVAL":"1"}"#;
        assert!(serde_json::from_str::<AlgorithmDescriptor>(wrong_max).is_err());

        let missing = r#"{"NAME":"md5"}"#;
        assert!(serde_json::from_str::<AlgorithmDescriptor>(missing).is_err());
    }
}
