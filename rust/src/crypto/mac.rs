//! Message authentication codes behind a small capability trait. The signer
//! only ever talks to [`MacFunction`], so the underlying primitive can be
//! swapped without touching call sites.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacError {
    #[error("mac key rejected: {0}")]
    InvalidKey(String),
    #[error("unknown mac algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// A keyed integrity primitive.
pub trait MacFunction: Send + Sync {
    /// Stable identifier, e.g. `hmac-sha256`.
    fn name(&self) -> &'static str;

    /// Length in bytes of every tag produced by [`MacFunction::compute`].
    fn output_len(&self) -> usize;

    fn compute(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, MacError>;

    /// Recomputes the tag and compares it with `tag` in constant time.
    fn verify(&self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<bool, MacError> {
        let expected = self.compute(key, data)?;
        Ok(constant_time_eq(&expected, tag))
    }
}

type HmacSha256Core = Hmac<Sha256>;
type HmacSha512Core = Hmac<Sha512>;

/// HMAC over SHA-256. This is what `cookie-signature` uses.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256;

impl MacFunction for HmacSha256 {
    fn name(&self) -> &'static str {
        MacAlgorithm::HmacSha256.as_str()
    }

    fn output_len(&self) -> usize {
        32
    }

    fn compute(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, MacError> {
        let mut mac = HmacSha256Core::new_from_slice(key)
            .map_err(|e| MacError::InvalidKey(format!("{e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha512;

impl MacFunction for HmacSha512 {
    fn name(&self) -> &'static str {
        MacAlgorithm::HmacSha512.as_str()
    }

    fn output_len(&self) -> usize {
        64
    }

    fn compute(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, MacError> {
        let mut mac = HmacSha512Core::new_from_slice(key)
            .map_err(|e| MacError::InvalidKey(format!("{e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Selects a built-in [`MacFunction`] by name, typically from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MacAlgorithm {
    #[default]
    #[serde(rename = "hmac-sha256")]
    HmacSha256,
    #[serde(rename = "hmac-sha512")]
    HmacSha512,
}

impl MacAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacAlgorithm::HmacSha256 => "hmac-sha256",
            MacAlgorithm::HmacSha512 => "hmac-sha512",
        }
    }

    pub fn mac_function(&self) -> Box<dyn MacFunction> {
        match self {
            MacAlgorithm::HmacSha256 => Box::new(HmacSha256),
            MacAlgorithm::HmacSha512 => Box::new(HmacSha512),
        }
    }
}

impl fmt::Display for MacAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MacAlgorithm {
    type Err = MacError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "hmac-sha256" => Ok(MacAlgorithm::HmacSha256),
            "hmac-sha512" => Ok(MacAlgorithm::HmacSha512),
            other => Err(MacError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Equality whose timing depends only on the lengths of the inputs.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
