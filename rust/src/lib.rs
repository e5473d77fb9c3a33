//! Signed, tamper-evident tokens for opaque values, plus the cookie adapter
//! that carries them over `Cookie` / `Set-Cookie` headers. Secrets are always
//! passed in explicitly; nothing in this crate holds key material globally.

pub mod config;
pub mod cookies;
pub mod crypto;
pub mod logging;
pub mod signer;

pub use crypto::mac::{MacAlgorithm, MacFunction};
pub use crypto::secret::{Keyring, Secret};
pub use signer::{sign, verify, InvalidInputError, SignedValue, Signer, TokenFormat, VerificationFailure};
