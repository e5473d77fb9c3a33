//! Secret key material for signing. A [`Secret`] is opaque: it can be built
//! from raw bytes, the environment, a key file, or a passphrase, but its bytes
//! never show up in `Debug` output and are wiped when it is dropped.

use std::fmt;
use std::fs;
use std::path::Path;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Length of secrets produced by generation, passphrase derivation, and HKDF.
pub const DERIVED_KEY_LEN: usize = 32;

/// Upper bound for [`Secret::generate`].
pub const MAX_GENERATED_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret must not be empty")]
    Empty,
    #[error("secret length {0} exceeds the maximum of {1} bytes")]
    TooLong(usize, usize),
    #[error("keyring must contain at least one secret")]
    EmptyKeyring,
    #[error("argon2 derivation failed: {0}")]
    DerivationFailed(String),
    #[error("hkdf expansion failed: {0}")]
    HkdfFailed(String),
    #[error("key source unreadable: {0}")]
    KeySourceUnreadable(String),
    #[error("base64 decoding failed: {0}")]
    Base64DecodeFailed(String),
}

/// Opaque key material held for the lifetime of the process.
#[derive(Clone)]
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    pub fn new(bytes: impl AsRef<[u8]>) -> Result<Self, SecretError> {
        let bytes = bytes.as_ref();
        if bytes.is_empty() {
            return Err(SecretError::Empty);
        }
        Ok(Self { bytes: bytes.to_vec() })
    }

    /// Fills a new secret of `len` bytes from the operating system RNG.
    pub fn generate(len: usize) -> Result<Self, SecretError> {
        if len == 0 {
            return Err(SecretError::Empty);
        }
        if len > MAX_GENERATED_LEN {
            return Err(SecretError::TooLong(len, MAX_GENERATED_LEN));
        }
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Ok(Self { bytes })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let mut decoded = STANDARD_NO_PAD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| SecretError::Base64DecodeFailed(format!("{e}")))?;
        let secret = Self::new(&decoded);
        decoded.zeroize();
        secret
    }

    /// Reads a base64-encoded key from an environment variable.
    pub fn from_env_var(var: &str) -> Result<Self, SecretError> {
        let mut encoded =
            std::env::var(var).map_err(|e| SecretError::KeySourceUnreadable(format!("{var}: {e}")))?;
        let secret = Self::from_base64(&encoded);
        encoded.zeroize();
        secret
    }

    /// Uses the literal value of an environment variable as the key, the way
    /// `cookieParser("super secret")` treats its argument.
    pub fn from_plain_env_var(var: &str) -> Result<Self, SecretError> {
        let mut value =
            std::env::var(var).map_err(|e| SecretError::KeySourceUnreadable(format!("{var}: {e}")))?;
        let secret = Self::new(value.as_bytes());
        value.zeroize();
        secret
    }

    /// Reads a base64-encoded key from disk.
    pub fn from_key_file(path: &Path) -> Result<Self, SecretError> {
        let mut content = fs::read_to_string(path)
            .map_err(|e| SecretError::KeySourceUnreadable(format!("{}: {e}", path.display())))?;
        let secret = Self::from_base64(&content);
        content.zeroize();
        secret
    }

    /// Derives a key from a passphrase using Argon2id. The salt must be unique
    /// per deployment and stored next to the configuration.
    pub fn derive_from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, SecretError> {
        let params = Params::new(19 * 1024, 3, 1, Some(DERIVED_KEY_LEN))
            .map_err(|e| SecretError::DerivationFailed(format!("{e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = [0u8; DERIVED_KEY_LEN];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut output)
            .map_err(|e| SecretError::DerivationFailed(format!("{e}")))?;

        let secret = Self::new(output);
        output.zeroize();
        secret
    }

    /// HKDF-SHA256 subkey bound to `info`, so one master secret can key
    /// several independent cookie families.
    pub fn derive_subkey(&self, info: &[u8]) -> Result<Self, SecretError> {
        let hk = Hkdf::<Sha256>::new(None, &self.bytes);
        let mut okm = vec![0u8; DERIVED_KEY_LEN];
        hk.expand(info, &mut okm)
            .map_err(|e| SecretError::HkdfFailed(format!("{e}")))?;
        Ok(Self { bytes: okm })
    }

    pub fn expose_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.bytes.len())
            .field("bytes", &"<redacted>")
            .finish()
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        crate::crypto::mac::constant_time_eq(&self.bytes, &other.bytes)
    }
}

impl Eq for Secret {}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Ordered set of secrets. The first one signs; all of them verify, which
/// lets a deployment rotate keys without invalidating cookies in flight.
#[derive(Debug, Clone)]
pub struct Keyring {
    secrets: Vec<Secret>,
}

impl Keyring {
    pub fn new(secrets: Vec<Secret>) -> Result<Self, SecretError> {
        if secrets.is_empty() {
            return Err(SecretError::EmptyKeyring);
        }
        Ok(Self { secrets })
    }

    pub fn single(secret: Secret) -> Self {
        Self { secrets: vec![secret] }
    }

    pub fn primary(&self) -> &Secret {
        &self.secrets[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Secret> {
        self.secrets.iter()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Keyring, Secret, SecretError, DERIVED_KEY_LEN, MAX_GENERATED_LEN};
    use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn rejects_empty_secrets() {
        assert!(matches!(Secret::new(b""), Err(SecretError::Empty)));
        assert!(matches!(Secret::generate(0), Err(SecretError::Empty)));
        assert!(matches!(Keyring::new(Vec::new()), Err(SecretError::EmptyKeyring)));
    }

    #[test]
    fn caps_generated_secret_length() {
        let largest = Secret::generate(MAX_GENERATED_LEN).expect("maximum length is allowed");
        assert_eq!(largest.len(), MAX_GENERATED_LEN);
        assert!(matches!(
            Secret::generate(MAX_GENERATED_LEN + 1),
            Err(SecretError::TooLong(1025, 1024))
        ));
        assert!(matches!(Secret::generate(usize::MAX), Err(SecretError::TooLong(_, _))));
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = Secret::new("super secret").expect("valid secret");
        let printed = format!("{secret:?}");
        assert!(!printed.contains("super"));
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("12"));
    }

    #[test]
    fn generates_distinct_secrets() {
        let a = Secret::generate(DERIVED_KEY_LEN).expect("generate");
        let b = Secret::generate(DERIVED_KEY_LEN).expect("generate");
        assert_eq!(a.len(), DERIVED_KEY_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn reads_base64_from_env_and_plain_env() {
        std::env::set_var("COOKIE_SIGNER_TEST_B64_KEY", STANDARD_NO_PAD.encode([9u8; 32]));
        let secret = Secret::from_env_var("COOKIE_SIGNER_TEST_B64_KEY").expect("key should load");
        assert_eq!(secret.expose_bytes(), &[9u8; 32]);

        std::env::set_var("COOKIE_SIGNER_TEST_PLAIN_KEY", "super secret");
        let plain = Secret::from_plain_env_var("COOKIE_SIGNER_TEST_PLAIN_KEY").expect("plain key");
        assert_eq!(plain.expose_bytes(), b"super secret");

        let err = Secret::from_env_var("COOKIE_SIGNER_TEST_UNSET_KEY").unwrap_err();
        assert!(format!("{err}").contains("key source unreadable"));
    }

    #[test]
    fn reads_key_file_with_trailing_newline() {
        let file = NamedTempFile::new().expect("temp file");
        fs::write(file.path(), format!("{}\n", STANDARD_NO_PAD.encode([3u8; 16]))).unwrap();
        let secret = Secret::from_key_file(file.path()).expect("key file should load");
        assert_eq!(secret.expose_bytes(), &[3u8; 16]);
        assert_eq!(Secret::from_base64(&secret.to_base64()).unwrap(), secret);
    }

    #[test]
    fn rejects_malformed_base64() {
        let err = Secret::from_base64("not base64!").unwrap_err();
        assert!(matches!(err, SecretError::Base64DecodeFailed(_)));
    }

    #[test]
    fn derives_key_from_passphrase() {
        let salt = b"static-test-salt-123";
        let a = Secret::derive_from_passphrase("pa55phrase", salt).expect("derivation should succeed");
        let b = Secret::derive_from_passphrase("pa55phrase", salt).expect("derivation should succeed");
        let c = Secret::derive_from_passphrase("other", salt).expect("derivation should succeed");
        assert_eq!(a.len(), DERIVED_KEY_LEN);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn subkeys_are_bound_to_their_context() {
        let master = Secret::new("master").unwrap();
        let session = master.derive_subkey(b"session").expect("hkdf");
        let csrf = master.derive_subkey(b"csrf").expect("hkdf");
        assert_eq!(session.len(), DERIVED_KEY_LEN);
        assert_ne!(session, csrf);
        assert_eq!(session, master.derive_subkey(b"session").unwrap());
    }

    #[test]
    fn keyring_signs_with_first_secret() {
        let keyring = Keyring::new(vec![
            Secret::new("new").unwrap(),
            Secret::new("old").unwrap(),
        ])
        .expect("keyring");
        assert_eq!(keyring.primary().expose_bytes(), b"new");
        assert_eq!(keyring.len(), 2);
        let lengths: Vec<usize> = keyring.iter().map(Secret::len).collect();
        assert_eq!(lengths, vec![3, 3]);
    }
}
