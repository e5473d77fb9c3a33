//! Issues and verifies tamper-evident tokens.
//!
//! A token is `encode(payload) "." encode(mac(payload, secret))`. Two encodings
//! are supported: [`TokenFormat::Compact`] escapes the payload with base64url
//! so any bytes can be signed, and [`TokenFormat::Express`] leaves the payload
//! raw and is byte-compatible with the `cookie-signature` package.
//!
//! Verification never panics and never raises; an untrusted token simply
//! produces a [`VerificationFailure`] that callers treat as unauthenticated.

use std::fmt;

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::mac::{MacAlgorithm, MacFunction};
use crate::crypto::secret::{Keyring, Secret};

pub const SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInputError {
    #[error("payload contains the reserved separator '{0}' and the token format does not escape it")]
    ReservedSeparator(char),
    #[error("payload is not valid UTF-8 (invalid byte at offset {0}) and the token format does not escape it")]
    NotUtf8(usize),
    #[error("cookie name {0:?} is not a valid token")]
    InvalidCookieName(String),
    #[error("mac function rejected the secret: {0}")]
    KeyRejected(String),
}

/// Why a token could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("no token supplied")]
    Absent,
    #[error("token is malformed: {0}")]
    Malformed(&'static str),
    #[error("signature does not match")]
    Mismatch,
}

/// How payload and signature are rendered inside a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenFormat {
    /// base64url payload and signature, no padding.
    #[default]
    Compact,
    /// Raw UTF-8 payload without `.`, standard base64 signature with `=`
    /// stripped. The cookie layer percent-encodes the token on the wire.
    Express,
}

/// A token split into its parts. Nothing about it is trusted until
/// [`Signer::verify`] has checked the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedValue {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

pub struct Signer {
    mac: Box<dyn MacFunction>,
    format: TokenFormat,
}

impl Signer {
    pub fn new(mac: impl MacFunction + 'static, format: TokenFormat) -> Self {
        Self {
            mac: Box::new(mac),
            format,
        }
    }

    pub fn for_algorithm(algorithm: MacAlgorithm, format: TokenFormat) -> Self {
        Self {
            mac: algorithm.mac_function(),
            format,
        }
    }

    /// HMAC-SHA256 with raw payloads, matching `cookie-parser`.
    pub fn express() -> Self {
        Self::for_algorithm(MacAlgorithm::HmacSha256, TokenFormat::Express)
    }

    pub fn format(&self) -> TokenFormat {
        self.format
    }

    pub fn mac_name(&self) -> &'static str {
        self.mac.name()
    }

    pub fn sign(&self, payload: impl AsRef<[u8]>, secret: &Secret) -> Result<String, InvalidInputError> {
        let payload = payload.as_ref();
        let encoded_payload = self.encode_payload(payload)?;
        let signature = self
            .mac
            .compute(secret.expose_bytes(), payload)
            .map_err(|e| InvalidInputError::KeyRejected(format!("{e}")))?;

        let encoded_signature = match self.format {
            TokenFormat::Compact => URL_SAFE_NO_PAD.encode(&signature),
            TokenFormat::Express => STANDARD_NO_PAD.encode(&signature),
        };

        let mut token = String::with_capacity(encoded_payload.len() + 1 + encoded_signature.len());
        token.push_str(&encoded_payload);
        token.push(SEPARATOR);
        token.push_str(&encoded_signature);
        Ok(token)
    }

    pub fn sign_str(&self, payload: &str, secret: &Secret) -> Result<String, InvalidInputError> {
        self.sign(payload.as_bytes(), secret)
    }

    /// Signs with the keyring's primary secret.
    pub fn sign_with(&self, payload: impl AsRef<[u8]>, keyring: &Keyring) -> Result<String, InvalidInputError> {
        self.sign(payload, keyring.primary())
    }

    /// Decodes a token into payload and signature without checking the
    /// signature.
    pub fn split(&self, token: &str) -> Result<SignedValue, VerificationFailure> {
        if token.is_empty() {
            return Err(VerificationFailure::Absent);
        }

        let (payload, signature) = match self.format {
            TokenFormat::Compact => {
                let mut parts = token.split(SEPARATOR);
                let (Some(payload), Some(signature), None) = (parts.next(), parts.next(), parts.next()) else {
                    return Err(VerificationFailure::Malformed("expected exactly one separator"));
                };
                let payload = URL_SAFE_NO_PAD
                    .decode(payload)
                    .map_err(|_| VerificationFailure::Malformed("payload is not base64url"))?;
                let signature = URL_SAFE_NO_PAD
                    .decode(signature)
                    .map_err(|_| VerificationFailure::Malformed("signature is not base64url"))?;
                (payload, signature)
            }
            TokenFormat::Express => {
                let Some((payload, signature)) = token.rsplit_once(SEPARATOR) else {
                    return Err(VerificationFailure::Malformed("missing separator"));
                };
                let signature = STANDARD_NO_PAD
                    .decode(signature)
                    .map_err(|_| VerificationFailure::Malformed("signature is not base64"))?;
                (payload.as_bytes().to_vec(), signature)
            }
        };

        if signature.len() != self.mac.output_len() {
            return Err(VerificationFailure::Malformed("signature has the wrong length"));
        }

        Ok(SignedValue { payload, signature })
    }

    pub fn verify(&self, token: &str, secret: &Secret) -> Result<Vec<u8>, VerificationFailure> {
        let signed = self.split(token).map_err(|failure| self.rejected(failure))?;
        if self.matches(&signed, secret) {
            Ok(signed.payload)
        } else {
            Err(self.rejected(VerificationFailure::Mismatch))
        }
    }

    /// Like [`Signer::verify`], reporting a payload that is not UTF-8 as
    /// malformed.
    pub fn verify_str(&self, token: &str, secret: &Secret) -> Result<String, VerificationFailure> {
        let payload = self.verify(token, secret)?;
        String::from_utf8(payload).map_err(|_| self.rejected(VerificationFailure::Malformed("payload is not UTF-8")))
    }

    /// Tries every secret in the keyring, in order.
    pub fn verify_with(&self, token: &str, keyring: &Keyring) -> Result<Vec<u8>, VerificationFailure> {
        let signed = self.split(token).map_err(|failure| self.rejected(failure))?;
        for (index, secret) in keyring.iter().enumerate() {
            if self.matches(&signed, secret) {
                if index > 0 {
                    debug!(key_index = index, "token verified with a non-primary key");
                }
                return Ok(signed.payload);
            }
        }
        Err(self.rejected(VerificationFailure::Mismatch))
    }

    fn matches(&self, signed: &SignedValue, secret: &Secret) -> bool {
        // A key the mac refuses cannot have produced the signature.
        self.mac
            .verify(secret.expose_bytes(), &signed.payload, &signed.signature)
            .unwrap_or(false)
    }

    fn rejected(&self, failure: VerificationFailure) -> VerificationFailure {
        debug!(reason = %failure, algorithm = self.mac.name(), "token verification failed");
        failure
    }

    fn encode_payload(&self, payload: &[u8]) -> Result<String, InvalidInputError> {
        match self.format {
            TokenFormat::Compact => Ok(URL_SAFE_NO_PAD.encode(payload)),
            TokenFormat::Express => {
                let text = std::str::from_utf8(payload)
                    .map_err(|e| InvalidInputError::NotUtf8(e.valid_up_to()))?;
                if text.contains(SEPARATOR) {
                    return Err(InvalidInputError::ReservedSeparator(SEPARATOR));
                }
                Ok(text.to_string())
            }
        }
    }
}

impl Default for Signer {
    fn default() -> Self {
        Self::for_algorithm(MacAlgorithm::default(), TokenFormat::default())
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("mac", &self.mac.name())
            .field("format", &self.format)
            .finish()
    }
}

/// Signs `payload` with the default signer (HMAC-SHA256, compact tokens).
pub fn sign(payload: impl AsRef<[u8]>, secret: &Secret) -> Result<String, InvalidInputError> {
    Signer::default().sign(payload, secret)
}

/// Verifies a token produced by [`sign`].
pub fn verify(token: &str, secret: &Secret) -> Result<Vec<u8>, VerificationFailure> {
    Signer::default().verify(token, secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::mac::HmacSha512;

    fn secret(value: &str) -> Secret {
        Secret::new(value).expect("valid secret")
    }

    #[test]
    fn signs_and_verifies_key_val() {
        let token = sign("key=val", &secret("super secret")).expect("sign should succeed");
        assert_eq!(token, "a2V5PXZhbA.KdiPFwJTHMZ0rROFcQgq-Cd5tc2Cu5TVgAPMVnoMv0U");
        assert_eq!(verify(&token, &secret("super secret")).unwrap(), b"key=val");
        assert_eq!(verify(&token, &secret("wrong")), Err(VerificationFailure::Mismatch));
    }

    #[test]
    fn signing_is_deterministic() {
        let signer = Signer::default();
        let key = secret("super secret");
        assert_eq!(signer.sign(b"payload", &key).unwrap(), signer.sign(b"payload", &key).unwrap());
    }

    #[test]
    fn express_tokens_match_cookie_signature() {
        let signer = Signer::express();
        let token = signer.sign_str("hello", &secret("tobiiscool")).unwrap();
        assert_eq!(token, "hello.DGDUkGlIkCzPz+C0B064FNgHdEjox7ch8tOBGslZ5QI");
        assert_eq!(signer.verify_str(&token, &secret("tobiiscool")).unwrap(), "hello");
        assert_eq!(
            signer.verify_str(&token, &secret("luna")),
            Err(VerificationFailure::Mismatch)
        );
    }

    #[test]
    fn express_verification_splits_on_last_separator() {
        let signer = Signer::express();
        let key = secret("super secret");
        let token = signer.sign_str("val", &key).unwrap();
        assert_eq!(token, "val.CZJ1mfE/hLaXbes6WVBa4ln5hofBZZY+DQM/oZvnGQE");

        let dotted = format!("a.{token}");
        assert_eq!(signer.verify(&dotted, &key), Err(VerificationFailure::Mismatch));
    }

    #[test]
    fn raw_payloads_must_not_contain_the_separator() {
        let signer = Signer::express();
        let key = secret("super secret");
        assert_eq!(
            signer.sign_str("a.b", &key),
            Err(InvalidInputError::ReservedSeparator('.'))
        );
        assert_eq!(
            signer.sign_str(r#"{"a":1.5}"#, &key),
            Err(InvalidInputError::ReservedSeparator('.'))
        );
        assert_eq!(signer.sign(b"ok\xff", &key), Err(InvalidInputError::NotUtf8(2)));
    }

    #[test]
    fn raw_payloads_accept_spaces_and_unicode() {
        let signer = Signer::express();
        let key = secret("super secret");
        for payload in ["hello world", r#"j:{"greeting":"hello world"}"#, "caf\u{e9} \u{1f36a}"] {
            let token = signer.sign_str(payload, &key).expect("utf-8 without separator signs");
            assert_eq!(signer.verify_str(&token, &key).unwrap(), payload);
        }
    }

    #[test]
    fn compact_tokens_escape_any_payload() {
        let key = secret("super secret");
        let payload = b"a.b;c d\x00\xff";
        let token = sign(payload, &key).unwrap();
        assert_eq!(token.matches(SEPARATOR).count(), 1);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == SEPARATOR));
        assert_eq!(verify(&token, &key).unwrap(), payload);
    }

    #[test]
    fn empty_payload_round_trips() {
        let key = secret("k");
        let token = sign(b"", &key).unwrap();
        assert!(token.starts_with(SEPARATOR));
        assert_eq!(verify(&token, &key).unwrap(), b"");
    }

    #[test]
    fn reports_absent_and_malformed_tokens() {
        let key = secret("super secret");
        let valid = sign("key=val", &key).unwrap();
        let (payload, signature) = valid.split_once(SEPARATOR).unwrap();

        assert_eq!(verify("", &key), Err(VerificationFailure::Absent));
        assert!(matches!(verify("no-separator", &key), Err(VerificationFailure::Malformed(_))));
        assert!(matches!(
            verify(&format!("{valid}.extra"), &key),
            Err(VerificationFailure::Malformed(_))
        ));
        assert!(matches!(
            verify(&format!("!!{payload}.{signature}"), &key),
            Err(VerificationFailure::Malformed(_))
        ));
        assert!(matches!(
            verify(&format!("{payload}.{}", &signature[..10]), &key),
            Err(VerificationFailure::Malformed(_))
        ));
    }

    #[test]
    fn verify_str_rejects_non_utf8_payloads() {
        let key = secret("k");
        let token = sign(b"\xff\xfe", &key).unwrap();
        assert!(matches!(
            Signer::default().verify_str(&token, &key),
            Err(VerificationFailure::Malformed(_))
        ));
    }

    #[test]
    fn rotated_keyring_accepts_old_tokens() {
        let signer = Signer::default();
        let old = Keyring::single(secret("old"));
        let token = signer.sign_with("session=1", &old).unwrap();

        let rotated = Keyring::new(vec![secret("new"), secret("old")]).unwrap();
        assert_eq!(signer.verify_with(&token, &rotated).unwrap(), b"session=1");
        assert_ne!(signer.sign_with("session=1", &rotated).unwrap(), token);

        let retired = Keyring::single(secret("new"));
        assert_eq!(signer.verify_with(&token, &retired), Err(VerificationFailure::Mismatch));
    }

    #[test]
    fn substitutes_the_mac_function() {
        let signer = Signer::new(HmacSha512, TokenFormat::Compact);
        let key = secret("super secret");
        let token = signer.sign("key=val", &key).unwrap();
        assert_eq!(
            token,
            "a2V5PXZhbA.pF32EORPJ9Sfp5SEsx7Nbs94I6uTXjuYeoGmLAulNgp-W6msjEZf0HBiAE1YbX0Ln1TynzQOI9NSYU0G9zcnTw"
        );
        assert_eq!(signer.verify(&token, &key).unwrap(), b"key=val");

        let sha256_token = sign("key=val", &key).unwrap();
        assert!(matches!(signer.verify(&sha256_token, &key), Err(VerificationFailure::Malformed(_))));
    }

    #[test]
    fn debug_output_names_the_algorithm_only() {
        let printed = format!("{:?}", Signer::express());
        assert!(printed.contains("hmac-sha256"));
        assert!(printed.contains("Express"));
    }

    mod proptest_signer {
        use proptest::prelude::*;

        use super::*;

        fn arb_secret() -> impl Strategy<Value = Vec<u8>> {
            proptest::collection::vec(any::<u8>(), 1..64)
        }

        fn arb_format() -> impl Strategy<Value = TokenFormat> {
            prop_oneof![Just(TokenFormat::Compact), Just(TokenFormat::Express)]
        }

        fn arb_payload(format: TokenFormat) -> BoxedStrategy<Vec<u8>> {
            match format {
                TokenFormat::Compact => proptest::collection::vec(any::<u8>(), 0..128).boxed(),
                TokenFormat::Express => "[a-zA-Z0-9 =:_+/-]{0,64}".prop_map(String::into_bytes).boxed(),
            }
        }

        fn arb_case() -> impl Strategy<Value = (TokenFormat, Vec<u8>)> {
            arb_format().prop_flat_map(|format| (Just(format), arb_payload(format)))
        }

        proptest! {
            /// Signing then verifying with the same secret returns the payload.
            #[test]
            fn prop_round_trip((format, payload) in arb_case(), key in arb_secret()) {
                let signer = Signer::for_algorithm(MacAlgorithm::HmacSha256, format);
                let key = Secret::new(key).unwrap();
                let token = signer.sign(&payload, &key).unwrap();
                prop_assert_eq!(signer.verify(&token, &key).unwrap(), payload);
            }

            /// A token never verifies under a different secret.
            #[test]
            fn prop_distinct_secrets_fail(
                (format, payload) in arb_case(),
                first in arb_secret(),
                second in arb_secret(),
            ) {
                prop_assume!(first != second);
                let signer = Signer::for_algorithm(MacAlgorithm::HmacSha256, format);
                let token = signer.sign(&payload, &Secret::new(first).unwrap()).unwrap();
                prop_assert_eq!(
                    signer.verify(&token, &Secret::new(second).unwrap()),
                    Err(VerificationFailure::Mismatch)
                );
            }

            /// Replacing any single character of a valid token breaks it.
            #[test]
            fn prop_single_byte_mutation_fails(
                (format, payload) in arb_case(),
                key in arb_secret(),
                position in any::<prop::sample::Index>(),
                replacement in proptest::char::range('!', '~'),
            ) {
                let signer = Signer::for_algorithm(MacAlgorithm::HmacSha256, format);
                let key = Secret::new(key).unwrap();
                let token = signer.sign(&payload, &key).unwrap();

                let mut bytes = token.into_bytes();
                let index = position.index(bytes.len());
                prop_assume!(bytes[index] != replacement as u8);
                bytes[index] = replacement as u8;
                let mutated = String::from_utf8(bytes).unwrap();

                prop_assert!(signer.verify(&mutated, &key).is_err());
            }

            /// The same payload and secret always produce the same token.
            #[test]
            fn prop_sign_is_deterministic((format, payload) in arb_case(), key in arb_secret()) {
                let signer = Signer::for_algorithm(MacAlgorithm::HmacSha256, format);
                let key = Secret::new(key).unwrap();
                prop_assert_eq!(signer.sign(&payload, &key).unwrap(), signer.sign(&payload, &key).unwrap());
            }
        }
    }
}
