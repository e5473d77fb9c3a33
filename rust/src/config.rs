//! Configuration loader. The JSON file names where each signing secret comes
//! from; the secrets themselves are read from the environment or key files and
//! only ever live in memory.

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::mac::MacAlgorithm;
use crate::crypto::secret::{Keyring, Secret};
use crate::signer::{Signer, TokenFormat};

pub const DEFAULT_DEBUG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(String),
    #[error("config parse failed: {0}")]
    Parse(String),
    #[error("secret #{0}: {1}")]
    Secret(usize, String),
    #[error("secret #{0} has no usable key source configured")]
    MissingKeySource(usize),
    #[error("at least one secret must be configured")]
    NoSecrets,
}

/// Where one signing secret comes from. The first populated option wins, in
/// field order.
#[derive(Debug, Default, Deserialize)]
pub struct SecretSource {
    /// Environment variable whose literal value is the secret.
    pub plain_env: Option<String>,
    /// Environment variable holding a base64-encoded key.
    pub key_env: Option<String>,
    /// Path to a file that contains the base64-encoded key.
    pub key_path: Option<PathBuf>,
    /// Environment variable that stores a passphrase (for Argon2id).
    pub passphrase_env: Option<String>,
    /// Base64-encoded salt used alongside the passphrase.
    pub salt_b64: Option<String>,
    /// Optional HKDF context; when set the configured key is only used to
    /// derive the signing key.
    pub context: Option<String>,
}

/// Which kind of [`SecretSource`] option produced a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    PlainEnv,
    KeyEnv,
    KeyPath,
    Passphrase,
}

/// What operators may see about a loaded key. Carries nothing derived from
/// the key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySummary {
    pub source: SourceKind,
    pub derived: bool,
    pub len: usize,
}

impl SecretSource {
    fn build_secret(&self, index: usize) -> Result<(Secret, KeySummary), ConfigError> {
        let (secret, source) = if let Some(var) = &self.plain_env {
            let secret = Secret::from_plain_env_var(var).map_err(|e| secret_err(index, e))?;
            (secret, SourceKind::PlainEnv)
        } else if let Some(var) = &self.key_env {
            let secret = Secret::from_env_var(var).map_err(|e| secret_err(index, e))?;
            (secret, SourceKind::KeyEnv)
        } else if let Some(path) = &self.key_path {
            let secret = Secret::from_key_file(path).map_err(|e| secret_err(index, e))?;
            (secret, SourceKind::KeyPath)
        } else if let (Some(pass_env), Some(salt_b64)) = (&self.passphrase_env, &self.salt_b64) {
            let passphrase = std::env::var(pass_env).map_err(|e| secret_err(index, e))?;
            let salt = STANDARD_NO_PAD
                .decode(salt_b64.as_bytes())
                .map_err(|e| secret_err(index, e))?;
            let secret =
                Secret::derive_from_passphrase(&passphrase, &salt).map_err(|e| secret_err(index, e))?;
            (secret, SourceKind::Passphrase)
        } else {
            return Err(ConfigError::MissingKeySource(index));
        };

        let secret = match &self.context {
            Some(context) => secret
                .derive_subkey(context.as_bytes())
                .map_err(|e| secret_err(index, e))?,
            None => secret,
        };
        let summary = KeySummary {
            source,
            derived: self.context.is_some(),
            len: secret.len(),
        };
        Ok((secret, summary))
    }
}

fn secret_err(index: usize, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Secret(index, format!("{err}"))
}

#[derive(Debug, Deserialize)]
pub struct RawSignerConfig {
    #[serde(default)]
    pub algorithm: MacAlgorithm,
    #[serde(default)]
    pub format: TokenFormat,
    pub secrets: Vec<SecretSource>,
    #[serde(rename = "debugLevel")]
    pub debug_level: Option<String>,
}

#[derive(Debug)]
pub struct RuntimeConfig {
    pub signer: Signer,
    pub keyring: Keyring,
    /// One entry per keyring secret, in keyring order.
    pub key_summaries: Vec<KeySummary>,
    pub debug_level: String,
}

/// Loads the JSON configuration file and resolves every secret source.
pub fn load_config(path: impl AsRef<Path>) -> Result<RuntimeConfig, ConfigError> {
    let raw_json = fs::read_to_string(&path).map_err(|e| ConfigError::Io(format!("{e}")))?;
    parse_config(&raw_json)
}

pub fn parse_config(raw_json: &str) -> Result<RuntimeConfig, ConfigError> {
    let raw_config: RawSignerConfig =
        serde_json::from_str(raw_json).map_err(|e| ConfigError::Parse(format!("{e}")))?;

    if raw_config.secrets.is_empty() {
        return Err(ConfigError::NoSecrets);
    }

    let (secrets, key_summaries): (Vec<_>, Vec<_>) = raw_config
        .secrets
        .iter()
        .enumerate()
        .map(|(index, source)| source.build_secret(index))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .unzip();
    let keyring = Keyring::new(secrets).map_err(|_| ConfigError::NoSecrets)?;

    Ok(RuntimeConfig {
        signer: Signer::for_algorithm(raw_config.algorithm, raw_config.format),
        keyring,
        key_summaries,
        debug_level: raw_config
            .debug_level
            .unwrap_or_else(|| DEFAULT_DEBUG_LEVEL.to_string()),
    })
}
