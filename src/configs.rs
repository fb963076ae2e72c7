use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::DigestAlgorithm;
use crate::key_locator::{ExtensionSet, SelectionPolicy};

/// Default chunk size used when streaming documents through the signer and verifier
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// Smallest RSA modulus accepted for signing by default
pub const DEFAULT_MIN_RSA_BITS: u32 = 2048;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeystoreConfig {
    #[serde(default = "default_key_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_private_key_extensions")]
    pub private_key_extensions: Vec<String>,
    #[serde(default = "default_certificate_extensions")]
    pub certificate_extensions: Vec<String>,
    #[serde(default)]
    pub selection: SelectionPolicy,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            directory: default_key_directory(),
            private_key_extensions: default_private_key_extensions(),
            certificate_extensions: default_certificate_extensions(),
            selection: SelectionPolicy::default(),
        }
    }
}

impl KeystoreConfig {
    pub fn private_key_set(&self) -> ExtensionSet {
        ExtensionSet::new(&self.private_key_extensions)
    }

    pub fn certificate_set(&self) -> ExtensionSet {
        ExtensionSet::new(&self.certificate_extensions)
    }
}

fn default_key_directory() -> PathBuf {
    PathBuf::from("keys")
}

fn default_private_key_extensions() -> Vec<String> {
    ["key", "pem", "der", "p12", "pfx"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_certificate_extensions() -> Vec<String> {
    ["csr", "cer", "crt"].iter().map(|e| e.to_string()).collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SigningConfig {
    #[serde(default)]
    pub digest: DigestAlgorithm,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_min_rsa_bits")]
    pub min_rsa_bits: u32,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            digest: DigestAlgorithm::default(),
            chunk_size: default_chunk_size(),
            min_rsa_bits: default_min_rsa_bits(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_min_rsa_bits() -> u32 {
    DEFAULT_MIN_RSA_BITS
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(config_str).context("Failed to parse config file")?;

        if config.signing.chunk_size == 0 {
            anyhow::bail!("signing.chunk_size must be greater than zero");
        }

        Ok(config)
    }

    /// Load configuration with default path (config.toml), falling back to defaults when
    /// the file does not exist
    pub fn load() -> Result<Self> {
        let path = Path::new("config.toml");
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}
