//! Secure in-memory holder for a loaded private key
//!
//! The decrypted key is kept as DER inside a `secrecy` box so it is zeroized on drop, never
//! shows up in `Debug` output, and is only turned back into an OpenSSL key for the duration
//! of a signing pass.

use openssl::pkey::{Id, PKey, PKeyRef, Private};
use secrecy::{ExposeSecret, SecretBox, SecretString};
use std::fmt;

use crate::error::{Result, SignatureError};

/// Password supplied by the caller for a single sign attempt
pub type Password = SecretString;

/// A decrypted private key, owned by the signing operation that loaded it
///
/// Deliberately not `Clone`: handing the key to the signer moves it, and it is dropped
/// (and zeroized) when signing returns.
pub struct SigningKey {
    der_bytes: SecretBox<Vec<u8>>,
    algorithm: Id,
    bits: u32,
}

impl SigningKey {
    pub fn new(key: &PKeyRef<Private>) -> Result<Self> {
        let der_bytes = key.private_key_to_der().map_err(|e| {
            SignatureError::SigningFailure(format!("Failed to convert private key to DER: {}", e))
        })?;

        Ok(Self {
            der_bytes: SecretBox::new(Box::new(der_bytes)),
            algorithm: key.id(),
            bits: key.bits(),
        })
    }

    /// Key algorithm as reported by OpenSSL
    pub fn algorithm(&self) -> Id {
        self.algorithm
    }

    /// Key size in bits
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Run `f` with the key reconstructed from secure storage
    ///
    /// The reconstructed `PKey` lives only for the duration of the closure.
    pub fn with_pkey<T>(&self, f: impl FnOnce(&PKeyRef<Private>) -> Result<T>) -> Result<T> {
        let pkey = PKey::private_key_from_der(self.der_bytes.expose_secret()).map_err(|e| {
            SignatureError::SigningFailure(format!(
                "Failed to reconstruct private key from secure storage: {}",
                e
            ))
        })?;
        f(&pkey)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .field("bits", &self.bits)
            .field("key", &"<securely stored>")
            .finish()
    }
}
