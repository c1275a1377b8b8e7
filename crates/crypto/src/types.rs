//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// Laenge eines Kanal-Schluessels in Bytes
pub const KEY_LEN: usize = 32;

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone)]
pub struct SecretBytes(Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Symmetrischer Kanal-Schluessel (extern verteilt, 32 Bytes)
#[derive(Debug, Clone)]
pub struct ChannelKey(SecretBytes);

impl ChannelKey {
    pub fn new(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::UngueltigeSchluesselLaenge {
                erwartet: KEY_LEN,
                erhalten: bytes.len(),
            });
        }
        Ok(Self(SecretBytes::new(bytes)))
    }

    /// Dekodiert einen Base64-Schluessel aus der Konfiguration
    pub fn aus_base64(text: &str) -> CryptoResult<Self> {
        Self::new(STANDARD.decode(text.trim())?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// AEAD-Algorithmus fuer Audio-Nutzdaten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CipherAlgorithm {
    #[default]
    Aes256Gcm,
    ChaCha20Poly1305,
}
