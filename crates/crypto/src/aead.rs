//! Verschluesselung der Audio-Nutzdaten
//!
//! Verschluesselt Opus-Frames mit dem Kanal-Schluessel. Der RTP-Header bleibt
//! im Klartext, damit der Jitter-Buffer auch ohne Schluessel ordnen kann.
//!
//! ## Format
//! ```text
//! [nonce(12)] [ciphertext + auth_tag(16)]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce as AesNonce,
};
use chacha20poly1305::{ChaCha20Poly1305, Key as ChaChaKey, Nonce as ChaChaNonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::types::{CipherAlgorithm, KEY_LEN};

/// Nonce-Laenge beider Verfahren
pub const NONCE_LEN: usize = 12;

/// Laenge des Auth-Tags
pub const TAG_LEN: usize = 16;

fn schluessel_pruefen(key_bytes: &[u8]) -> CryptoResult<()> {
    if key_bytes.len() != KEY_LEN {
        return Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: KEY_LEN,
            erhalten: key_bytes.len(),
        });
    }
    Ok(())
}

/// Verschluesselt `plaintext` mit zufaelliger Nonce
pub fn verschluesseln(
    algorithm: CipherAlgorithm,
    plaintext: &[u8],
    key_bytes: &[u8],
) -> CryptoResult<Vec<u8>> {
    schluessel_pruefen(key_bytes)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = match algorithm {
        CipherAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
            cipher.encrypt(AesNonce::from_slice(&nonce_bytes), plaintext)
        }
        CipherAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new(ChaChaKey::from_slice(key_bytes));
            cipher.encrypt(ChaChaNonce::from_slice(&nonce_bytes), plaintext)
        }
    }
    .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Entschluesselt Bytes im Format `[nonce][ciphertext+tag]`
pub fn entschluesseln(
    algorithm: CipherAlgorithm,
    data: &[u8],
    key_bytes: &[u8],
) -> CryptoResult<Vec<u8>> {
    schluessel_pruefen(key_bytes)?;
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::UngueltigeDaten(format!(
            "Chiffrat zu kurz: {} Bytes",
            data.len()
        )));
    }
    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

    match algorithm {
        CipherAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
            cipher.decrypt(AesNonce::from_slice(nonce_bytes), ciphertext)
        }
        CipherAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new(ChaChaKey::from_slice(key_bytes));
            cipher.decrypt(ChaChaNonce::from_slice(nonce_bytes), ciphertext)
        }
    }
    .map_err(|e| CryptoError::Entschluesselung(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
