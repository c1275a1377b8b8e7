//! Schnittstelle zum Krypto-Kollaborateur
//!
//! Der Kern implementiert keine Kryptografie selbst. Er benoetigt nur
//! Signieren/Verifizieren (Kontrollnachrichten) und optional
//! Ver-/Entschluesseln (Audio-Nutzdaten).

use crate::error::Result;
use crate::types::NodeId;

/// Kryptografische Faehigkeiten eines Knotens
pub trait CryptoProvider: Send + Sync + 'static {
    /// Oeffentlicher Schluessel dieses Knotens (zugleich seine Identitaet)
    fn public_key(&self) -> NodeId;

    /// Signiert `data` mit dem privaten Schluessel dieses Knotens
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Prueft eine Signatur gegen den oeffentlichen Schluessel `signer`
    fn verify(&self, data: &[u8], signature: &[u8], signer: &NodeId) -> bool;

    /// Verschluesselt Nutzdaten mit einem Kanal-Schluessel
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Entschluesselt Nutzdaten; `None` bei falschem Schluessel oder Manipulation
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Option<Vec<u8>>;
}
