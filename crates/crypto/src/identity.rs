//! Knoten-Identitaet (Ed25519)
//!
//! Jeder Knoten besitzt ein Ed25519-Schluessel-Paar. Der oeffentliche
//! Schluessel ist zugleich die `NodeId` und der letzte Tie-Break der
//! Floor-Arbitrierung. Der private Schluessel liegt Base64-kodiert in einer
//! Datei und wird beim ersten Start erzeugt.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use meshptt_core::NodeId;
use rand::rngs::OsRng;

use crate::error::{CryptoError, CryptoResult};

/// Langzeit-Identitaet eines Knotens (Ed25519)
pub struct NodeIdentity {
    signing_key: SigningKey,
}

impl NodeIdentity {
    /// Generiert ein neues Ed25519-Schluessel-Paar
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Erstellt eine Identitaet aus einem privaten Schluessel (32 Bytes)
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Liest den Schluessel aus `pfad` oder erzeugt und speichert einen neuen
    pub fn laden_oder_erzeugen(pfad: &Path) -> CryptoResult<Self> {
        if pfad.exists() {
            let inhalt = std::fs::read_to_string(pfad)?;
            let bytes = STANDARD.decode(inhalt.trim())?;
            let array: [u8; 32] =
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
                        erwartet: 32,
                        erhalten: bytes.len(),
                    })?;
            let identity = Self::from_bytes(&array);
            tracing::info!(knoten = %identity.node_id(), pfad = %pfad.display(), "Identitaet geladen");
            return Ok(identity);
        }

        let identity = Self::generate();
        if let Some(verzeichnis) = pfad.parent() {
            if !verzeichnis.as_os_str().is_empty() {
                std::fs::create_dir_all(verzeichnis)?;
            }
        }
        std::fs::write(pfad, STANDARD.encode(identity.private_key_bytes()))?;
        tracing::info!(knoten = %identity.node_id(), pfad = %pfad.display(), "Neue Identitaet erzeugt");
        Ok(identity)
    }

    /// Gibt den privaten Schluessel als Bytes zurueck (fuer Persistenz)
    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Oeffentlicher Schluessel als Knoten-ID
    pub fn node_id(&self) -> NodeId {
        NodeId::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    /// Signiert Daten mit dem privaten Schluessel (64 Bytes)
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    /// Verifiziert eine Signatur mit einem oeffentlichen Schluessel
    pub fn verify(data: &[u8], signature_bytes: &[u8], signer: &NodeId) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(signer.as_bytes()) else {
            return false;
        };
        let Ok(sig_array) = signature_bytes.try_into() else {
            return false;
        };
        let signature = Signature::from_bytes(sig_array);
        verifying_key.verify(data, &signature).is_ok()
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeIdentity {{ node: {} }}", self.node_id())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signieren_und_verifizieren() {
        let identity = NodeIdentity::generate();
        let data = b"floor request";

        let signature = identity.sign(data);
        assert_eq!(signature.len(), 64);
        assert!(NodeIdentity::verify(data, &signature, &identity.node_id()));
    }

    #[test]
    fn falsche_signatur_wird_abgelehnt() {
        let identity = NodeIdentity::generate();
        let mut signature = identity.sign(b"daten");
        signature[0] ^= 0xFF;
        assert!(!NodeIdentity::verify(b"daten", &signature, &identity.node_id()));
    }

    #[test]
    fn falsche_daten_werden_abgelehnt() {
        let identity = NodeIdentity::generate();
        let signature = identity.sign(b"Originaltext");
        assert!(!NodeIdentity::verify(
            b"Geaenderter Text",
            &signature,
            &identity.node_id()
        ));
    }

    #[test]
    fn verschiedene_keys_ablehnen() {
        let id1 = NodeIdentity::generate();
        let id2 = NodeIdentity::generate();
        let sig = id1.sign(b"Testdaten");
        assert!(!NodeIdentity::verify(b"Testdaten", &sig, &id2.node_id()));
    }

    #[test]
    fn kurze_signatur_wird_abgelehnt() {
        let identity = NodeIdentity::generate();
        assert!(!NodeIdentity::verify(b"x", &[0u8; 12], &identity.node_id()));
    }

    #[test]
    fn from_bytes_roundtrip() {
        let identity = NodeIdentity::generate();
        let restored = NodeIdentity::from_bytes(&identity.private_key_bytes());
        assert_eq!(restored.node_id(), identity.node_id());
    }

    #[test]
    fn datei_wird_angelegt_und_wiederverwendet() {
        let pfad = std::env::temp_dir().join(format!(
            "meshptt-identity-{}.key",
            zufalls_suffix()
        ));
        let erste = NodeIdentity::laden_oder_erzeugen(&pfad).unwrap();
        let zweite = NodeIdentity::laden_oder_erzeugen(&pfad).unwrap();
        assert_eq!(erste.node_id(), zweite.node_id());
        std::fs::remove_file(&pfad).unwrap();
    }

    #[test]
    fn kaputte_datei_ist_fehler() {
        let pfad = std::env::temp_dir().join(format!("meshptt-kaputt-{}.key", zufalls_suffix()));
        std::fs::write(&pfad, STANDARD.encode([1u8; 7])).unwrap();
        assert!(matches!(
            NodeIdentity::laden_oder_erzeugen(&pfad),
            Err(CryptoError::UngueltigeSchluesselLaenge { erhalten: 7, .. })
        ));
        std::fs::remove_file(&pfad).unwrap();
    }

    fn zufalls_suffix() -> String {
        use rand::Rng;
        format!("{:016x}", rand::thread_rng().gen::<u64>())
    }
}
