//! Ed25519-basierter `CryptoProvider`
//!
//! Buendelt Knoten-Identitaet und AEAD-Verfahren hinter der Schnittstelle,
//! die Floor-Engine und Audio-Pipeline erwarten.

use meshptt_core::{CryptoProvider, NodeId};

use crate::aead;
use crate::identity::NodeIdentity;
use crate::types::CipherAlgorithm;

/// Produktiver Krypto-Kollaborateur eines Knotens
#[derive(Debug)]
pub struct Ed25519Provider {
    identity: NodeIdentity,
    algorithm: CipherAlgorithm,
}

impl Ed25519Provider {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            algorithm: CipherAlgorithm::default(),
        }
    }

    pub fn mit_algorithmus(mut self, algorithm: CipherAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }
}

impl CryptoProvider for Ed25519Provider {
    fn public_key(&self) -> NodeId {
        self.identity.node_id()
    }

    fn sign(&self, data: &[u8]) -> meshptt_core::Result<Vec<u8>> {
        Ok(self.identity.sign(data))
    }

    fn verify(&self, data: &[u8], signature: &[u8], signer: &NodeId) -> bool {
        NodeIdentity::verify(data, signature, signer)
    }

    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> meshptt_core::Result<Vec<u8>> {
        Ok(aead::verschluesseln(self.algorithm, plaintext, key)?)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Option<Vec<u8>> {
        match aead::entschluesseln(self.algorithm, ciphertext, key) {
            Ok(klartext) => Some(klartext),
            Err(e) => {
                tracing::trace!(fehler = %e, "Nutzdaten nicht entschluesselbar");
                None
            }
        }
    }
}
