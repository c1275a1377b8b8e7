//! # meshptt-crypto
//!
//! Kryptografie-Kollaborateur fuer meshptt.
//!
//! ## Module
//! - `identity` - Ed25519 Knoten-Identitaet (Signatur der Kontrollnachrichten)
//! - `aead` - AES-256-GCM / ChaCha20-Poly1305 fuer Audio-Nutzdaten
//! - `provider` - `CryptoProvider`-Implementierung
//! - `types` - Schluessel-Container
//! - `error` - Fehlertypen

pub mod aead;
pub mod error;
pub mod identity;
pub mod provider;
pub mod types;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult};
pub use identity::NodeIdentity;
pub use provider::Ed25519Provider;
pub use types::{ChannelKey, CipherAlgorithm, SecretBytes};
