//! meshptt-core – Gemeinsame Typen, Floor-Datenmodell und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen meshptt-Crates gemeinsam genutzt werden.
//!
//! ## Module
//! - [`types`] – Identifikationstypen und Prioritaeten
//! - [`floor`] – Floor-Anfragen, Zustaende und Ergebnisse
//! - [`event`] – Floor-Ereignisse fuer Beobachter
//! - [`crypto`] – Schnittstelle zum Krypto-Kollaborateur
//! - [`error`] – Fehler-Taxonomie

pub mod crypto;
pub mod error;
pub mod event;
pub mod floor;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use crypto::CryptoProvider;
pub use error::{PttError, Result};
pub use event::FloorEvent;
pub use floor::{
    arbitration_order, DenyReason, FloorGrantRecord, FloorOutcome, FloorRequest, FloorState,
};
pub use types::{ChannelId, NodeId, Priority, RequestId};
