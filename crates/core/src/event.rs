//! Floor-Ereignisse
//!
//! Die Floor-Engine meldet jede beobachtbare Aenderung als [`FloorEvent`].
//! Die Audio-Pipeline wertet nur den veroeffentlichten Zustand aus; die
//! Ereignisse gehen an Aufrufer, Metriken und Logs.

use serde::{Deserialize, Serialize};

use crate::floor::{DenyReason, FloorState};
use crate::types::{NodeId, Priority, RequestId};

/// Alle Ereignisse der Floor-Kontrolle eines Kanals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "art", rename_all = "snake_case")]
pub enum FloorEvent {
    /// Lokaler Zustand hat sich geaendert
    StateChanged { alt: FloorState, neu: FloorState },
    /// Ein Knoten (ggf. dieser) haelt jetzt den Floor
    Granted {
        holder: NodeId,
        request_id: RequestId,
        priority: Priority,
    },
    /// Eigene Anfrage wartet an Position `position`
    Queued { request_id: RequestId, position: usize },
    /// Eigene Anfrage wurde abgelehnt
    Denied {
        request_id: RequestId,
        reason: DenyReason,
    },
    /// Halter wurde durch eine hoeher priorisierte Anfrage verdraengt
    Revoked { holder: NodeId, by: NodeId },
    /// Halter hat den Floor freigegeben
    Released { holder: NodeId },
    /// Halter hat zwei Heartbeats verpasst
    HolderLost { holder: NodeId },
    /// Kontrollnachricht verworfen (Signatur, Format, unerwarteter Typ)
    MessageRejected { reason: String },
    /// Zentralisierter Modus: neuer Arbiter gewaehlt (`None` = verteilter Rueckfall)
    ArbiterChanged { arbiter: Option<NodeId> },
}

impl FloorEvent {
    /// Kurzname fuer Logs und Metrik-Labels
    pub fn name(&self) -> &'static str {
        match self {
            FloorEvent::StateChanged { .. } => "state_changed",
            FloorEvent::Granted { .. } => "granted",
            FloorEvent::Queued { .. } => "queued",
            FloorEvent::Denied { .. } => "denied",
            FloorEvent::Revoked { .. } => "revoked",
            FloorEvent::Released { .. } => "released",
            FloorEvent::HolderLost { .. } => "holder_lost",
            FloorEvent::MessageRejected { .. } => "message_rejected",
            FloorEvent::ArbiterChanged { .. } => "arbiter_changed",
        }
    }
}
