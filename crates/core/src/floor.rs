//! Floor-Datenmodell
//!
//! Anfragen, Grant-Eintraege, Zustaende und Ergebnisse der Floor-Kontrolle.
//! Die Gesamtordnung ueber Anfragen ([`arbitration_order`]) ist eine reine
//! Funktion: jeder Knoten kommt bei gleicher Nachrichtenmenge zum gleichen
//! Gewinner, unabhaengig von der Ankunftsreihenfolge.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::{NodeId, Priority, RequestId};

// ---------------------------------------------------------------------------
// FloorRequest
// ---------------------------------------------------------------------------

/// Eine Floor-Anfrage (unveraenderlich nach Erstellung)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorRequest {
    pub request_id: RequestId,
    /// Oeffentlicher Schluessel des Anfragenden
    pub requester: NodeId,
    pub priority: Priority,
    /// Lamport-Zeitstempel bei Erstellung
    pub lamport: u64,
    /// Lokale monotone Zeit des Anfragenden in ms (nur informativ)
    pub local_timestamp_ms: u64,
    pub is_emergency: bool,
    /// Gewuenschte Sendedauer, 0 = unbegrenzt
    pub requested_duration_ms: u32,
}

impl FloorRequest {
    /// Prioritaet unter Beruecksichtigung des Notfall-Flags
    pub fn effektive_prioritaet(&self) -> Priority {
        if self.is_emergency {
            self.priority.max(Priority::Emergency)
        } else {
            self.priority
        }
    }

    /// `true` wenn diese Anfrage in der Gesamtordnung vor `andere` liegt
    pub fn geht_vor(&self, andere: &FloorRequest) -> bool {
        arbitration_order(self, andere) == Ordering::Less
    }
}

/// Gesamtordnung ueber Floor-Anfragen (`Less` = gewinnt)
///
/// 1. effektive Prioritaet absteigend
/// 2. Lamport-Zeitstempel aufsteigend
/// 3. Identitaets-Bytes des Anfragenden aufsteigend
/// 4. Request-ID (nur fuer mehrere Anfragen desselben Knotens)
pub fn arbitration_order(a: &FloorRequest, b: &FloorRequest) -> Ordering {
    b.effektive_prioritaet()
        .cmp(&a.effektive_prioritaet())
        .then_with(|| a.lamport.cmp(&b.lamport))
        .then_with(|| a.requester.cmp(&b.requester))
        .then_with(|| a.request_id.cmp(&b.request_id))
}

// ---------------------------------------------------------------------------
// FloorGrantRecord
// ---------------------------------------------------------------------------

/// Aktueller Halter des Floors (lebt nur solange der Floor belegt ist)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorGrantRecord {
    /// Die gewaehrte Anfrage (fuer Konfliktaufloesung und Verdraengung)
    pub request: FloorRequest,
    pub granted_at_ms: u64,
    /// Wird durch Heartbeats verlaengert
    pub expires_at_ms: u64,
}

impl FloorGrantRecord {
    pub fn holder(&self) -> NodeId {
        self.request.requester
    }

    pub fn priority(&self) -> Priority {
        self.request.effektive_prioritaet()
    }
}

// ---------------------------------------------------------------------------
// FloorState
// ---------------------------------------------------------------------------

/// Lokale Sicht eines Knotens auf den Floor eines Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "zustand", content = "halter", rename_all = "snake_case")]
pub enum FloorState {
    Idle,
    PendingRequest,
    /// Dieser Knoten darf senden
    Granted,
    /// Ein anderer Knoten haelt den Floor
    Taken(NodeId),
    /// Eigene Anfrage wartet hinter dem aktuellen Halter
    Queued,
    Releasing,
    Revoked,
    /// Kanal gestoert (Netzwerk nicht verfuegbar)
    Error,
}

impl FloorState {
    pub fn darf_senden(&self) -> bool {
        matches!(self, FloorState::Granted)
    }
}

impl std::fmt::Display for FloorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FloorState::Idle => write!(f, "idle"),
            FloorState::PendingRequest => write!(f, "pending_request"),
            FloorState::Granted => write!(f, "granted"),
            FloorState::Taken(halter) => write!(f, "taken({halter})"),
            FloorState::Queued => write!(f, "queued"),
            FloorState::Releasing => write!(f, "releasing"),
            FloorState::Revoked => write!(f, "revoked"),
            FloorState::Error => write!(f, "error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ergebnisse
// ---------------------------------------------------------------------------

/// Grund einer Ablehnung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Arbitrierung ohne Gewinner nach allen Wiederholungen
    Timeout,
    /// Warteschlange des Halters/Arbiters ist voll
    QueueFull,
    NetworkUnavailable,
    /// Kanal wurde verlassen waehrend die Anfrage lief
    ChannelClosed,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::Timeout => "timeout",
            DenyReason::QueueFull => "queue_full",
            DenyReason::NetworkUnavailable => "network_unavailable",
            DenyReason::ChannelClosed => "channel_closed",
        };
        write!(f, "{s}")
    }
}

/// Ergebnis von `request_floor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloorOutcome {
    Granted,
    /// Position in der Warteschlange (1 = naechster)
    Queued { position: usize },
    Denied(DenyReason),
}
