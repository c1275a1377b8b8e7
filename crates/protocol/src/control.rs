//! Floor-Kontrollnachrichten
//!
//! Geschlossene Menge der Nachrichten, die Knoten ueber den Multicast-Kanal
//! austauschen, um den Floor zu arbitrieren. Jede Nachricht wird in einen
//! [`ControlRecord`] mit Kanal, Absender und Lamport-Zeit verpackt und als
//! [`SignedControl`] signiert versendet.
//!
//! ## Design
//! - JSON-Serialisierung via serde (selten, nicht zeitkritisch)
//! - Tagged Enum, Typ-Byte im Header muss zum Inhalt passen
//! - Signatur ueber Header und Body, geprueft vor jeder Anwendung

use serde::{Deserialize, Serialize};

use meshptt_core::{ChannelId, CryptoProvider, DenyReason, FloorRequest, NodeId, Priority, RequestId};

use crate::error::ParseError;

// ---------------------------------------------------------------------------
// Nachrichtentypen
// ---------------------------------------------------------------------------

/// Typ-Bytes im Kontroll-Header
pub struct MessageType;

impl MessageType {
    pub const REQUEST: u8 = 1;
    pub const GRANT: u8 = 2;
    pub const DENY: u8 = 3;
    pub const RELEASE: u8 = 4;
    pub const REVOKE: u8 = 5;
    pub const HEARTBEAT: u8 = 6;

    pub fn ist_bekannt(byte: u8) -> bool {
        (Self::REQUEST..=Self::HEARTBEAT).contains(&byte)
    }
}

/// Alle Floor-Kontrollnachrichten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum FloorMessage {
    /// Anfrage um den Floor (Absender == Anfragender)
    Request { request: FloorRequest },
    /// Floor wurde `request` zugeteilt (Selbstzuteilung oder Arbiter)
    Grant { request: FloorRequest },
    /// Anfrage `request_id` von `target` abgelehnt
    Deny {
        target: NodeId,
        request_id: RequestId,
        reason: DenyReason,
    },
    /// Halter gibt den Floor frei
    Release { holder: NodeId, request_id: RequestId },
    /// Verdraengung von `target`, traegt den Grant des Verdraengenden
    Revoke { target: NodeId, grant: FloorRequest },
    /// Lebenszeichen des Halters bzw. Praesenz-Beacon mit Rang
    Heartbeat {
        rank: Priority,
        holding: Option<FloorRequest>,
    },
}

impl FloorMessage {
    /// Typ-Byte fuer den Header
    pub fn typ(&self) -> u8 {
        match self {
            FloorMessage::Request { .. } => MessageType::REQUEST,
            FloorMessage::Grant { .. } => MessageType::GRANT,
            FloorMessage::Deny { .. } => MessageType::DENY,
            FloorMessage::Release { .. } => MessageType::RELEASE,
            FloorMessage::Revoke { .. } => MessageType::REVOKE,
            FloorMessage::Heartbeat { .. } => MessageType::HEARTBEAT,
        }
    }

    /// Kurzname fuer Logs
    pub fn name(&self) -> &'static str {
        match self {
            FloorMessage::Request { .. } => "request",
            FloorMessage::Grant { .. } => "grant",
            FloorMessage::Deny { .. } => "deny",
            FloorMessage::Release { .. } => "release",
            FloorMessage::Revoke { .. } => "revoke",
            FloorMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

// ---------------------------------------------------------------------------
// ControlRecord
// ---------------------------------------------------------------------------

/// Inhalt eines Kontroll-Frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub channel: ChannelId,
    /// Signierender Knoten
    pub sender: NodeId,
    /// Lamport-Zeit des Absenders beim Versand
    pub lamport: u64,
    pub message: FloorMessage,
}

impl ControlRecord {
    pub fn new(channel: ChannelId, sender: NodeId, lamport: u64, message: FloorMessage) -> Self {
        Self {
            channel,
            sender,
            lamport,
            message,
        }
    }

    /// Prueft, dass der Absender zum Inhalt passt
    ///
    /// Anfragen, Freigaben, Verdraengungen und Heartbeats mit Halter-Angabe
    /// darf nur der betroffene Knoten selbst signieren. Grants und Denies
    /// darf auch ein Arbiter fuer andere ausstellen.
    pub fn absender_pruefen(&self) -> Result<(), ParseError> {
        let passt = match &self.message {
            FloorMessage::Request { request } => request.requester == self.sender,
            FloorMessage::Release { holder, .. } => *holder == self.sender,
            FloorMessage::Revoke { grant, .. } => grant.requester == self.sender,
            FloorMessage::Heartbeat {
                holding: Some(request),
                ..
            } => request.requester == self.sender,
            FloorMessage::Heartbeat { holding: None, .. }
            | FloorMessage::Grant { .. }
            | FloorMessage::Deny { .. } => true,
        };
        if passt {
            Ok(())
        } else {
            Err(ParseError::AbsenderKonflikt)
        }
    }
}

// ---------------------------------------------------------------------------
// SignedControl
// ---------------------------------------------------------------------------

/// Signierter Kontroll-Frame
///
/// `signiert` enthaelt die exakten Bytes (Header + Body), ueber die
/// `signature` gebildet wurde. Beim Empfang werden genau diese Bytes
/// verifiziert, nicht eine Neu-Serialisierung.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedControl {
    pub(crate) record: ControlRecord,
    pub(crate) signiert: Vec<u8>,
    pub(crate) signature: Vec<u8>,
}

impl SignedControl {
    /// Serialisiert und signiert einen Record
    pub fn signieren(
        record: ControlRecord,
        crypto: &dyn CryptoProvider,
    ) -> meshptt_core::Result<Self> {
        let signiert = crate::wire::frame_bytes(&record)
            .map_err(|e| meshptt_core::PttError::intern(e.to_string()))?;
        let signature = crypto.sign(&signiert)?;
        if signature.len() != crate::wire::SIGNATURE_SIZE {
            return Err(meshptt_core::PttError::Krypto(format!(
                "Signatur hat {} Bytes (erwartet {})",
                signature.len(),
                crate::wire::SIGNATURE_SIZE
            )));
        }
        Ok(Self {
            record,
            signiert,
            signature,
        })
    }

    /// Prueft die Signatur gegen den im Record genannten Absender
    pub fn verifizieren(&self, crypto: &dyn CryptoProvider) -> bool {
        crypto.verify(&self.signiert, &self.signature, &self.record.sender)
    }

    pub fn record(&self) -> &ControlRecord {
        &self.record
    }

    pub fn into_record(self) -> ControlRecord {
        self.record
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}
