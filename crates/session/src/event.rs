//! Ereignisstrom der Sessions
//!
//! Alle Kanaele eines Knotens melden ueber einen gemeinsamen
//! `broadcast`-Kanal. Abnehmer sind Aufrufer, Metriken und Health.

use serde::Serialize;

use meshptt_core::{ChannelId, FloorEvent};
use meshptt_voice::TransportStat;

/// Kapazitaet des Ereignis-Broadcasts
pub const EREIGNIS_KAPAZITAET: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum SessionEvent {
    Floor { kanal: ChannelId, event: FloorEvent },
    Transport { stat: TransportStat },
    /// Empfang dauerhaft gestoert bzw. wieder erholt
    Status { kanal: ChannelId, degradiert: bool },
    SendeFehler { kanal: ChannelId, fehler: String },
    Beigetreten { kanal: ChannelId },
    Verlassen { kanal: ChannelId },
}

impl SessionEvent {
    pub fn kanal(&self) -> &ChannelId {
        match self {
            SessionEvent::Floor { kanal, .. }
            | SessionEvent::Status { kanal, .. }
            | SessionEvent::SendeFehler { kanal, .. }
            | SessionEvent::Beigetreten { kanal }
            | SessionEvent::Verlassen { kanal } => kanal,
            SessionEvent::Transport { stat } => &stat.kanal,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Floor { event, .. } => event.name(),
            SessionEvent::Transport { .. } => "transport",
            SessionEvent::Status { .. } => "status",
            SessionEvent::SendeFehler { .. } => "sende_fehler",
            SessionEvent::Beigetreten { .. } => "beigetreten",
            SessionEvent::Verlassen { .. } => "verlassen",
        }
    }
}
