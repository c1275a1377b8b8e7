//! meshptt-session – Kanal-Sessions und Aufrufer-API
//!
//! ## Module
//! - [`ptt`] – [`PttCore`]: Beitreten, Verlassen, Floor anfordern/freigeben
//! - [`channel`] – Tasks und geordneter Abbau eines Kanals
//! - [`control`] – Kontroll-Task, einziger Besitzer der Floor-Engine
//! - [`anschluss`] – Netzanschluss (Multicast oder Test-Bus)
//! - [`audio`] – Quelle, Senke und Codecs pro Kanal
//! - [`event`] – [`SessionEvent`]-Strom
//! - [`config`] – Kanal- und Session-Konfiguration

pub mod anschluss;
pub mod audio;
pub mod channel;
pub mod config;
pub mod control;
pub mod event;
pub mod ptt;

pub use anschluss::{KanalAnschluss, MulticastFabrik, NetzFabrik};
pub use audio::{AudioFabrik, StandardAudio};
pub use channel::{ChannelSession, KanalHandle};
pub use config::{ChannelConfig, SessionConfig};
pub use event::SessionEvent;
pub use ptt::PttCore;
