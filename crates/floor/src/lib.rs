//! meshptt-floor – Verteilte Floor-Kontrolle pro Kanal
//!
//! Garantiert hoechstens einen Sender pro Kanal ohne zentralen Server.
//!
//! ## Module
//! - [`engine`] – Zustandsautomat ohne I/O, liefert [`FloorAction`]s
//! - [`lamport`] – prozessweite Lamport-Uhr
//! - [`queue`] – geordnete Warteschlange
//! - [`arbiter`] – Arbiter-Wahl fuer den zentralen Modus
//! - [`timers`] – abbrechbare Timer mit Generationen
//! - [`config`] – `[floor]`-Konfiguration

pub mod arbiter;
pub mod config;
pub mod engine;
pub mod lamport;
pub mod queue;
pub mod timers;

pub use arbiter::ArbiterWahl;
pub use config::{ArbitrationMode, FloorConfig};
pub use engine::{FloorAction, FloorEngine, TimerKind};
pub use lamport::LamportClock;
pub use queue::{QueueVoll, RequestQueue};
pub use timers::{TimerFired, TimerRegistry};
