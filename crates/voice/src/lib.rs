//! meshptt-voice – Echtzeit-Audiotransport ueber Multicast
//!
//! ## Module
//! - [`packetizer`] – Media-Pakete aus kodierten Frames (SSRC, Sequenz, Marker)
//! - [`jitter_buffer`] – Adaptiver Jitter Buffer mit Zustandsmaschine
//! - [`plc`] – Packet Loss Concealment (FEC, Decoder-PLC, Stille)
//! - [`bitrate`] – Verlustgesteuerte Bitrate-Anpassung
//! - [`telemetry`] – Transport-Statistik pro Kanal
//! - [`transport`] – Multicast-Socket, Lese-Schleife, Nutzdaten-Schutz
//! - [`receiver`] – Empfangs- und Wiedergabe-Task (20-ms-Takt)
//! - [`transmitter`] – Aufnahme-, Kodier- und Sende-Task

pub mod bitrate;
pub mod jitter_buffer;
pub mod packetizer;
pub mod plc;
pub mod receiver;
pub mod telemetry;
pub mod transmitter;
pub mod transport;

pub use bitrate::{BitrateConfig, BitrateController};
pub use jitter_buffer::{JitterBuffer, JitterBufferConfig, JitterState};
pub use packetizer::Packetizer;
pub use receiver::{Empfaenger, EmpfaengerTeile};
pub use telemetry::{KanalTelemetrie, TransportStat};
pub use transmitter::{SendeFehler, Sendepfad, SenderTeile};
pub use transport::{
    lese_schleife, DatagramEmpfang, DatagramVersand, LeseZiele, MulticastTransport,
    NutzdatenSchutz, TransportConfig, TransportStatus,
};
