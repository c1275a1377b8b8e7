//! meshptt-protocol – Wire-Format des Multicast-Kanals
//!
//! Dieses Crate definiert die Media-Pakete (RTP-aehnlich), die signierten
//! Floor-Kontrollnachrichten und die Codec-Konfiguration.

pub mod codec;
pub mod control;
pub mod error;
pub mod media;
pub mod wire;

pub use codec::{AudioPreset, OpusConfig, SampleRate, FRAME_MS};
pub use control::{ControlRecord, FloorMessage, MessageType, SignedControl};
pub use error::ParseError;
pub use media::{seq_diff, seq_neuer, EncodedPacket, MediaHeader, MAX_PACKET_SIZE};
pub use wire::{ControlCodec, Datagram, CONTROL_MARKER};
