//! meshptt-audio – Codec und Audio-Kollaborateure
//!
//! - Opus Encoding/Decoding inkl. FEC und PLC
//! - VAD mit Kalibrierung fuer DTX-Gating im Sendepfad
//! - Rauschunterdrueckung vor VAD und Encoder
//! - `CaptureSource` / `OutputSink` als Schnittstellen zur Hardware
//! - Software-Geraete (Sinus-Quelle, Null-Senke) fuer Headless-Betrieb

pub mod codec;
pub mod devices;
pub mod error;
pub mod frame;
pub mod noise;
pub mod vad;

// Bequeme Re-Exporte der wichtigsten Typen
pub use codec::{OpusDecoder, OpusEncoder, SprachDecoder, SprachEncoder};
pub use devices::{KanalCapture, KanalSink, NullSink, SinkStatistik, ToneCapture};
pub use error::{AudioError, AudioResult};
pub use frame::{AudioFrame, CaptureSource, OutputSink};
pub use noise::{NoiseConfig, NoiseSuppressor, SuppressionLevel};
pub use vad::{rms_energy, zero_crossing_rate, Vad, VadConfig};
