//! Opus Encoder/Decoder Wrapper
//!
//! Kapselt audiopus und stellt eine f32-PCM basierte API bereit.
//! Nutzt `OpusConfig` aus meshptt-protocol fuer die Konfiguration.
//!
//! Die Traits [`SprachEncoder`] und [`SprachDecoder`] trennen die
//! Sende-/Empfangspfade vom konkreten Codec.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use tracing::debug;

use crate::error::{AudioError, AudioResult};
use meshptt_protocol::codec::{OpusApplication, OpusConfig, SampleRate as ProtocolSampleRate};

/// OPUS_SET_PACKET_LOSS_PERC_REQUEST
const CTL_PACKET_LOSS_PERC: i32 = 4014;
/// OPUS_SET_DTX_REQUEST
const CTL_DTX: i32 = 4016;

/// Maximale Groesse eines kodierten Frames
const MAX_OPUS_FRAME: usize = 4000;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Kodiert PCM-Frames fuer den Sendepfad
pub trait SprachEncoder: Send {
    fn encode(&mut self, pcm: &[f32]) -> AudioResult<Vec<u8>>;
    /// Setzt die Ziel-Bitrate (wird auf das konfigurierte Fenster begrenzt)
    fn set_bitrate_kbps(&mut self, kbps: u16) -> AudioResult<()>;
    /// Erwarteter Paketverlust in Prozent (steuert FEC-Redundanz)
    fn set_verlust_hinweis(&mut self, prozent: u8) -> AudioResult<()>;
    fn frame_size(&self) -> usize;
}

/// Dekodiert Pakete fuer den Empfangspfad
pub trait SprachDecoder: Send {
    fn decode(&mut self, data: &[u8]) -> AudioResult<Vec<f32>>;
    /// Rekonstruiert den verlorenen Frame aus den FEC-Daten des Folgepakets
    fn decode_fec(&mut self, naechstes: &[u8]) -> AudioResult<Vec<f32>>;
    /// Verschleierung ohne Daten (Packet Loss Concealment)
    fn decode_plc(&mut self) -> AudioResult<Vec<f32>>;
    /// Setzt den Decoder-Zustand fuer einen neuen Strom zurueck
    fn zuruecksetzen(&mut self) -> AudioResult<()>;
    fn frame_size(&self) -> usize;
}

// ---------------------------------------------------------------------------
// OpusEncoder
// ---------------------------------------------------------------------------

/// Opus-Encoder: kodiert f32-PCM zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
    frame_size: usize,
    bitrate_kbps: u16,
}

impl OpusEncoder {
    /// Erstellt einen neuen Encoder mit der gegebenen Konfiguration
    pub fn new(config: OpusConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;

        let sample_rate = protocol_rate_to_audiopus(config.sample_rate);
        let application = protocol_app_to_audiopus(config.application);

        let mut encoder = Encoder::new(sample_rate, Channels::Mono, application)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond((config.bitrate_kbps as i32) * 1000))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        // Komplexitaet setzen (audiopus 0.2 erwartet u8)
        encoder
            .set_complexity(config.complexity)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_vbr(config.vbr_enabled)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_inband_fec(config.fec_enabled)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        // audiopus 0.2 hat kein set_dtx, daher direkt ueber encoder-ctl
        if config.dtx_enabled {
            encoder
                .set_encoder_ctl_request(CTL_DTX, 1)
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        }

        encoder
            .set_encoder_ctl_request(CTL_PACKET_LOSS_PERC, config.packet_loss_percent as i32)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        let frame_size = config.samples_per_frame();

        debug!(
            bitrate_kbps = config.bitrate_kbps,
            sample_rate = config.sample_rate.hz(),
            frame_size,
            "OpusEncoder erstellt"
        );

        Ok(Self {
            encoder,
            bitrate_kbps: config.bitrate_kbps,
            config,
            frame_size,
        })
    }

    /// Gibt die aktuelle Konfiguration zurueck
    pub fn config(&self) -> &OpusConfig {
        &self.config
    }

    /// Aktuelle Ziel-Bitrate
    pub fn bitrate_kbps(&self) -> u16 {
        self.bitrate_kbps
    }
}

impl SprachEncoder for OpusEncoder {
    /// Die Eingabe muss exakt `frame_size()` Samples lang sein.
    fn encode(&mut self, pcm: &[f32]) -> AudioResult<Vec<u8>> {
        if pcm.len() != self.frame_size {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                self.frame_size,
                pcm.len()
            )));
        }

        let mut output = vec![0u8; MAX_OPUS_FRAME];
        let written = self
            .encoder
            .encode_float(pcm, &mut output)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        output.truncate(written);
        Ok(output)
    }

    fn set_bitrate_kbps(&mut self, kbps: u16) -> AudioResult<()> {
        let kbps = self.config.bitrate_begrenzen(kbps);
        if kbps == self.bitrate_kbps {
            return Ok(());
        }
        self.encoder
            .set_bitrate(Bitrate::BitsPerSecond((kbps as i32) * 1000))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        debug!(alt = self.bitrate_kbps, neu = kbps, "Bitrate angepasst");
        self.bitrate_kbps = kbps;
        Ok(())
    }

    fn set_verlust_hinweis(&mut self, prozent: u8) -> AudioResult<()> {
        self.encoder
            .set_encoder_ctl_request(CTL_PACKET_LOSS_PERC, prozent.min(100) as i32)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

// ---------------------------------------------------------------------------
// OpusDecoder
// ---------------------------------------------------------------------------

/// Opus-Decoder: dekodiert Opus-Bytes zu f32-PCM
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate: ProtocolSampleRate,
    frame_size: usize,
}

impl OpusDecoder {
    /// Erstellt einen neuen Decoder (mono, 20-ms-Frames)
    pub fn new(sample_rate: ProtocolSampleRate) -> AudioResult<Self> {
        let decoder = Decoder::new(protocol_rate_to_audiopus(sample_rate), Channels::Mono)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        let frame_size = sample_rate.samples_per_frame();

        debug!(sample_rate = sample_rate.hz(), frame_size, "OpusDecoder erstellt");

        Ok(Self {
            decoder,
            sample_rate,
            frame_size,
        })
    }

    /// Erstellt einen Decoder aus einer OpusConfig
    pub fn from_config(config: &OpusConfig) -> AudioResult<Self> {
        Self::new(config.sample_rate)
    }

    pub fn sample_rate(&self) -> ProtocolSampleRate {
        self.sample_rate
    }

    fn dekodieren(&mut self, data: Option<&[u8]>, fec: bool) -> AudioResult<Vec<f32>> {
        let mut output = vec![0.0f32; self.frame_size];
        let decoded = self
            .decoder
            .decode_float(data, &mut output, fec)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        output.truncate(decoded);
        Ok(output)
    }
}

impl SprachDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> AudioResult<Vec<f32>> {
        self.dekodieren(Some(data), false)
    }

    fn decode_fec(&mut self, naechstes: &[u8]) -> AudioResult<Vec<f32>> {
        self.dekodieren(Some(naechstes), true)
    }

    fn decode_plc(&mut self) -> AudioResult<Vec<f32>> {
        self.dekodieren(None, false)
    }

    fn zuruecksetzen(&mut self) -> AudioResult<()> {
        self.decoder = Decoder::new(protocol_rate_to_audiopus(self.sample_rate), Channels::Mono)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        Ok(())
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn protocol_rate_to_audiopus(rate: ProtocolSampleRate) -> SampleRate {
    match rate {
        ProtocolSampleRate::Hz8000 => SampleRate::Hz8000,
        ProtocolSampleRate::Hz12000 => SampleRate::Hz12000,
        ProtocolSampleRate::Hz16000 => SampleRate::Hz16000,
        ProtocolSampleRate::Hz24000 => SampleRate::Hz24000,
        ProtocolSampleRate::Hz48000 => SampleRate::Hz48000,
    }
}

fn protocol_app_to_audiopus(app: OpusApplication) -> Application {
    match app {
        OpusApplication::Voip => Application::Voip,
        OpusApplication::Audio => Application::Audio,
        OpusApplication::RestrictedLowdelay => Application::LowDelay,
    }
}
