//! Audio-Kollaborateure pro Kanal
//!
//! Jeder beigetretene Kanal bekommt eine eigene Quelle, Senke und eigene
//! Codec-Instanzen.

use meshptt_audio::{
    CaptureSource, NullSink, OpusDecoder, OpusEncoder, OutputSink, SprachDecoder, SprachEncoder,
    ToneCapture,
};
use meshptt_core::{ChannelId, Result};
use meshptt_protocol::OpusConfig;

pub trait AudioFabrik: Send + Sync + 'static {
    fn capture(&self, kanal: &ChannelId, sample_rate: u32) -> Result<Box<dyn CaptureSource>>;

    fn sink(&self, kanal: &ChannelId) -> Result<Box<dyn OutputSink>>;

    fn encoder(&self, config: &OpusConfig) -> Result<Box<dyn SprachEncoder>> {
        Ok(Box::new(OpusEncoder::new(config.clone())?))
    }

    fn decoder(&self, config: &OpusConfig) -> Result<Box<dyn SprachDecoder>> {
        Ok(Box::new(OpusDecoder::from_config(config)?))
    }
}

/// Headless-Betrieb: Sinuston als Mikrofon, Wiedergabe wird verworfen
#[derive(Debug, Clone)]
pub struct StandardAudio {
    pub ton_hz: f32,
    pub amplitude: f32,
}

impl Default for StandardAudio {
    fn default() -> Self {
        Self {
            ton_hz: 440.0,
            amplitude: 0.3,
        }
    }
}

impl AudioFabrik for StandardAudio {
    fn capture(&self, _kanal: &ChannelId, sample_rate: u32) -> Result<Box<dyn CaptureSource>> {
        Ok(Box::new(ToneCapture::new(sample_rate, self.ton_hz, self.amplitude)))
    }

    fn sink(&self, _kanal: &ChannelId) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(NullSink::new()))
    }
}
