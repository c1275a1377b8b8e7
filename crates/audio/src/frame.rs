//! Audio-Frames und Kollaborateur-Schnittstellen
//!
//! Der Kern besitzt keine Audio-Hardware. Aufnahme und Wiedergabe kommen
//! ueber [`CaptureSource`] und [`OutputSink`] von aussen.

use async_trait::async_trait;

use crate::error::AudioResult;

/// 20-ms-Block Mono-PCM (f32, normalisiert -1.0..1.0)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Stiller Frame mit `len` Samples
    pub fn stille(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// RMS-Pegel des Frames
    pub fn pegel(&self) -> f32 {
        crate::vad::rms_energy(&self.samples)
    }

    pub fn ist_stille(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }
}

/// Audio-Quelle (Mikrofon o.ae.), liefert einen Frame alle 20 ms
#[async_trait]
pub trait CaptureSource: Send {
    async fn read_frame(&mut self) -> AudioResult<AudioFrame>;
}

/// Audio-Senke (Lautsprecher o.ae.), nimmt einen Frame alle 20 ms an
#[async_trait]
pub trait OutputSink: Send {
    async fn write_frame(&mut self, frame: AudioFrame) -> AudioResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stiller_frame() {
        let frame = AudioFrame::stille(320, 16_000);
        assert_eq!(frame.len(), 320);
        assert!(frame.ist_stille());
        assert_eq!(frame.pegel(), 0.0);
    }

    #[test]
    fn pegel_eines_konstanten_signals() {
        let frame = AudioFrame::new(vec![0.5; 320], 16_000);
        assert!((frame.pegel() - 0.5).abs() < 1e-4);
        assert!(!frame.ist_stille());
    }
}
