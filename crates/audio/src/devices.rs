//! Software-Geraete fuer Aufnahme und Wiedergabe
//!
//! Echte Soundkarten gehoeren nicht zum Kern. Diese Quellen und Senken
//! dienen dem Headless-Knoten und den Tests: ein Sinus-Generator im
//! 20-ms-Takt, eine zaehlende Null-Senke und eine Senke die Frames in
//! einen Kanal weiterreicht.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::error::{AudioError, AudioResult};
use crate::frame::{AudioFrame, CaptureSource, OutputSink};
use meshptt_protocol::FRAME_MS;

// ---------------------------------------------------------------------------
// ToneCapture
// ---------------------------------------------------------------------------

/// Sinus-Quelle, liefert alle 20 ms einen Frame
pub struct ToneCapture {
    sample_rate: u32,
    frame_size: usize,
    frequenz_hz: f32,
    amplitude: f32,
    phase: f32,
    takt: Interval,
}

impl ToneCapture {
    pub fn new(sample_rate: u32, frequenz_hz: f32, amplitude: f32) -> Self {
        let frame_size = (sample_rate as usize * FRAME_MS as usize) / 1000;
        let mut takt = interval(Duration::from_millis(FRAME_MS as u64));
        takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            sample_rate,
            frame_size,
            frequenz_hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
            takt,
        }
    }

    fn naechster_block(&mut self) -> Vec<f32> {
        let schritt = TAU * self.frequenz_hz / self.sample_rate as f32;
        let mut samples = Vec::with_capacity(self.frame_size);
        for _ in 0..self.frame_size {
            samples.push(self.phase.sin() * self.amplitude);
            self.phase = (self.phase + schritt) % TAU;
        }
        samples
    }
}

#[async_trait]
impl CaptureSource for ToneCapture {
    async fn read_frame(&mut self) -> AudioResult<AudioFrame> {
        self.takt.tick().await;
        let samples = self.naechster_block();
        Ok(AudioFrame::new(samples, self.sample_rate))
    }
}

// ---------------------------------------------------------------------------
// NullSink
// ---------------------------------------------------------------------------

/// Gemeinsam lesbare Zaehler einer [`NullSink`]
#[derive(Debug, Default)]
pub struct SinkStatistik {
    frames: AtomicU64,
    stille_frames: AtomicU64,
    letzter_pegel: Mutex<f32>,
}

impl SinkStatistik {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn stille_frames(&self) -> u64 {
        self.stille_frames.load(Ordering::Relaxed)
    }

    pub fn letzter_pegel(&self) -> f32 {
        *self.letzter_pegel.lock()
    }
}

/// Verwirft Frames und zaehlt sie
#[derive(Default)]
pub struct NullSink {
    statistik: Arc<SinkStatistik>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statistik(&self) -> Arc<SinkStatistik> {
        Arc::clone(&self.statistik)
    }
}

#[async_trait]
impl OutputSink for NullSink {
    async fn write_frame(&mut self, frame: AudioFrame) -> AudioResult<()> {
        self.statistik.frames.fetch_add(1, Ordering::Relaxed);
        if frame.ist_stille() {
            self.statistik.stille_frames.fetch_add(1, Ordering::Relaxed);
        }
        *self.statistik.letzter_pegel.lock() = frame.pegel();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Kanal-Geraete
// ---------------------------------------------------------------------------

/// Reicht wiedergegebene Frames an einen Kanal weiter
pub struct KanalSink {
    tx: mpsc::UnboundedSender<AudioFrame>,
}

impl KanalSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AudioFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OutputSink for KanalSink {
    async fn write_frame(&mut self, frame: AudioFrame) -> AudioResult<()> {
        self.tx
            .send(frame)
            .map_err(|_| AudioError::Geschlossen("Wiedergabe-Kanal".into()))
    }
}

/// Liest aufgenommene Frames aus einem Kanal (ohne eigenen Takt)
pub struct KanalCapture {
    rx: mpsc::Receiver<AudioFrame>,
}

impl KanalCapture {
    pub fn new(kapazitaet: usize) -> (mpsc::Sender<AudioFrame>, Self) {
        let (tx, rx) = mpsc::channel(kapazitaet);
        (tx, Self { rx })
    }
}

#[async_trait]
impl CaptureSource for KanalCapture {
    async fn read_frame(&mut self) -> AudioResult<AudioFrame> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| AudioError::Geschlossen("Aufnahme-Kanal".into()))
    }
}
