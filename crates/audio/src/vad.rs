//! Voice Activity Detection (VAD)
//!
//! Energie-basierte VAD kombiniert mit Zero-Crossing-Rate. Waehrend der
//! ersten Frames wird der Grundpegel kalibriert, danach gilt die Schwelle
//! `max(energy_threshold, Grundpegel × Aggressivitaets-Faktor)`.
//!
//! Im Sendepfad unterdrueckt die VAD stille Frames (DTX-Gating).

use serde::{Deserialize, Serialize};

/// Konfiguration fuer die VAD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// VAD-Gating im Sendepfad aktiv
    pub enabled: bool,
    /// 0 (zurueckhaltend) bis 3 (empfindlich)
    pub aggressiveness: u8,
    /// Untere Energie-Schwelle (RMS, normalisiert)
    pub energy_threshold: f32,
    /// Zero-Crossing-Rate oberhalb dieser Schwelle gilt als Rauschen
    pub zcr_threshold: f32,
    /// Frames die nach letzter Aktivitaet noch als aktiv gelten
    pub hangover_frames: u32,
    /// Glaettungsfaktor fuer Energie (0.0 = keine Glaettung)
    pub smoothing: f32,
    /// Anzahl Frames zur Bestimmung des Grundpegels
    pub calibration_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            aggressiveness: 2,
            energy_threshold: 0.001,
            zcr_threshold: 0.3,
            hangover_frames: 8,
            smoothing: 0.9,
            calibration_frames: 10,
        }
    }
}

impl VadConfig {
    /// Faktor auf den kalibrierten Grundpegel (hoeher = unempfindlicher)
    fn aggressivitaets_faktor(&self) -> f32 {
        match self.aggressiveness {
            0 => 2.0,
            1 => 1.5,
            2 => 1.0,
            _ => 0.7,
        }
    }

    pub fn validieren(&self) -> Result<(), String> {
        if self.aggressiveness > 3 {
            return Err(format!(
                "VAD-Aggressivitaet muss zwischen 0 und 3 liegen (war: {})",
                self.aggressiveness
            ));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(format!(
                "VAD-Glaettung muss in [0, 1) liegen (war: {})",
                self.smoothing
            ));
        }
        Ok(())
    }
}

/// Voice Activity Detector
pub struct Vad {
    config: VadConfig,
    smoothed_energy: f32,
    hangover_counter: u32,
    voice_active: bool,
    kalibriert: u32,
    grundpegel_summe: f32,
    grundpegel: Option<f32>,
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            smoothed_energy: 0.0,
            hangover_counter: 0,
            voice_active: false,
            kalibriert: 0,
            grundpegel_summe: 0.0,
            grundpegel: None,
        }
    }

    /// Gibt zurueck ob im letzten verarbeiteten Frame Sprache erkannt wurde
    pub fn is_voice_active(&self) -> bool {
        self.voice_active
    }

    /// `true` solange der Grundpegel noch bestimmt wird
    pub fn kalibriert_noch(&self) -> bool {
        self.grundpegel.is_none() && self.config.calibration_frames > 0
    }

    /// Aktuell wirksame Energie-Schwelle
    pub fn schwelle(&self) -> f32 {
        match self.grundpegel {
            Some(grund) => (grund * self.config.aggressivitaets_faktor())
                .max(self.config.energy_threshold),
            None => self.config.energy_threshold,
        }
    }

    /// Analysiert einen Frame und gibt zurueck ob Sprache aktiv ist.
    ///
    /// Waehrend der Kalibrierung gilt jeder Frame als aktiv, damit der
    /// Anfang einer Uebertragung nicht abgeschnitten wird.
    pub fn detect(&mut self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return false;
        }

        let energy = rms_energy(samples);

        if self.kalibriert_noch() {
            self.grundpegel_summe += energy;
            self.kalibriert += 1;
            if self.kalibriert >= self.config.calibration_frames {
                self.grundpegel = Some(self.grundpegel_summe / self.kalibriert as f32);
            }
            self.smoothed_energy = energy;
            self.voice_active = true;
            return true;
        }

        // Exponentielle Glaettung der Energie
        self.smoothed_energy =
            self.config.smoothing * self.smoothed_energy + (1.0 - self.config.smoothing) * energy;

        let zcr = zero_crossing_rate(samples);
        let energy_active = self.smoothed_energy > self.schwelle();
        // Sprache hat typisch moderate ZCR (nicht zu hoch wie Rauschen)
        let zcr_plausible = zcr < self.config.zcr_threshold;

        if energy_active && zcr_plausible {
            self.hangover_counter = self.config.hangover_frames;
            self.voice_active = true;
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            self.voice_active = true;
        } else {
            self.voice_active = false;
        }

        self.voice_active
    }

    /// Gibt die geglaettete Energie zurueck
    pub fn smoothed_energy(&self) -> f32 {
        self.smoothed_energy
    }

    /// Setzt den Zustand fuer eine neue Uebertragung zurueck (Grundpegel bleibt)
    pub fn reset(&mut self) {
        self.smoothed_energy = 0.0;
        self.hangover_counter = 0;
        self.voice_active = false;
    }

    /// Verwirft auch den kalibrierten Grundpegel
    pub fn neu_kalibrieren(&mut self) {
        self.reset();
        self.kalibriert = 0;
        self.grundpegel_summe = 0.0;
        self.grundpegel = None;
    }
}

/// Berechnet den RMS-Energiewert eines Frames
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Berechnet die normalisierte Zero-Crossing-Rate
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}
