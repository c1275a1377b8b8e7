//! Rauschunterdrueckung im Sendepfad
//!
//! Band-Energie-Naeherung der spektralen Subtraktion: Der Rauschpegel wird
//! aus leisen Frames geschaetzt (exponentielle Glaettung) und jeder Frame
//! mit `max(boden, 1 - alpha * rauschen / pegel)` skaliert. Der Boden
//! entspricht der maximalen Daempfung der Stufe in dB.

use serde::{Deserialize, Serialize};

use crate::vad::rms_energy;

/// Glaettung der Rauschschaetzung pro Frame
const GLAETTUNG: f32 = 0.95;

/// Stufe der Rauschunterdrueckung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionLevel {
    /// Durchreichen ohne Bearbeitung
    #[default]
    Off,
    /// Buero, ruhige Umgebung (15 dB)
    Low,
    /// Stadt, Fahrzeug (25 dB)
    Moderate,
    /// Wind, Maschinen (35 dB)
    High,
    /// Gefechtslaerm, Industrie (45 dB)
    Extreme,
}

impl SuppressionLevel {
    /// Maximale Daempfung in dB
    pub fn daempfung_db(&self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Low => 15,
            Self::Moderate => 25,
            Self::High => 35,
            Self::Extreme => 45,
        }
    }

    /// Subtraktions-Faktor
    fn alpha(&self) -> f32 {
        match self {
            Self::Off => 0.0,
            Self::Low => 1.5,
            Self::Moderate => 2.5,
            Self::High => 4.0,
            Self::Extreme => 6.0,
        }
    }

    /// Minimaler Gain nach der Subtraktion
    fn boden(&self) -> f32 {
        10f32.powf(-f32::from(self.daempfung_db()) / 20.0)
    }
}

impl std::fmt::Display for SuppressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Off => "off",
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Extreme => "extreme",
        };
        write!(f, "{s}")
    }
}

/// Konfiguration der Rauschunterdrueckung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub level: SuppressionLevel,
    /// Frames unterhalb dieses RMS-Pegels gelten als Rauschen
    pub noise_threshold: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            level: SuppressionLevel::Off,
            noise_threshold: 0.02,
        }
    }
}

impl NoiseConfig {
    pub fn aktiv(&self) -> bool {
        self.level != SuppressionLevel::Off
    }

    pub fn validieren(&self) -> Result<(), String> {
        let t = self.noise_threshold;
        if t <= 0.0 || !(0.0..1.0).contains(&t) {
            return Err(format!(
                "Rausch-Schwelle muss in (0, 1) liegen (war: {})",
                self.noise_threshold
            ));
        }
        Ok(())
    }
}

/// Rauschunterdruecker fuer 20-ms-Frames
pub struct NoiseSuppressor {
    config: NoiseConfig,
    rauschpegel: f32,
}

impl NoiseSuppressor {
    pub fn new(config: NoiseConfig) -> Self {
        Self {
            config,
            rauschpegel: 0.0,
        }
    }

    pub fn level(&self) -> SuppressionLevel {
        self.config.level
    }

    pub fn set_level(&mut self, level: SuppressionLevel) {
        self.config.level = level;
    }

    /// Geschaetzter Rauschpegel (RMS)
    pub fn rauschpegel(&self) -> f32 {
        self.rauschpegel
    }

    /// Bearbeitet einen Frame in-place
    pub fn process(&mut self, samples: &mut [f32]) {
        let level = self.config.level;
        if level == SuppressionLevel::Off || samples.is_empty() {
            return;
        }

        let pegel = rms_energy(samples);
        if pegel < self.config.noise_threshold {
            self.rauschpegel = GLAETTUNG * self.rauschpegel + (1.0 - GLAETTUNG) * pegel;
        }
        if self.rauschpegel < 1e-7 {
            return;
        }

        let boden = level.boden();
        let gain = if pegel > 1e-7 {
            (1.0 - level.alpha() * self.rauschpegel / pegel).clamp(boden, 1.0)
        } else {
            boden
        };
        for sample in samples.iter_mut() {
            *sample *= gain;
        }
    }

    pub fn reset(&mut self) {
        self.rauschpegel = 0.0;
    }
}
