//! Codec-Konfiguration fuer die Sprachuebertragung
//!
//! Definiert die Opus-Konfiguration des Sprachprofils und ein paar
//! vordefinierte Presets. Alle Knoten eines Kanals muessen dieselbe
//! Abtastrate verwenden; die Bitrate darf jeder Sender selbst anpassen.

use serde::{Deserialize, Serialize};

/// Laenge eines Audio-Frames in Millisekunden (fest)
pub const FRAME_MS: u32 = 20;

// ---------------------------------------------------------------------------
// Opus-Konfiguration
// ---------------------------------------------------------------------------

/// Abtastrate fuer Opus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    /// 8 kHz – Schmalband (Funk-Qualitaet)
    Hz8000 = 8000,
    /// 12 kHz – Mittelband
    Hz12000 = 12000,
    /// 16 kHz – Breitband (Standard fuer Sprache)
    #[default]
    Hz16000 = 16000,
    /// 24 kHz – Superbreitband
    Hz24000 = 24000,
    /// 48 kHz – Vollband
    Hz48000 = 48000,
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        *self as u32
    }

    /// Samples pro 20-ms-Frame (mono)
    pub fn samples_per_frame(&self) -> usize {
        (self.hz() * FRAME_MS / 1000) as usize
    }
}

/// Opus-Anwendungsmodus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    /// Optimiert fuer Sprachverstaendlichkeit (VOIP)
    #[default]
    Voip,
    /// Optimiert fuer allgemeine Audio-Qualitaet
    Audio,
    /// Minimale Verarbeitungsverzoegerung
    RestrictedLowdelay,
}

/// Opus-Codec-Konfiguration (immer mono, 20-ms-Frames)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    /// Start-Bitrate in kbps
    pub bitrate_kbps: u16,
    /// Untere Grenze der Bitrate-Anpassung
    pub min_bitrate_kbps: u16,
    /// Obere Grenze der Bitrate-Anpassung
    pub max_bitrate_kbps: u16,
    pub sample_rate: SampleRate,
    pub application: OpusApplication,
    /// In-Band Forward Error Correction aktivieren
    pub fec_enabled: bool,
    /// Discontinuous Transmission aktivieren
    pub dtx_enabled: bool,
    /// Komplexitaet (0–10, hoeher = bessere Qualitaet, mehr CPU)
    pub complexity: u8,
    /// Variable Bitrate aktivieren
    pub vbr_enabled: bool,
    /// Anfaenglicher Paketverlust-Hinweis in Prozent (0–100)
    pub packet_loss_percent: u8,
}

impl Default for OpusConfig {
    fn default() -> Self {
        AudioPreset::Speech.config()
    }
}

impl OpusConfig {
    /// Samples pro Frame bei der konfigurierten Abtastrate
    pub fn samples_per_frame(&self) -> usize {
        self.sample_rate.samples_per_frame()
    }

    /// Begrenzt eine Bitrate auf das konfigurierte Fenster
    pub fn bitrate_begrenzen(&self, kbps: u16) -> u16 {
        kbps.clamp(self.min_bitrate_kbps, self.max_bitrate_kbps)
    }

    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if self.min_bitrate_kbps < 6 || self.max_bitrate_kbps > 510 {
            return Err(format!(
                "Bitrate-Grenzen muessen zwischen 6 und 510 kbps liegen (war: {}–{})",
                self.min_bitrate_kbps, self.max_bitrate_kbps
            ));
        }
        if self.min_bitrate_kbps > self.max_bitrate_kbps {
            return Err(format!(
                "Minimale Bitrate {} liegt ueber der maximalen {}",
                self.min_bitrate_kbps, self.max_bitrate_kbps
            ));
        }
        if self.bitrate_kbps < self.min_bitrate_kbps || self.bitrate_kbps > self.max_bitrate_kbps
        {
            return Err(format!(
                "Start-Bitrate {} ausserhalb von {}–{} kbps",
                self.bitrate_kbps, self.min_bitrate_kbps, self.max_bitrate_kbps
            ));
        }
        if self.complexity > 10 {
            return Err(format!(
                "Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.complexity
            ));
        }
        if self.packet_loss_percent > 100 {
            return Err(format!(
                "Verlust-Hinweis muss zwischen 0 und 100 liegen (war: {})",
                self.packet_loss_percent
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audio-Presets
// ---------------------------------------------------------------------------

/// Vordefinierte Konfigurationen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPreset {
    /// Sprachprofil: 16 kHz, 12 kbps, FEC und DTX aktiv
    Speech,
    /// Minimale Bandbreite fuer schlechte Mesh-Strecken
    LowBandwidth,
}

impl AudioPreset {
    /// Gibt die vordefinierte `OpusConfig` fuer dieses Preset zurueck
    pub fn config(&self) -> OpusConfig {
        match self {
            AudioPreset::Speech => OpusConfig {
                bitrate_kbps: 12,
                min_bitrate_kbps: 6,
                max_bitrate_kbps: 24,
                sample_rate: SampleRate::Hz16000,
                application: OpusApplication::Voip,
                fec_enabled: true,
                dtx_enabled: true,
                complexity: 5,
                vbr_enabled: true,
                packet_loss_percent: 5,
            },
            AudioPreset::LowBandwidth => OpusConfig {
                bitrate_kbps: 6,
                min_bitrate_kbps: 6,
                max_bitrate_kbps: 12,
                sample_rate: SampleRate::Hz8000,
                application: OpusApplication::Voip,
                fec_enabled: true,
                dtx_enabled: true,
                complexity: 3,
                vbr_enabled: true,
                packet_loss_percent: 10,
            },
        }
    }

    /// Gibt den menschenlesbaren Namen des Presets zurueck
    pub fn bezeichnung(&self) -> &'static str {
        match self {
            AudioPreset::Speech => "Sprache",
            AudioPreset::LowBandwidth => "Niedrige Bandbreite",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
