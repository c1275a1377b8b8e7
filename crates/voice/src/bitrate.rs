//! Verlustgesteuerte Bitrate-Anpassung des Encoders
//!
//! ## Strategie
//! - **Loss-basiert**: Verlust ueber der Schwelle -> Bitrate × `reduktion`
//! - **Recovery**: nach `stabile_intervalle` ruhigen Intervallen × `erholung`
//! - Verlusthinweis an Opus = gemessener Verlust in Prozent (0–50)
//!
//! Ein Multicast-Sender hat keinen Rueckkanal. Als Verlustmass dient die
//! Empfangsqualitaet desselben Kanals (siehe `KanalTelemetrie`).

use serde::{Deserialize, Serialize};

/// Obergrenze des Opus-Verlusthinweises
pub const MAX_VERLUST_HINWEIS: u8 = 50;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitrateConfig {
    /// Verlustrate ab der reduziert wird (0.0–1.0)
    pub verlust_schwelle: f64,
    /// Faktor fuer Reduzierung (0.0–1.0)
    pub reduktion: f64,
    /// Faktor fuer Erhoehung pro Recovery-Schritt
    pub erholung: f64,
    /// Ruhige Intervalle vor einer Erhoehung
    pub stabile_intervalle: u32,
    /// Auswertungsintervall in ms
    pub intervall_ms: u64,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            verlust_schwelle: 0.05,
            reduktion: 0.75,
            erholung: 1.1,
            stabile_intervalle: 3,
            intervall_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Aktionen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateAktion {
    Stabil,
    Reduziert { kbps: u16 },
    Erhoeht { kbps: u16 },
}

// ---------------------------------------------------------------------------
// BitrateController
// ---------------------------------------------------------------------------

pub struct BitrateController {
    config: BitrateConfig,
    min_kbps: u16,
    max_kbps: u16,
    aktuell_kbps: u16,
    ruhige_intervalle: u32,
    verlust_hinweis: u8,
}

impl BitrateController {
    pub fn new(config: BitrateConfig, start_kbps: u16, min_kbps: u16, max_kbps: u16) -> Self {
        Self {
            config,
            min_kbps,
            max_kbps,
            aktuell_kbps: start_kbps.clamp(min_kbps, max_kbps),
            ruhige_intervalle: 0,
            verlust_hinweis: 0,
        }
    }

    pub fn aktuell_kbps(&self) -> u16 {
        self.aktuell_kbps
    }

    /// Verlusthinweis fuer den Encoder in Prozent
    pub fn verlust_hinweis(&self) -> u8 {
        self.verlust_hinweis
    }

    /// Wertet die Verlustrate eines Intervalls aus
    pub fn auswerten(&mut self, verlust_rate: f64) -> BitrateAktion {
        let verlust_rate = verlust_rate.clamp(0.0, 1.0);
        self.verlust_hinweis =
            ((verlust_rate * 100.0).round() as u8).min(MAX_VERLUST_HINWEIS);

        if verlust_rate > self.config.verlust_schwelle {
            self.ruhige_intervalle = 0;
            let neu = ((self.aktuell_kbps as f64 * self.config.reduktion).round() as u16)
                .max(self.min_kbps);
            if neu < self.aktuell_kbps {
                self.aktuell_kbps = neu;
                tracing::info!(
                    neue_bitrate_kbps = neu,
                    verlust_prozent = verlust_rate * 100.0,
                    "Paketverlust ueber Schwelle, Bitrate reduziert"
                );
                return BitrateAktion::Reduziert { kbps: neu };
            }
            return BitrateAktion::Stabil;
        }

        self.ruhige_intervalle += 1;
        if self.ruhige_intervalle >= self.config.stabile_intervalle {
            self.ruhige_intervalle = 0;
            // Mindestens 1 kbps Fortschritt, sonst bleibt die Rundung haengen
            let neu = ((self.aktuell_kbps as f64 * self.config.erholung).round() as u16)
                .max(self.aktuell_kbps + 1)
                .min(self.max_kbps);
            if neu > self.aktuell_kbps {
                self.aktuell_kbps = neu;
                tracing::debug!(neue_bitrate_kbps = neu, "Stabile Verbindung, Bitrate erhoeht");
                return BitrateAktion::Erhoeht { kbps: neu };
            }
        }

        BitrateAktion::Stabil
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
