//! Knoten-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Abschnitte haben
//! sinnvolle Standardwerte, ohne `[[kanaele]]` tritt der Knoten jedoch
//! keinem Kanal bei.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use meshptt_audio::{NoiseConfig, VadConfig};
use meshptt_core::Priority;
use meshptt_floor::FloorConfig;
use meshptt_observability::{log_format_gueltig, log_level_gueltig};
use meshptt_protocol::OpusConfig;
use meshptt_session::{ChannelConfig, SessionConfig};
use meshptt_voice::{BitrateConfig, JitterBufferConfig, TransportConfig};

/// Umgebungsvariable mit dem Pfad der Konfigurationsdatei
pub const ENV_CONFIG: &str = "MESHPTT_CONFIG";
pub const STANDARD_PFAD: &str = "meshptt.toml";

/// Vollstaendige Knoten-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub knoten: KnotenEinstellungen,
    pub kanaele: Vec<ChannelConfig>,
    pub floor: FloorConfig,
    pub jitter: JitterBufferConfig,
    pub codec: OpusConfig,
    pub transport: TransportConfig,
    pub vad: VadConfig,
    pub noise: NoiseConfig,
    pub bitrate: BitrateConfig,
    pub logging: LoggingEinstellungen,
    pub observability: ObservabilityEinstellungen,
}

/// Identitaet und Rang des Knotens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnotenEinstellungen {
    /// Anzeigename (nur fuer Logs)
    pub name: String,
    /// Datei mit dem Ed25519-Schluessel; fehlt sie, wird einer erzeugt
    pub identitaet: PathBuf,
    /// Rang fuer die Arbiter-Wahl im zentralen Modus
    pub rang: Priority,
}

impl Default for KnotenEinstellungen {
    fn default() -> Self {
        Self {
            name: "meshptt-knoten".into(),
            identitaet: PathBuf::from("meshptt-identitaet.key"),
            rang: Priority::Normal,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    pub aktiviert: bool,
    pub bind_adresse: String,
    /// Port fuer `/metrics` und `/health` (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind_adresse: "127.0.0.1".into(),
            port: 9300,
        }
    }
}

impl NodeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow!("Konfigurationsdatei '{pfad}' nicht lesbar: {e}")),
        }
    }

    /// Prueft alle Abschnitte; der erste Fehler bricht ab
    pub fn validieren(&self) -> Result<()> {
        if !log_level_gueltig(&self.logging.level) {
            bail!("Ungueltiges Log-Level: {}", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Ungueltiges Log-Format: {}", self.logging.format);
        }

        let mut gesehen = HashSet::new();
        for kanal in &self.kanaele {
            if !gesehen.insert(&kanal.id) {
                bail!("Kanal {} ist mehrfach konfiguriert", kanal.id);
            }
            kanal.validieren()?;
        }

        self.session_config().validieren()?;
        Ok(())
    }

    /// Gemeinsame Einstellungen fuer `PttCore`
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            rang: self.knoten.rang,
            floor: self.floor.clone(),
            jitter: self.jitter.clone(),
            codec: self.codec.clone(),
            transport: self.transport.clone(),
            vad: self.vad.clone(),
            noise: self.noise.clone(),
            bitrate: self.bitrate.clone(),
        }
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!(
            "{}:{}",
            self.observability.bind_adresse, self.observability.port
        )
    }
}
