//! Kanal- und Session-Konfiguration

use std::net::Ipv4Addr;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use meshptt_audio::{NoiseConfig, VadConfig};
use meshptt_core::{ChannelId, Priority, PttError, Result};
use meshptt_floor::{ArbitrationMode, FloorConfig};
use meshptt_protocol::OpusConfig;
use meshptt_voice::{BitrateConfig, JitterBufferConfig, TransportConfig};

/// Standard-Port fuer Kanalgruppen
pub const STANDARD_PORT: u16 = 5004;
/// Laenge des Kanalschluessels in Bytes
pub const SCHLUESSEL_LAENGE: usize = 32;

fn standard_port() -> u16 {
    STANDARD_PORT
}

fn standard_priority_floor() -> Priority {
    Priority::Emergency
}

// ---------------------------------------------------------------------------
// ChannelConfig
// ---------------------------------------------------------------------------

/// Ein Kanal (TOML: `[[kanaele]]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub multicast_address: Ipv4Addr,
    #[serde(default = "standard_port")]
    pub port: u16,
    /// Kanalschluessel (Base64, 32 Bytes); ohne Schluessel unverschluesselt
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Mindestprioritaet, ab der ein Halter verdraengt werden darf
    #[serde(default = "standard_priority_floor")]
    pub priority_floor: Priority,
    /// Ueberschreibt den Arbitrierungsmodus aus `[floor]`
    #[serde(default)]
    pub mode: Option<ArbitrationMode>,
}

impl ChannelConfig {
    pub fn new(id: impl Into<String>, multicast_address: Ipv4Addr, port: u16) -> Self {
        Self {
            id: ChannelId::new(id),
            multicast_address,
            port,
            encryption_key: None,
            priority_floor: standard_priority_floor(),
            mode: None,
        }
    }

    pub fn mit_schluessel(mut self, schluessel: &[u8]) -> Self {
        self.encryption_key = Some(base64::engine::general_purpose::STANDARD.encode(schluessel));
        self
    }

    pub fn mit_modus(mut self, mode: ArbitrationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Dekodierter Kanalschluessel
    pub fn schluessel(&self) -> Result<Option<Vec<u8>>> {
        let Some(kodiert) = &self.encryption_key else {
            return Ok(None);
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(kodiert.trim())
            .map_err(|e| {
                PttError::Konfiguration(format!("Kanalschluessel von {} ist kein Base64: {e}", self.id))
            })?;
        if bytes.len() != SCHLUESSEL_LAENGE {
            return Err(PttError::Konfiguration(format!(
                "Kanalschluessel von {} hat {} Bytes (erwartet {})",
                self.id,
                bytes.len(),
                SCHLUESSEL_LAENGE
            )));
        }
        Ok(Some(bytes))
    }

    pub fn validieren(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(PttError::Konfiguration("Kanal-ID darf nicht leer sein".into()));
        }
        if !self.multicast_address.is_multicast() {
            return Err(PttError::Konfiguration(format!(
                "{}: {} ist keine Multicast-Adresse",
                self.id, self.multicast_address
            )));
        }
        if self.port == 0 {
            return Err(PttError::Konfiguration(format!("{}: Port 0 ist ungueltig", self.id)));
        }
        self.schluessel().map(|_| ())
    }

    /// Floor-Konfiguration mit kanalspezifischem Modus
    pub fn floor_config(&self, basis: &FloorConfig) -> FloorConfig {
        let mut config = basis.clone();
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        config
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Gemeinsame Einstellungen aller Kanaele eines Knotens
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Rang des Knotens fuer die Arbiter-Wahl
    pub rang: Priority,
    pub floor: FloorConfig,
    pub jitter: JitterBufferConfig,
    pub codec: OpusConfig,
    pub transport: TransportConfig,
    pub vad: VadConfig,
    /// Rauschunterdrueckung im Sendepfad
    pub noise: NoiseConfig,
    pub bitrate: BitrateConfig,
}

impl SessionConfig {
    pub fn validieren(&self) -> Result<()> {
        self.floor
            .validieren()
            .and_then(|_| self.jitter.validieren())
            .and_then(|_| self.codec.validieren())
            .and_then(|_| self.transport.validieren())
            .and_then(|_| self.vad.validieren())
            .and_then(|_| self.noise.validieren())
            .map_err(PttError::Konfiguration)
    }
}
