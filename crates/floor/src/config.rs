//! Floor-Konfiguration (TOML-Sektion `[floor]`)

use serde::{Deserialize, Serialize};

/// Arbitrierungsmodus eines Kanals
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationMode {
    /// Selbstzuteilung nach festem Arbitrierungsfenster
    #[default]
    Distributed,
    /// Gewaehlter Arbiter beantwortet Anfragen
    Centralized,
}

impl std::fmt::Display for ArbitrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArbitrationMode::Distributed => write!(f, "distributed"),
            ArbitrationMode::Centralized => write!(f, "centralized"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloorConfig {
    pub mode: ArbitrationMode,
    /// Fenster fuer konkurrierende Anfragen
    pub arbitration_window_ms: u64,
    /// Heartbeat-Intervall des Halters (und Praesenz im zentralen Modus)
    pub heartbeat_interval_ms: u64,
    /// Halter gilt nach dieser Zeit ohne Heartbeat als verloren
    pub holder_timeout_ms: u64,
    /// Wartezeit auf den Arbiter bis zum Rueckfall auf verteilt
    pub arbiter_timeout_ms: u64,
    /// Wiederholungen einer Anfrage ohne Gewinner
    pub max_retries: u32,
    /// Basis des exponentiellen Backoffs (plus Jitter bis zur selben Dauer)
    pub retry_backoff_ms: u64,
    pub max_queue: usize,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            mode: ArbitrationMode::Distributed,
            arbitration_window_ms: 2000,
            heartbeat_interval_ms: 5000,
            holder_timeout_ms: 10_000,
            arbiter_timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 250,
            max_queue: 16,
        }
    }
}

impl FloorConfig {
    pub fn validieren(&self) -> Result<(), String> {
        if self.arbitration_window_ms == 0 {
            return Err("arbitration_window_ms muss groesser 0 sein".into());
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_interval_ms >= self.holder_timeout_ms
        {
            return Err(format!(
                "heartbeat_interval_ms ({}) muss kleiner als holder_timeout_ms ({}) sein",
                self.heartbeat_interval_ms, self.holder_timeout_ms
            ));
        }
        if self.arbiter_timeout_ms == 0 {
            return Err("arbiter_timeout_ms muss groesser 0 sein".into());
        }
        if self.max_queue == 0 {
            return Err("max_queue muss groesser 0 sein".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte_sind_gueltig() {
        let config = FloorConfig::default();
        assert!(config.validieren().is_ok());
        assert_eq!(config.holder_timeout_ms, 2 * config.heartbeat_interval_ms);
    }

    #[test]
    fn teilweise_toml_sektion() {
        let config: FloorConfig = toml::from_str(
            r#"
            mode = "centralized"
            max_queue = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, ArbitrationMode::Centralized);
        assert_eq!(config.max_queue, 4);
        assert_eq!(config.arbitration_window_ms, 2000);
    }

    #[test]
    fn heartbeat_muss_unter_timeout_liegen() {
        let config = FloorConfig {
            heartbeat_interval_ms: 10_000,
            ..FloorConfig::default()
        };
        assert!(config.validieren().is_err());
    }
}
