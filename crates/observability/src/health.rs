//! Health-Check-Endpunkt fuer meshptt
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und degradierten Kanaelen

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use meshptt_session::SessionEvent;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub channels_active: usize,
    pub degraded_channels: Vec<String>,
}

#[derive(Debug, Default)]
struct Kanaele {
    aktiv: BTreeSet<String>,
    degradiert: BTreeSet<String>,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Instant,
    started_at: DateTime<Utc>,
    kanaele: Arc<Mutex<Kanaele>>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Instant::now(),
            started_at: Utc::now(),
            kanaele: Arc::new(Mutex::new(Kanaele::default())),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Verfolgt Beitritte und Degradierungen aus dem Ereignisstrom
    pub fn erfassen(&self, ereignis: &SessionEvent) {
        let mut k = self.kanaele.lock();
        match ereignis {
            SessionEvent::Beigetreten { kanal } => {
                k.aktiv.insert(kanal.as_str().to_string());
            }
            SessionEvent::Verlassen { kanal } => {
                k.aktiv.remove(kanal.as_str());
                k.degradiert.remove(kanal.as_str());
            }
            SessionEvent::Status { kanal, degradiert } => {
                if *degradiert {
                    k.degradiert.insert(kanal.as_str().to_string());
                } else {
                    k.degradiert.remove(kanal.as_str());
                }
            }
            _ => {}
        }
    }

    pub fn degradierte_kanaele(&self) -> Vec<String> {
        self.kanaele.lock().degradiert.iter().cloned().collect()
    }

    pub fn antwort(&self) -> HealthResponse {
        let k = self.kanaele.lock();
        let status = if k.degradiert.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            started_at: self.started_at,
            channels_active: k.aktiv.len(),
            degraded_channels: k.degradiert.iter().cloned().collect(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// `GET /health` – 200 auch bei degraded (Probe soll nicht failen)
pub(crate) async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.antwort()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshptt_core::ChannelId;

    fn status(kanal: &str, degradiert: bool) -> SessionEvent {
        SessionEvent::Status {
            kanal: ChannelId::new(kanal),
            degradiert,
        }
    }

    #[test]
    fn frisch_gestartet_ist_healthy() {
        let state = HealthState::neu();
        let antwort = state.antwort();
        assert_eq!(antwort.status, HealthStatus::Healthy);
        assert!(antwort.uptime_seconds < 5);
        assert!(antwort.degraded_channels.is_empty());
    }

    #[test]
    fn degradierter_kanal_und_erholung() {
        let state = HealthState::neu();
        state.erfassen(&SessionEvent::Beigetreten {
            kanal: ChannelId::new("alpha"),
        });
        state.erfassen(&status("alpha", true));

        let antwort = state.antwort();
        assert_eq!(antwort.status, HealthStatus::Degraded);
        assert_eq!(antwort.channels_active, 1);
        assert_eq!(antwort.degraded_channels, vec!["alpha".to_string()]);

        state.erfassen(&status("alpha", false));
        assert_eq!(state.antwort().status, HealthStatus::Healthy);
    }

    #[test]
    fn verlassen_entfernt_degradierung() {
        let state = HealthState::neu();
        state.erfassen(&status("bravo", true));
        state.erfassen(&SessionEvent::Verlassen {
            kanal: ChannelId::new("bravo"),
        });
        assert!(state.degradierte_kanaele().is_empty());
    }

    #[test]
    fn health_response_serialisierung() {
        let state = HealthState::neu();
        state.erfassen(&status("alpha", true));
        let json = serde_json::to_string(&state.antwort()).unwrap();
        assert!(json.contains("\"status\":\"degraded\""));
        assert!(json.contains("\"degraded_channels\":[\"alpha\"]"));
        assert!(json.contains("\"version\":"));
    }
}
