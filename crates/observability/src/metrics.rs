//! Prometheus-kompatible Metriken fuer meshptt
//!
//! Registrierte Metriken:
//! - `meshptt_channels_active` – Gauge: beigetretene Kanaele
//! - `meshptt_channels_degraded` – Gauge: Kanaele mit gestoertem Empfang
//! - `meshptt_floor_grants_total` – Counter: beobachtete Zuteilungen
//! - `meshptt_floor_denials_total` – Counter (reason): eigene Ablehnungen
//! - `meshptt_floor_revocations_total` – Counter: Verdraengungen
//! - `meshptt_floor_rejected_messages_total` – Counter: verworfene Kontroll-Frames
//! - `meshptt_voice_loss_ratio` – Histogram: Verlustrate pro Statistik-Intervall
//! - `meshptt_voice_jitter_seconds` – Histogram: Jitter
//! - `meshptt_voice_buffer_depth` – Gauge (kanal): Pakete im Jitter Buffer
//! - `meshptt_voice_concealed_frames_total` – Counter: verdeckte Frames

use anyhow::Result;
use axum::{extract::State, response::IntoResponse};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use meshptt_core::FloorEvent;
use meshptt_session::SessionEvent;

/// Alle meshptt-Prometheus-Metriken
#[derive(Clone)]
pub struct PttMetrics {
    pub registry: Arc<Registry>,

    // Kanaele
    pub channels_active: IntGauge,
    pub channels_degraded: IntGauge,

    // Floor
    pub floor_grants_total: IntCounter,
    pub floor_denials_total: IntCounterVec,
    pub floor_revocations_total: IntCounter,
    pub floor_rejected_messages_total: IntCounter,

    // Voice
    pub voice_loss_ratio: Histogram,
    pub voice_jitter_seconds: Histogram,
    pub voice_buffer_depth: IntGaugeVec,
    pub voice_concealed_frames_total: IntCounter,
}

impl PttMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Kanaele ---
        let channels_active = IntGauge::with_opts(Opts::new(
            "meshptt_channels_active",
            "Anzahl beigetretener Kanaele",
        ))?;
        registry.register(Box::new(channels_active.clone()))?;

        let channels_degraded = IntGauge::with_opts(Opts::new(
            "meshptt_channels_degraded",
            "Anzahl Kanaele mit gestoertem Empfang",
        ))?;
        registry.register(Box::new(channels_degraded.clone()))?;

        // --- Floor ---
        let floor_grants_total = IntCounter::with_opts(Opts::new(
            "meshptt_floor_grants_total",
            "Beobachtete Floor-Zuteilungen",
        ))?;
        registry.register(Box::new(floor_grants_total.clone()))?;

        let floor_denials_total = IntCounterVec::new(
            Opts::new("meshptt_floor_denials_total", "Abgelehnte eigene Anfragen"),
            &["reason"],
        )?;
        registry.register(Box::new(floor_denials_total.clone()))?;

        let floor_revocations_total = IntCounter::with_opts(Opts::new(
            "meshptt_floor_revocations_total",
            "Durch Notfaelle verdraengte Halter",
        ))?;
        registry.register(Box::new(floor_revocations_total.clone()))?;

        let floor_rejected_messages_total = IntCounter::with_opts(Opts::new(
            "meshptt_floor_rejected_messages_total",
            "Verworfene Kontroll-Nachrichten (Signatur, Format, Kanal)",
        ))?;
        registry.register(Box::new(floor_rejected_messages_total.clone()))?;

        // --- Voice ---
        let voice_loss_ratio = Histogram::with_opts(
            HistogramOpts::new("meshptt_voice_loss_ratio", "Verlustrate (0.0 bis 1.0)")
                .buckets(vec![0.0, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
        )?;
        registry.register(Box::new(voice_loss_ratio.clone()))?;

        let voice_jitter_seconds = Histogram::with_opts(
            HistogramOpts::new("meshptt_voice_jitter_seconds", "Voice-Jitter in Sekunden")
                .buckets(vec![0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1]),
        )?;
        registry.register(Box::new(voice_jitter_seconds.clone()))?;

        let voice_buffer_depth = IntGaugeVec::new(
            Opts::new("meshptt_voice_buffer_depth", "Pakete im Jitter Buffer"),
            &["kanal"],
        )?;
        registry.register(Box::new(voice_buffer_depth.clone()))?;

        let voice_concealed_frames_total = IntCounter::with_opts(Opts::new(
            "meshptt_voice_concealed_frames_total",
            "Durch FEC oder PLC ersetzte Frames",
        ))?;
        registry.register(Box::new(voice_concealed_frames_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            channels_active,
            channels_degraded,
            floor_grants_total,
            floor_denials_total,
            floor_revocations_total,
            floor_rejected_messages_total,
            voice_loss_ratio,
            voice_jitter_seconds,
            voice_buffer_depth,
            voice_concealed_frames_total,
        })
    }

    /// Aktualisiert die Metriken aus einem Session-Ereignis
    pub fn erfassen(&self, ereignis: &SessionEvent) {
        match ereignis {
            SessionEvent::Floor { event, .. } => match event {
                FloorEvent::Granted { .. } => self.floor_grants_total.inc(),
                FloorEvent::Denied { reason, .. } => self
                    .floor_denials_total
                    .with_label_values(&[&reason.to_string()])
                    .inc(),
                FloorEvent::Revoked { .. } => self.floor_revocations_total.inc(),
                FloorEvent::MessageRejected { .. } => self.floor_rejected_messages_total.inc(),
                _ => {}
            },
            SessionEvent::Transport { stat } => {
                // Intervalle ohne Empfang verfaelschen die Verteilung
                if stat.pakete_empfangen > 0 || stat.pakete_verloren > 0 {
                    self.voice_loss_ratio.observe(stat.verlust_rate);
                    self.voice_jitter_seconds.observe(stat.jitter_ms / 1000.0);
                }
                self.voice_buffer_depth
                    .with_label_values(&[stat.kanal.as_str()])
                    .set(stat.puffer_tiefe as i64);
                self.voice_concealed_frames_total.inc_by(stat.frames_verdeckt);
            }
            SessionEvent::Beigetreten { .. } => self.channels_active.inc(),
            SessionEvent::Verlassen { kanal } => {
                self.channels_active.dec();
                let _ = self.voice_buffer_depth.remove_label_values(&[kanal.as_str()]);
            }
            SessionEvent::Status { .. } | SessionEvent::SendeFehler { .. } => {}
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// `GET /metrics`
pub(crate) async fn metrics_handler(State(metriken): State<PttMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
