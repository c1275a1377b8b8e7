//! # meshptt-observability
//!
//! Observability-Crate fuer meshptt:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber
//!
//! Metriken und Health werden aus dem `SessionEvent`-Strom gespeist.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthResponse, HealthState, HealthStatus};
pub use logging::{log_format_gueltig, log_level_gueltig, logging_initialisieren};
pub use metrics::PttMetrics;

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// Router mit `GET /metrics` und `GET /health`
pub fn observability_router(metriken: PttMetrics, health: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(metriken)
        .merge(
            Router::new()
                .route("/health", get(health::health_handler))
                .with_state(health),
        )
}

/// Startet den Observability-HTTP-Server bis `shutdown` ausgeloest wird
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: PttMetrics,
    health: HealthState,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = observability_router(metriken, health);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
