//! meshptt-node – Bibliotheks-Root
//!
//! Baut aus einer [`NodeConfig`] einen laufenden Knoten zusammen:
//! Identitaet, `PttCore`, Kanalbeitritte, Observability und die
//! Bedienkonsole.

pub mod bedienung;
pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use meshptt_core::{CryptoProvider, FloorEvent};
use meshptt_crypto::{Ed25519Provider, NodeIdentity};
use meshptt_observability::{observability_server_starten, HealthState, PttMetrics};
use meshptt_session::{AudioFabrik, MulticastFabrik, NetzFabrik, PttCore, SessionEvent, StandardAudio};

use config::NodeConfig;

/// Haelt den laufenden Knoten-Zustand zusammen
pub struct Node {
    config: NodeConfig,
    core: PttCore,
    metriken: PttMetrics,
    health: HealthState,
    shutdown: CancellationToken,
}

impl Node {
    /// Erstellt einen Knoten mit Multicast-Sockets und Testton-Audio
    pub fn neu(config: NodeConfig) -> Result<Self> {
        let identitaet = NodeIdentity::laden_oder_erzeugen(&config.knoten.identitaet)
            .with_context(|| {
                format!(
                    "Identitaet aus '{}' nicht ladbar",
                    config.knoten.identitaet.display()
                )
            })?;
        Self::mit_fabriken(
            config,
            Arc::new(Ed25519Provider::new(identitaet)),
            Arc::new(StandardAudio::default()),
            Arc::new(MulticastFabrik),
        )
    }

    /// Wie [`neu`](Self::neu), mit austauschbaren Kollaborateuren
    pub fn mit_fabriken(
        config: NodeConfig,
        crypto: Arc<dyn CryptoProvider>,
        audio: Arc<dyn AudioFabrik>,
        netz: Arc<dyn NetzFabrik>,
    ) -> Result<Self> {
        config.validieren()?;
        let core = PttCore::new(crypto, config.session_config(), audio, netz)?;
        Ok(Self {
            config,
            core,
            metriken: PttMetrics::neu()?,
            health: HealthState::neu(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn core(&self) -> &PttCore {
        &self.core
    }

    pub fn metriken(&self) -> &PttMetrics {
        &self.metriken
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Loest das Herunterfahren von [`starten`](Self::starten) aus
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Ereignis-Task (Metriken, Health, Logs)
    /// 2. Observability-Server
    /// 3. Konfigurierten Kanaelen beitreten
    /// 4. Bedienkonsole auf stdin
    /// 5. Auf Ctrl-C oder `quit` warten, dann alle Kanaele verlassen
    pub async fn starten(self, konsole: bool) -> Result<()> {
        tracing::info!(
            name = %self.config.knoten.name,
            knoten = %self.core.knoten(),
            rang = %self.config.knoten.rang,
            kanaele = self.config.kanaele.len(),
            "Knoten startet"
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(ereignisse_verarbeiten(
            self.core.subscribe(),
            self.metriken.clone(),
            self.health.clone(),
            self.shutdown.clone(),
        ));

        if self.config.observability.aktiviert {
            let adresse: SocketAddr = self
                .config
                .observability_bind_adresse()
                .parse()
                .context("Ungueltige Observability-Adresse")?;
            let metriken = self.metriken.clone();
            let health = self.health.clone();
            let shutdown = self.shutdown.clone();
            tasks.spawn(async move {
                if let Err(e) =
                    observability_server_starten(adresse, metriken, health, shutdown).await
                {
                    tracing::error!("Observability-Server beendet: {e:#}");
                }
            });
        }

        for kanal in self.config.kanaele.clone() {
            let id = kanal.id.clone();
            match self.core.join_channel(kanal).await {
                Ok(_) => {}
                Err(e) => tracing::error!(kanal = %id, "Beitritt fehlgeschlagen: {e}"),
            }
        }

        if konsole {
            tasks.spawn(bedienung::konsole(self.core.clone(), self.shutdown.clone()));
        }

        tracing::info!("Knoten laeuft. Warte auf Shutdown-Signal (Ctrl-C oder quit)...");
        tokio::select! {
            ergebnis = tokio::signal::ctrl_c() => {
                ergebnis?;
                tracing::info!("Shutdown-Signal empfangen, Knoten wird beendet");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("Beenden angefordert");
            }
        }

        // Kanaele zuerst verlassen, damit Verlassen-Ereignisse noch erfasst werden
        self.core.herunterfahren().await;
        self.shutdown.cancel();
        while tasks.join_next().await.is_some() {}

        tracing::info!("Knoten beendet");
        Ok(())
    }
}

/// Speist Metriken und Health aus dem Ereignisstrom und protokolliert ihn
pub async fn ereignisse_verarbeiten(
    mut rx: broadcast::Receiver<SessionEvent>,
    metriken: PttMetrics,
    health: HealthState,
    shutdown: CancellationToken,
) {
    loop {
        let ereignis = tokio::select! {
            // Rest des Stroms noch abarbeiten
            biased;
            ergebnis = rx.recv() => ergebnis,
            _ = shutdown.cancelled() => break,
        };
        match ereignis {
            Ok(ereignis) => {
                ereignis_loggen(&ereignis);
                metriken.erfassen(&ereignis);
                health.erfassen(&ereignis);
                metriken
                    .channels_degraded
                    .set(health.degradierte_kanaele().len() as i64);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(verpasst = n, "Ereignis-Task kommt nicht hinterher");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn ereignis_loggen(ereignis: &SessionEvent) {
    match ereignis {
        SessionEvent::Floor { kanal, event } => match event {
            FloorEvent::MessageRejected { reason } => {
                tracing::warn!(kanal = %kanal, "Kontrollnachricht verworfen: {reason}")
            }
            FloorEvent::StateChanged { alt, neu } => {
                tracing::debug!(kanal = %kanal, %alt, %neu, "Floor-Zustand")
            }
            other => tracing::info!(kanal = %kanal, ereignis = ?other, "Floor"),
        },
        SessionEvent::Transport { stat } => tracing::debug!(
            kanal = %stat.kanal,
            verlust = stat.verlust_rate,
            jitter_ms = stat.jitter_ms,
            puffer = stat.puffer_tiefe,
            "Transport-Statistik"
        ),
        SessionEvent::Status { kanal, degradiert: true } => {
            tracing::warn!(kanal = %kanal, "Empfang gestoert")
        }
        SessionEvent::Status { kanal, degradiert: false } => {
            tracing::info!(kanal = %kanal, "Empfang wiederhergestellt")
        }
        SessionEvent::SendeFehler { kanal, fehler } => {
            tracing::warn!(kanal = %kanal, "Sendepfad abgebrochen: {fehler}")
        }
        SessionEvent::Beigetreten { kanal } => tracing::info!(kanal = %kanal, "Kanal beigetreten"),
        SessionEvent::Verlassen { kanal } => tracing::info!(kanal = %kanal, "Kanal verlassen"),
    }
}
