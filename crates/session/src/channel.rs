//! Session eines beigetretenen Kanals
//!
//! Pro Kanal laufen vier Tasks: Lese-Schleife, Empfangs-/Wiedergabe-Task,
//! Sende-Task und Kontroll-Task. Sie teilen nur den veroeffentlichten
//! Floor-Zustand (`watch`, ein Schreiber) und begrenzte Queues.
//!
//! ## Abbau
//! 1. Kontroll-Task schliesst die Engine (Freigabe falls Halter, Timer weg)
//! 2. Shutdown-Token beendet alle Tasks, Queues werden verworfen
//! 3. Multicast-Gruppe wird verlassen

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use meshptt_audio::{NoiseSuppressor, Vad};
use meshptt_core::{
    ChannelId, CryptoProvider, DenyReason, FloorOutcome, FloorState, Priority, PttError, Result,
};
use meshptt_floor::{FloorEngine, LamportClock, TimerRegistry};
use meshptt_voice::{
    lese_schleife, BitrateController, Empfaenger, EmpfaengerTeile, KanalTelemetrie, LeseZiele,
    NutzdatenSchutz, SenderTeile, Sendepfad,
};

use crate::anschluss::NetzFabrik;
use crate::audio::AudioFabrik;
use crate::config::{ChannelConfig, SessionConfig};
use crate::control::{Befehl, KontrollEingaenge, KontrollTask, BEFEHL_QUEUE};
use crate::event::SessionEvent;

/// Wartezeit auf den Kontroll-Task beim Verlassen
pub const SCHLIESSEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Gemeinsame Kollaborateure aller Kanaele eines Knotens
pub(crate) struct Umgebung {
    pub crypto: Arc<dyn CryptoProvider>,
    pub config: SessionConfig,
    pub audio: Arc<dyn AudioFabrik>,
    pub netz: Arc<dyn NetzFabrik>,
    pub uhr: Arc<LamportClock>,
    pub events: broadcast::Sender<SessionEvent>,
}

// ---------------------------------------------------------------------------
// KanalHandle
// ---------------------------------------------------------------------------

/// Befehlszugang zu einem Kanal (Clone ist billig)
#[derive(Clone)]
pub struct KanalHandle {
    kanal: ChannelId,
    befehle: mpsc::Sender<Befehl>,
    floor: watch::Receiver<FloorState>,
}

impl KanalHandle {
    pub fn kanal(&self) -> &ChannelId {
        &self.kanal
    }

    pub fn floor_state(&self) -> FloorState {
        *self.floor.borrow()
    }

    pub fn floor_beobachten(&self) -> watch::Receiver<FloorState> {
        self.floor.clone()
    }

    /// Wartet auf das Ergebnis der Arbitrierung
    pub async fn request_floor(
        &self,
        priority: Priority,
        is_emergency: bool,
        dauer_ms: u32,
    ) -> Result<FloorOutcome> {
        let (antwort, rx) = oneshot::channel();
        let befehl = Befehl::Anfordern {
            priority,
            is_emergency,
            dauer_ms,
            antwort,
        };
        if self.befehle.send(befehl).await.is_err() {
            return Ok(FloorOutcome::Denied(DenyReason::ChannelClosed));
        }
        rx.await
            .unwrap_or(Ok(FloorOutcome::Denied(DenyReason::ChannelClosed)))
    }

    pub async fn release_floor(&self) -> Result<()> {
        let (antwort, rx) = oneshot::channel();
        self.befehle
            .send(Befehl::Freigeben { antwort })
            .await
            .map_err(|_| PttError::KanalNichtGefunden(self.kanal.to_string()))?;
        rx.await
            .map_err(|_| PttError::KanalNichtGefunden(self.kanal.to_string()))?
    }
}

// ---------------------------------------------------------------------------
// ChannelSession
// ---------------------------------------------------------------------------

pub struct ChannelSession {
    config: ChannelConfig,
    handle: KanalHandle,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    gruppe_verlassen: Option<Box<dyn FnOnce() -> io::Result<()> + Send + Sync>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChannelSession {
    /// Oeffnet den Anschluss und startet die Tasks des Kanals
    pub(crate) fn beitreten(config: ChannelConfig, umgebung: &Umgebung) -> Result<Self> {
        config.validieren()?;
        let kanal = config.id.clone();
        let schluessel = config.schluessel()?;
        let s = &umgebung.config;

        // Audio vor dem Socket, damit ein Fehler keine Mitgliedschaft hinterlaesst
        let capture = umgebung.audio.capture(&kanal, s.codec.sample_rate.hz())?;
        let sink = umgebung.audio.sink(&kanal)?;
        let encoder = umgebung.audio.encoder(&s.codec)?;
        let decoder = umgebung.audio.decoder(&s.codec)?;

        let anschluss = umgebung.netz.oeffnen(&config, &s.transport)?;

        let (media_tx, media_rx) = mpsc::channel(s.transport.media_queue);
        let (control_tx, control_rx) = mpsc::channel(s.transport.control_queue);
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (stat_tx, stat_rx) = mpsc::unbounded_channel();
        let (fehler_tx, fehler_rx) = mpsc::unbounded_channel();
        let (befehl_tx, befehl_rx) = mpsc::channel(BEFEHL_QUEUE);
        let (floor_tx, floor_rx) = watch::channel(FloorState::Idle);

        let engine = FloorEngine::new(
            kanal.clone(),
            umgebung.crypto.public_key(),
            Arc::clone(&umgebung.uhr),
            config.floor_config(&s.floor),
        )
        .mit_rang(s.rang)
        .mit_priority_floor(config.priority_floor);
        let (timer, timer_rx) = TimerRegistry::new();

        let schutz = NutzdatenSchutz::new(Arc::clone(&umgebung.crypto), schluessel);
        let telemetrie = KanalTelemetrie::new(kanal.clone(), s.codec.bitrate_kbps);

        let empfaenger = Empfaenger::new(
            kanal.clone(),
            &s.jitter,
            s.codec.sample_rate.hz(),
            EmpfaengerTeile {
                decoder,
                sink,
                schutz: schutz.clone(),
                telemetrie: telemetrie.clone(),
                floor: floor_rx.clone(),
            },
        );

        let vad = s.vad.enabled.then(|| Vad::new(s.vad.clone()));
        let mut sendepfad = Sendepfad::new(
            kanal.clone(),
            vad,
            BitrateController::new(
                s.bitrate.clone(),
                s.codec.bitrate_kbps,
                s.codec.min_bitrate_kbps,
                s.codec.max_bitrate_kbps,
            ),
            Duration::from_millis(s.bitrate.intervall_ms),
            SenderTeile {
                capture,
                encoder,
                versand: Arc::clone(&anschluss.versand),
                schutz,
                telemetrie,
                floor: floor_rx.clone(),
                fehler_tx,
            },
        );
        if s.noise.aktiv() {
            sendepfad = sendepfad.mit_rauschunterdrueckung(NoiseSuppressor::new(s.noise.clone()));
        }

        let kontrolle = KontrollTask::new(
            engine,
            timer,
            Arc::clone(&umgebung.crypto),
            Arc::clone(&anschluss.versand),
            floor_tx,
            umgebung.events.clone(),
        );
        let eingaenge = KontrollEingaenge {
            befehle: befehl_rx,
            control: control_rx,
            status: status_rx,
            sende_fehler: fehler_rx,
            statistik: stat_rx,
            timer: timer_rx,
        };

        let shutdown = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(lese_schleife(
                kanal.clone(),
                Arc::clone(&anschluss.empfang),
                LeseZiele {
                    media: media_tx,
                    control: control_tx,
                    status: status_tx,
                },
                s.transport.fehler_bis_degradiert,
                shutdown.child_token(),
            )),
            tokio::spawn(empfaenger.laufen(media_rx, stat_tx, shutdown.child_token())),
            tokio::spawn(sendepfad.laufen(shutdown.child_token())),
            tokio::spawn(kontrolle.laufen(eingaenge, shutdown.child_token())),
        ];

        tracing::info!(
            kanal = %kanal,
            gruppe = %config.multicast_address,
            port = config.port,
            verschluesselt = config.encryption_key.is_some(),
            "Kanal beigetreten"
        );
        let _ = umgebung.events.send(SessionEvent::Beigetreten { kanal: kanal.clone() });

        Ok(Self {
            config,
            handle: KanalHandle {
                kanal,
                befehle: befehl_tx,
                floor: floor_rx,
            },
            shutdown,
            tasks,
            gruppe_verlassen: Some(anschluss.verlassen),
            events: umgebung.events.clone(),
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn handle(&self) -> KanalHandle {
        self.handle.clone()
    }

    /// Baut den Kanal geordnet ab
    pub async fn verlassen(mut self) {
        let kanal = self.handle.kanal.clone();

        let (antwort, rx) = oneshot::channel();
        if self
            .handle
            .befehle
            .send(Befehl::Schliessen { antwort })
            .await
            .is_ok()
            && tokio::time::timeout(SCHLIESSEN_TIMEOUT, rx).await.is_err()
        {
            tracing::warn!(kanal = %kanal, "Kontroll-Task hat das Schliessen nicht bestaetigt");
        }

        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(kanal = %kanal, fehler = %e, "Kanal-Task abgebrochen");
            }
        }

        if let Some(verlassen) = self.gruppe_verlassen.take() {
            if let Err(e) = verlassen() {
                tracing::warn!(kanal = %kanal, fehler = %e, "Gruppe konnte nicht verlassen werden");
            }
        }
        tracing::info!(kanal = %kanal, "Kanal verlassen");
        let _ = self.events.send(SessionEvent::Verlassen { kanal });
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
