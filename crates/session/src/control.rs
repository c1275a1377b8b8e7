//! Kontroll-Task eines Kanals
//!
//! Einziger Besitzer der [`FloorEngine`]. Alle Eingaben (Aufrufer-Befehle,
//! Kontroll-Frames, Timer, Transport-Status, Sendefehler) laufen durch
//! diesen Task und werden streng nacheinander verarbeitet. Der Task ist
//! zugleich der einzige Schreiber des veroeffentlichten Floor-Zustands.
//!
//! ```text
//! Befehle ----------+
//! Kontroll-Frames --+--> select! --> FloorEngine --> FloorActions
//! Timer ------------+                                 |
//! Status/Fehler ----+        signieren + senden <-----+
//!                            Timer planen      <------+
//!                            Ereignisse        <------+
//!                            watch<FloorState> <------+
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use meshptt_core::{
    ChannelId, CryptoProvider, DenyReason, FloorEvent, FloorOutcome, FloorState, Priority,
    PttError, Result,
};
use meshptt_floor::{FloorAction, FloorEngine, TimerFired, TimerRegistry};
use meshptt_protocol::{ControlRecord, Datagram, SignedControl};
use meshptt_voice::{DatagramVersand, SendeFehler, TransportStat, TransportStatus};

use crate::event::SessionEvent;

/// Groesse der Befehls-Queue pro Kanal
pub const BEFEHL_QUEUE: usize = 16;

// ---------------------------------------------------------------------------
// Befehle
// ---------------------------------------------------------------------------

/// Aufrufer-Befehle an den Kontroll-Task
#[derive(Debug)]
pub enum Befehl {
    Anfordern {
        priority: Priority,
        is_emergency: bool,
        dauer_ms: u32,
        antwort: oneshot::Sender<Result<FloorOutcome>>,
    },
    Freigeben {
        antwort: oneshot::Sender<Result<()>>,
    },
    /// Floor abgeben, Timer abbrechen, Task beenden
    Schliessen { antwort: oneshot::Sender<()> },
}

/// Eingangs-Queues des Kontroll-Tasks
pub struct KontrollEingaenge {
    pub befehle: mpsc::Receiver<Befehl>,
    pub control: mpsc::Receiver<SignedControl>,
    pub status: mpsc::UnboundedReceiver<TransportStatus>,
    pub sende_fehler: mpsc::UnboundedReceiver<SendeFehler>,
    pub statistik: mpsc::UnboundedReceiver<TransportStat>,
    pub timer: mpsc::UnboundedReceiver<TimerFired>,
}

// ---------------------------------------------------------------------------
// KontrollTask
// ---------------------------------------------------------------------------

pub struct KontrollTask {
    kanal: ChannelId,
    engine: FloorEngine,
    timer: TimerRegistry,
    crypto: Arc<dyn CryptoProvider>,
    versand: Arc<dyn DatagramVersand>,
    floor_tx: watch::Sender<FloorState>,
    events: broadcast::Sender<SessionEvent>,
    /// Antwortkanal des laufenden `request_floor`
    ausstehend: Option<oneshot::Sender<Result<FloorOutcome>>>,
    start: Instant,
}

impl KontrollTask {
    pub fn new(
        engine: FloorEngine,
        timer: TimerRegistry,
        crypto: Arc<dyn CryptoProvider>,
        versand: Arc<dyn DatagramVersand>,
        floor_tx: watch::Sender<FloorState>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            kanal: engine.kanal().clone(),
            engine,
            timer,
            crypto,
            versand,
            floor_tx,
            events,
            ausstehend: None,
            start: Instant::now(),
        }
    }

    fn jetzt_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub async fn laufen(mut self, mut ein: KontrollEingaenge, shutdown: CancellationToken) {
        tracing::debug!(kanal = %self.kanal, modus = %self.engine.modus(), "Kontroll-Task gestartet");
        let aktionen = self.engine.starten(self.jetzt_ms());
        self.ausfuehren(aktionen).await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let aktionen = self.engine.schliessen(self.jetzt_ms());
                    self.ausfuehren(aktionen).await;
                    break;
                }
                befehl = ein.befehle.recv() => match befehl {
                    Some(befehl) => {
                        if self.befehl(befehl).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(frame) = ein.control.recv() => self.frame_verarbeiten(frame).await,
                Some(fired) = ein.timer.recv() => {
                    if self.timer.annehmen(fired) {
                        let aktionen = self.engine.timer_fired(fired.kind, self.jetzt_ms());
                        self.ausfuehren(aktionen).await;
                    } else {
                        tracing::trace!(kanal = %self.kanal, timer = ?fired.kind, "Veralteter Timer verworfen");
                    }
                }
                Some(status) = ein.status.recv() => self.status(status).await,
                Some(fehler) = ein.sende_fehler.recv() => self.sendefehler(fehler).await,
                Some(stat) = ein.statistik.recv() => {
                    let _ = self.events.send(SessionEvent::Transport { stat });
                }
            }
        }

        self.timer.alle_abbrechen();
        if let Some(antwort) = self.ausstehend.take() {
            let _ = antwort.send(Ok(FloorOutcome::Denied(DenyReason::ChannelClosed)));
        }
        tracing::debug!(kanal = %self.kanal, "Kontroll-Task beendet");
    }

    /// `true` wenn der Task enden soll
    async fn befehl(&mut self, befehl: Befehl) -> bool {
        match befehl {
            Befehl::Anfordern {
                priority,
                is_emergency,
                dauer_ms,
                antwort,
            } => match self
                .engine
                .request_floor(priority, is_emergency, dauer_ms, self.jetzt_ms())
            {
                Ok(aktionen) => {
                    // Laufende Anfragen lehnt die Engine als InvalidState ab
                    self.ausstehend = Some(antwort);
                    self.ausfuehren(aktionen).await;
                }
                Err(e) => {
                    let _ = antwort.send(Err(e));
                }
            },
            Befehl::Freigeben { antwort } => match self.engine.release_floor(self.jetzt_ms()) {
                Ok(aktionen) => {
                    self.ausfuehren(aktionen).await;
                    let _ = antwort.send(Ok(()));
                }
                Err(e) => {
                    let _ = antwort.send(Err(e));
                }
            },
            Befehl::Schliessen { antwort } => {
                let aktionen = self.engine.schliessen(self.jetzt_ms());
                self.ausfuehren(aktionen).await;
                let _ = antwort.send(());
                return true;
            }
        }
        false
    }

    async fn frame_verarbeiten(&mut self, frame: SignedControl) {
        let knoten = self.engine.knoten();
        if frame.record().sender == knoten {
            // Multicast-Loopback
            return;
        }
        if !frame.verifizieren(self.crypto.as_ref()) {
            tracing::warn!(
                kanal = %self.kanal,
                von = %frame.record().sender,
                "Signatur ungueltig, Kontroll-Frame verworfen"
            );
            let aktionen = self.engine.nachricht_abgelehnt("Signatur ungueltig");
            self.ausfuehren(aktionen).await;
            return;
        }
        let aktionen = self
            .engine
            .handle_incoming_message(frame.record(), self.jetzt_ms());
        self.ausfuehren(aktionen).await;
    }

    async fn status(&mut self, status: TransportStatus) {
        let (aktionen, degradiert) = match status {
            TransportStatus::Degradiert { fehler } => {
                tracing::warn!(kanal = %self.kanal, fehler = %fehler, "Kanal degradiert");
                (self.engine.netz_gestoert(), true)
            }
            TransportStatus::Wiederhergestellt => {
                tracing::info!(kanal = %self.kanal, "Kanal wiederhergestellt");
                (self.engine.netz_wiederhergestellt(), false)
            }
            TransportStatus::KontrollFrameUngueltig { fehler } => {
                let aktionen = self
                    .engine
                    .nachricht_abgelehnt(format!("Frame nicht parsebar: {fehler}"));
                self.ausfuehren(aktionen).await;
                return;
            }
        };
        let _ = self.events.send(SessionEvent::Status {
            kanal: self.kanal.clone(),
            degradiert,
        });
        self.ausfuehren(aktionen).await;
    }

    /// Senden nicht moeglich: Floor abgeben statt stumm zu halten
    async fn sendefehler(&mut self, fehler: SendeFehler) {
        let _ = self.events.send(SessionEvent::SendeFehler {
            kanal: fehler.kanal.clone(),
            fehler: fehler.fehler.clone(),
        });
        if self.engine.state() == FloorState::Granted {
            tracing::warn!(kanal = %self.kanal, fehler = %fehler.fehler, "Floor wird nach Sendefehler freigegeben");
            if let Ok(aktionen) = self.engine.release_floor(self.jetzt_ms()) {
                self.ausfuehren(aktionen).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Aktionen ausfuehren
    // -----------------------------------------------------------------------

    async fn ausfuehren(&mut self, aktionen: Vec<FloorAction>) {
        for aktion in aktionen {
            match aktion {
                FloorAction::Broadcast(record) => {
                    let typ = record.message.name();
                    if let Err(e) = self.senden(record).await {
                        tracing::warn!(kanal = %self.kanal, typ, fehler = %e, "Kontroll-Nachricht nicht gesendet");
                    }
                }
                FloorAction::Schedule(kind, dauer) => self.timer.planen(kind, dauer),
                FloorAction::Cancel(kind) => self.timer.abbrechen(kind),
                FloorAction::Emit(event) => self.melden(event),
                FloorAction::Outcome(ergebnis) => {
                    if let Some(antwort) = self.ausstehend.take() {
                        let _ = antwort.send(Ok(ergebnis));
                    }
                }
            }
        }
        let neu = self.engine.state();
        self.floor_tx.send_if_modified(|zustand| {
            if *zustand != neu {
                *zustand = neu;
                true
            } else {
                false
            }
        });
    }

    async fn senden(&self, record: ControlRecord) -> Result<()> {
        let frame = SignedControl::signieren(record, self.crypto.as_ref())?;
        let bytes = Datagram::Control(frame).encode();
        self.versand
            .senden(&bytes)
            .await
            .map_err(|e| PttError::NetworkUnavailable(e.to_string()))
    }

    fn melden(&self, event: FloorEvent) {
        tracing::debug!(kanal = %self.kanal, ereignis = event.name(), "Floor-Ereignis");
        let _ = self.events.send(SessionEvent::Floor {
            kanal: self.kanal.clone(),
            event,
        });
    }
}
