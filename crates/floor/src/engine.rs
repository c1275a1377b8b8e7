//! Floor-Engine eines Kanals
//!
//! Die Engine ist ein reiner Zustandsautomat ohne I/O: Aufrufe und
//! empfangene (bereits verifizierte) Kontroll-Records gehen hinein,
//! [`FloorAction`]s kommen heraus. Der Kontroll-Task der Session fuehrt
//! die Aktionen aus (signieren + senden, Timer planen, Ereignisse
//! veroeffentlichen). Dadurch laesst sich das gesamte Protokoll mit einer
//! simulierten Uhr und einem simulierten Netz testen.
//!
//! ## Ablauf einer Anfrage
//! ```text
//! Idle --request--> PendingRequest --Fenster ohne Vorrang--> Granted
//!                        |                                     |
//!                        +--fremder Grant--> Queued --Release--+
//!                        +--Deny/Timeout--> Idle
//! ```
//!
//! Alle Entscheidungen (Gewinner eines Fensters, Befoerderung aus der
//! Warteschlange, Konflikte zwischen Zuteilungen) folgen derselben
//! Gesamtordnung [`arbitration_order`]. Knoten mit derselben
//! Nachrichtenmenge kommen so unabhaengig von der Ankunftsreihenfolge zum
//! selben Halter.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use meshptt_core::{
    arbitration_order, ChannelId, DenyReason, FloorEvent, FloorGrantRecord, FloorOutcome,
    FloorRequest, FloorState, NodeId, Priority, PttError, RequestId, Result,
};
use meshptt_protocol::{ControlRecord, FloorMessage};

use crate::arbiter::ArbiterWahl;
use crate::config::{ArbitrationMode, FloorConfig};
use crate::lamport::LamportClock;
use crate::queue::RequestQueue;

// ---------------------------------------------------------------------------
// Aktionen und Timer
// ---------------------------------------------------------------------------

/// Timer-Arten der Engine (pro Kanal hoechstens einer je Art)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Ende des Arbitrierungsfensters
    Arbitration,
    /// Verlorenes Fenster: Warten auf den Grant des Gewinners
    GrantWait,
    /// Warten auf die Antwort des Arbiters
    ArbiterWait,
    /// Backoff vor erneuter Anfrage
    Retry,
    /// Eigener Heartbeat als Halter
    Heartbeat,
    /// Ueberwachung des fremden Halters
    HolderTimeout,
    /// Praesenz-Beacon im zentralen Modus
    Presence,
    /// Angefragte Sendedauer abgelaufen
    MaxDuration,
}

const ANFRAGE_TIMER: [TimerKind; 4] = [
    TimerKind::Arbitration,
    TimerKind::GrantWait,
    TimerKind::ArbiterWait,
    TimerKind::Retry,
];

const ALLE_TIMER: [TimerKind; 8] = [
    TimerKind::Arbitration,
    TimerKind::GrantWait,
    TimerKind::ArbiterWait,
    TimerKind::Retry,
    TimerKind::Heartbeat,
    TimerKind::HolderTimeout,
    TimerKind::Presence,
    TimerKind::MaxDuration,
];

/// Auftrag der Engine an ihre Umgebung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloorAction {
    /// Signieren und an die Kanalgruppe senden
    Broadcast(ControlRecord),
    /// Timer (neu) planen, ersetzt einen laufenden derselben Art
    Schedule(TimerKind, Duration),
    Cancel(TimerKind),
    Emit(FloorEvent),
    /// Ergebnis des laufenden `request_floor` (genau einmal pro Anfrage)
    Outcome(FloorOutcome),
}

// ---------------------------------------------------------------------------
// Eigene Anfrage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fenster,
    WartetAufGrant,
    WartetAufArbiter,
    Backoff,
    Eingereiht,
}

#[derive(Debug)]
struct EigeneAnfrage {
    request: FloorRequest,
    phase: Phase,
    versuche: u32,
    ergebnis_offen: bool,
    /// Request wurde an die Gruppe gesendet und steht bei anderen Knoten
    angekuendigt: bool,
}

// ---------------------------------------------------------------------------
// FloorEngine
// ---------------------------------------------------------------------------

pub struct FloorEngine {
    kanal: ChannelId,
    knoten: NodeId,
    priority_floor: Priority,
    config: FloorConfig,
    uhr: Arc<LamportClock>,
    rng: StdRng,
    zustand: FloorState,
    halter: Option<FloorGrantRecord>,
    eigene: Option<EigeneAnfrage>,
    /// Beobachtete Anfragen ohne Halter, mit lokalem Empfangszeitpunkt
    offen: Vec<(FloorRequest, u64)>,
    queue: RequestQueue,
    wahl: ArbiterWahl,
    rueckfall_verteilt: bool,
    netz_gestoert: bool,
    geschlossen: bool,
    aktionen: Vec<FloorAction>,
}

impl FloorEngine {
    pub fn new(
        kanal: ChannelId,
        knoten: NodeId,
        uhr: Arc<LamportClock>,
        config: FloorConfig,
    ) -> Self {
        let wahl = ArbiterWahl::new(knoten, Priority::default(), config.holder_timeout_ms);
        Self {
            kanal,
            knoten,
            priority_floor: Priority::Emergency,
            queue: RequestQueue::new(config.max_queue),
            config,
            uhr,
            rng: StdRng::from_entropy(),
            zustand: FloorState::Idle,
            halter: None,
            eigene: None,
            offen: Vec::new(),
            wahl,
            rueckfall_verteilt: false,
            netz_gestoert: false,
            geschlossen: false,
            aktionen: Vec::new(),
        }
    }

    /// Rang des Knotens fuer die Arbiter-Wahl
    pub fn mit_rang(mut self, rang: Priority) -> Self {
        self.wahl = ArbiterWahl::new(self.knoten, rang, self.config.holder_timeout_ms);
        self
    }

    /// Mindestprioritaet fuer Verdraengung auf diesem Kanal
    pub fn mit_priority_floor(mut self, priority_floor: Priority) -> Self {
        self.priority_floor = priority_floor;
        self
    }

    /// Deterministischer Backoff-Jitter
    pub fn mit_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn state(&self) -> FloorState {
        self.zustand
    }

    pub fn kanal(&self) -> &ChannelId {
        &self.kanal
    }

    pub fn knoten(&self) -> NodeId {
        self.knoten
    }

    pub fn halter(&self) -> Option<&FloorGrantRecord> {
        self.halter.as_ref()
    }

    pub fn warteschlange(&self) -> impl Iterator<Item = &FloorRequest> {
        self.queue.iter()
    }

    /// Eigene Position in der Warteschlange (1-basiert)
    pub fn queue_position(&self) -> Option<usize> {
        self.queue.position(&self.knoten)
    }

    pub fn arbiter(&self) -> Option<NodeId> {
        self.wahl.arbiter()
    }

    pub fn modus(&self) -> ArbitrationMode {
        if self.verteilt() {
            ArbitrationMode::Distributed
        } else {
            ArbitrationMode::Centralized
        }
    }

    // -----------------------------------------------------------------------
    // Operationen
    // -----------------------------------------------------------------------

    /// Startet Praesenz und Wahl (zentraler Modus)
    pub fn starten(&mut self, jetzt_ms: u64) -> Vec<FloorAction> {
        if self.config.mode == ArbitrationMode::Centralized {
            self.wahl_aktualisieren(jetzt_ms);
            self.praesenz_senden();
        }
        self.abholen()
    }

    /// Fordert den Floor an
    ///
    /// Ungueltige Zustaende werden synchron als Fehler gemeldet. Das
    /// Ergebnis folgt als [`FloorAction::Outcome`], sofort oder nach
    /// Ablauf des Arbitrierungsfensters.
    pub fn request_floor(
        &mut self,
        priority: Priority,
        is_emergency: bool,
        requested_duration_ms: u32,
        jetzt_ms: u64,
    ) -> Result<Vec<FloorAction>> {
        match self.zustand {
            FloorState::Idle | FloorState::Taken(_) | FloorState::Error => {}
            andere => return Err(PttError::ungueltiger_zustand("request_floor", andere)),
        }
        if self.geschlossen {
            self.aktionen
                .push(FloorAction::Outcome(FloorOutcome::Denied(DenyReason::ChannelClosed)));
            return Ok(self.abholen());
        }
        if self.netz_gestoert {
            self.aktionen.push(FloorAction::Outcome(FloorOutcome::Denied(
                DenyReason::NetworkUnavailable,
            )));
            return Ok(self.abholen());
        }

        let request = self.anfrage_erstellen(priority, is_emergency, requested_duration_ms, jetzt_ms);
        tracing::info!(
            kanal = %self.kanal,
            request_id = %request.request_id,
            prioritaet = %request.effektive_prioritaet(),
            lamport = request.lamport,
            "Floor angefordert"
        );
        self.eigene = Some(EigeneAnfrage {
            request,
            phase: Phase::Fenster,
            versuche: 0,
            ergebnis_offen: true,
            angekuendigt: false,
        });
        self.anfrage_ausfuehren(jetzt_ms);
        self.zustand_aktualisieren();
        Ok(self.abholen())
    }

    /// Gibt den Floor frei (nur im Zustand `Granted`)
    pub fn release_floor(&mut self, jetzt_ms: u64) -> Result<Vec<FloorAction>> {
        if self.zustand != FloorState::Granted {
            return Err(PttError::ungueltiger_zustand("release_floor", self.zustand));
        }
        self.freigeben(jetzt_ms);
        Ok(self.abholen())
    }

    /// Verarbeitet einen verifizierten Kontroll-Record
    pub fn handle_incoming_message(
        &mut self,
        record: &ControlRecord,
        jetzt_ms: u64,
    ) -> Vec<FloorAction> {
        if record.sender == self.knoten || self.geschlossen {
            return Vec::new();
        }
        if record.channel != self.kanal {
            return self.nachricht_abgelehnt(format!("fremder Kanal {}", record.channel));
        }
        if let Err(e) = record.absender_pruefen() {
            return self.nachricht_abgelehnt(e.to_string());
        }

        self.uhr.beobachten(record.lamport);
        let rang = match &record.message {
            FloorMessage::Heartbeat { rank, .. } => Some(*rank),
            _ => None,
        };
        self.wahl.gesehen(record.sender, rang, jetzt_ms);
        self.wahl_aktualisieren(jetzt_ms);

        tracing::trace!(
            kanal = %self.kanal,
            von = %record.sender,
            typ = record.message.name(),
            lamport = record.lamport,
            "Kontroll-Nachricht"
        );

        match &record.message {
            FloorMessage::Request { request } => self.fremde_anfrage(request.clone(), jetzt_ms),
            FloorMessage::Grant { request } => self.zuteilung_beobachtet(request.clone(), jetzt_ms),
            FloorMessage::Deny {
                target,
                request_id,
                reason,
            } => self.ablehnung_empfangen(*target, *request_id, *reason),
            FloorMessage::Release { holder, request_id } => {
                self.freigabe_empfangen(*holder, *request_id, jetzt_ms)
            }
            FloorMessage::Revoke { target, grant } => {
                self.verdraengung_empfangen(*target, grant.clone(), jetzt_ms)
            }
            FloorMessage::Heartbeat {
                holding: Some(request),
                ..
            } => self.zuteilung_beobachtet(request.clone(), jetzt_ms),
            FloorMessage::Heartbeat { holding: None, .. } => {}
        }

        self.zustand_aktualisieren();
        self.abholen()
    }

    /// Meldet einen verworfenen Frame (Signatur, Absender, Kanal)
    pub fn nachricht_abgelehnt(&mut self, grund: impl Into<String>) -> Vec<FloorAction> {
        let grund = grund.into();
        tracing::warn!(kanal = %self.kanal, grund = %grund, "Kontroll-Nachricht verworfen");
        self.melden(FloorEvent::MessageRejected { reason: grund });
        self.abholen()
    }

    /// Verarbeitet einen abgelaufenen Timer
    pub fn timer_fired(&mut self, kind: TimerKind, jetzt_ms: u64) -> Vec<FloorAction> {
        if self.geschlossen {
            return Vec::new();
        }
        match kind {
            TimerKind::Arbitration => self.fenster_beendet(jetzt_ms),
            TimerKind::GrantWait => {
                if self.phase() == Some(Phase::WartetAufGrant) {
                    tracing::debug!(kanal = %self.kanal, "Kein Grant des Fenster-Gewinners");
                    self.wiederholen();
                }
            }
            TimerKind::ArbiterWait => self.arbiter_antwortet_nicht(jetzt_ms),
            TimerKind::Retry => {
                if self.phase() == Some(Phase::Backoff) {
                    self.anfrage_erneuern(jetzt_ms);
                    self.anfrage_ausfuehren(jetzt_ms);
                }
            }
            TimerKind::Heartbeat => self.heartbeat_senden(jetzt_ms),
            TimerKind::HolderTimeout => self.halter_verloren(jetzt_ms),
            TimerKind::Presence => {
                self.wahl_aktualisieren(jetzt_ms);
                self.praesenz_senden();
            }
            TimerKind::MaxDuration => {
                if self.zustand == FloorState::Granted {
                    tracing::info!(kanal = %self.kanal, "Angefragte Sendedauer abgelaufen");
                    self.freigeben(jetzt_ms);
                }
            }
        }
        self.zustand_aktualisieren();
        self.abholen()
    }

    /// Empfang dauerhaft gestoert: laufende Anfrage scheitert
    pub fn netz_gestoert(&mut self) -> Vec<FloorAction> {
        if !self.netz_gestoert {
            self.netz_gestoert = true;
            self.ablehnen(DenyReason::NetworkUnavailable);
            self.zustand_aktualisieren();
        }
        self.abholen()
    }

    pub fn netz_wiederhergestellt(&mut self) -> Vec<FloorAction> {
        if self.netz_gestoert {
            self.netz_gestoert = false;
            self.zustand_aktualisieren();
        }
        self.abholen()
    }

    /// Beendet die Engine beim Verlassen des Kanals
    pub fn schliessen(&mut self, jetzt_ms: u64) -> Vec<FloorAction> {
        if self.zustand == FloorState::Granted {
            self.freigeben(jetzt_ms);
        }
        self.ablehnen(DenyReason::ChannelClosed);
        self.geschlossen = true;
        for kind in ALLE_TIMER {
            self.abbrechen(kind);
        }
        self.abholen()
    }

    // -----------------------------------------------------------------------
    // Eigene Anfrage
    // -----------------------------------------------------------------------

    fn anfrage_erstellen(
        &self,
        priority: Priority,
        is_emergency: bool,
        requested_duration_ms: u32,
        jetzt_ms: u64,
    ) -> FloorRequest {
        FloorRequest {
            request_id: RequestId::new(),
            requester: self.knoten,
            priority,
            lamport: self.uhr.tick(),
            local_timestamp_ms: jetzt_ms,
            is_emergency,
            requested_duration_ms,
        }
    }

    /// Neue Anfrage mit denselben Parametern (Wiederholung, Rueckfall)
    fn anfrage_erneuern(&mut self, jetzt_ms: u64) {
        let Some(alt) = self.eigene.as_ref().map(|e| e.request.clone()) else {
            return;
        };
        let neu = self.anfrage_erstellen(
            alt.priority,
            alt.is_emergency,
            alt.requested_duration_ms,
            jetzt_ms,
        );
        if let Some(eigene) = self.eigene.as_mut() {
            eigene.request = neu;
            eigene.phase = Phase::Fenster;
        }
    }

    fn anfrage_ausfuehren(&mut self, jetzt_ms: u64) {
        let Some(request) = self.eigene.as_ref().map(|e| e.request.clone()) else {
            return;
        };

        if let Some(halter) = self.halter.clone() {
            if self.kann_verdraengen(&request, &halter.request) {
                self.verdraengen(request, jetzt_ms);
            } else if !self.queue.haette_platz(&self.knoten) {
                self.ablehnen(DenyReason::QueueFull);
            } else {
                self.ankuendigen(request.clone());
                self.eigene_einreihen(request);
            }
            return;
        }

        if self.verteilt() {
            self.ankuendigen(request);
            self.phase_setzen(Phase::Fenster);
            self.planen(TimerKind::Arbitration, self.config.arbitration_window_ms);
            return;
        }

        self.wahl_aktualisieren(jetzt_ms);
        if self.wahl.bin_arbiter() {
            self.senden(FloorMessage::Grant {
                request: request.clone(),
            });
            self.neuer_halter(request, jetzt_ms, false);
        } else {
            self.ankuendigen(request);
            self.phase_setzen(Phase::WartetAufArbiter);
            self.planen(TimerKind::ArbiterWait, self.config.arbiter_timeout_ms);
        }
    }

    fn ankuendigen(&mut self, request: FloorRequest) {
        if let Some(eigene) = self.eigene.as_mut() {
            eigene.angekuendigt = true;
        }
        self.senden_mit_lamport(request.lamport, FloorMessage::Request { request });
    }

    fn fenster_beendet(&mut self, jetzt_ms: u64) {
        if self.phase() != Some(Phase::Fenster) || self.halter.is_some() {
            return;
        }
        let Some(eigene) = self.eigene.as_ref().map(|e| e.request.clone()) else {
            return;
        };
        self.offen_bereinigen(jetzt_ms);

        let vorrang = self
            .offen
            .iter()
            .map(|(r, _)| r)
            .filter(|r| r.geht_vor(&eigene))
            .min_by(|a, b| arbitration_order(a, b))
            .cloned();

        match vorrang {
            None => {
                self.senden(FloorMessage::Grant {
                    request: eigene.clone(),
                });
                self.neuer_halter(eigene, jetzt_ms, true);
            }
            Some(gewinner) => {
                tracing::debug!(
                    kanal = %self.kanal,
                    gewinner = %gewinner.requester,
                    "Arbitrierung verloren, warte auf Grant"
                );
                self.phase_setzen(Phase::WartetAufGrant);
                self.planen(TimerKind::GrantWait, self.config.arbitration_window_ms);
            }
        }
    }

    fn wiederholen(&mut self) {
        let Some(eigene) = self.eigene.as_mut() else {
            return;
        };
        eigene.versuche += 1;
        let versuche = eigene.versuche;
        if versuche > self.config.max_retries {
            tracing::warn!(kanal = %self.kanal, versuche, "Floor-Anfrage ohne Gewinner aufgegeben");
            self.ablehnen(DenyReason::Timeout);
            return;
        }
        eigene.phase = Phase::Backoff;

        let basis = self
            .config
            .retry_backoff_ms
            .saturating_mul(1u64 << (versuche - 1).min(16));
        let jitter = self.rng.gen_range(0..=self.config.retry_backoff_ms);
        tracing::debug!(kanal = %self.kanal, versuche, backoff_ms = basis + jitter, "Anfrage wird wiederholt");
        self.planen(TimerKind::Retry, basis + jitter);
    }

    fn arbiter_antwortet_nicht(&mut self, jetzt_ms: u64) {
        if self.phase() != Some(Phase::WartetAufArbiter) {
            return;
        }
        if let Some(arbiter) = self.wahl.arbiter() {
            tracing::warn!(kanal = %self.kanal, arbiter = %arbiter, "Arbiter antwortet nicht, Rueckfall auf verteilt");
            self.wahl.entfernen(&arbiter);
        }
        self.wahl_aktualisieren(jetzt_ms);
        self.rueckfall_verteilt = true;
        self.anfrage_erneuern(jetzt_ms);
        self.anfrage_ausfuehren(jetzt_ms);
    }

    fn eigene_einreihen(&mut self, request: FloorRequest) {
        let request_id = request.request_id;
        match self.queue.einfuegen(request) {
            Ok(position) => {
                self.phase_setzen(Phase::Eingereiht);
                for kind in ANFRAGE_TIMER {
                    self.abbrechen(kind);
                }
                tracing::info!(kanal = %self.kanal, position, "Floor belegt, Anfrage eingereiht");
                self.melden(FloorEvent::Queued {
                    request_id,
                    position,
                });
                self.ergebnis_melden(FloorOutcome::Queued { position });
            }
            Err(_) => self.ablehnen(DenyReason::QueueFull),
        }
    }

    /// Beendet die eigene Anfrage mit `reason` (ohne Wirkung ohne Anfrage)
    fn ablehnen(&mut self, reason: DenyReason) {
        let Some(eigene) = self.eigene.take() else {
            return;
        };
        self.queue.entfernen_anfrager(&self.knoten);
        for kind in ANFRAGE_TIMER {
            self.abbrechen(kind);
        }
        self.rueckfall_verteilt = false;
        // Andere Knoten halten die Anfrage sonst weiter in Warteschlange
        // oder Fenster und befoerdern spaeter einen Abwesenden
        if eigene.angekuendigt && reason != DenyReason::NetworkUnavailable {
            self.senden(FloorMessage::Release {
                holder: self.knoten,
                request_id: eigene.request.request_id,
            });
        }
        tracing::info!(kanal = %self.kanal, grund = %reason, "Floor-Anfrage abgelehnt");
        self.melden(FloorEvent::Denied {
            request_id: eigene.request.request_id,
            reason,
        });
        if eigene.ergebnis_offen {
            self.aktionen
                .push(FloorAction::Outcome(FloorOutcome::Denied(reason)));
        }
    }

    fn verdraengen(&mut self, request: FloorRequest, jetzt_ms: u64) {
        let Some(halter) = self.halter.as_ref().map(|h| h.request.clone()) else {
            return;
        };
        tracing::warn!(
            kanal = %self.kanal,
            halter = %halter.requester,
            prioritaet = %request.effektive_prioritaet(),
            "Verdraenge aktuellen Halter"
        );
        self.senden(FloorMessage::Revoke {
            target: halter.requester,
            grant: request.clone(),
        });
        let gleichrangig = request.effektive_prioritaet() == halter.effektive_prioritaet();
        self.neuer_halter(request, jetzt_ms, gleichrangig);
    }

    fn freigeben(&mut self, jetzt_ms: u64) {
        let Some(halter) = self.halter.take() else {
            return;
        };
        self.zustand_setzen(FloorState::Releasing);
        self.senden(FloorMessage::Release {
            holder: self.knoten,
            request_id: halter.request.request_id,
        });
        self.abbrechen(TimerKind::Heartbeat);
        self.abbrechen(TimerKind::MaxDuration);
        tracing::info!(kanal = %self.kanal, "Floor freigegeben");
        self.melden(FloorEvent::Released {
            holder: self.knoten,
        });
        self.zustand_setzen(FloorState::Idle);
        self.befoerdern(jetzt_ms);
    }

    // -----------------------------------------------------------------------
    // Empfangene Nachrichten
    // -----------------------------------------------------------------------

    fn fremde_anfrage(&mut self, request: FloorRequest, jetzt_ms: u64) {
        let Some(halter) = self.halter.clone() else {
            let ich_vergebe = !self.verteilt() && self.wahl.bin_arbiter() && self.eigene.is_none();
            if ich_vergebe {
                tracing::debug!(kanal = %self.kanal, an = %request.requester, "Arbiter vergibt Floor");
                self.senden(FloorMessage::Grant {
                    request: request.clone(),
                });
                self.neuer_halter(request, jetzt_ms, false);
            } else {
                self.offen_merken(request, jetzt_ms);
            }
            return;
        };

        if halter.holder() == request.requester || self.kann_verdraengen(&request, &halter.request) {
            return;
        }
        let ich_entscheide = if self.verteilt() {
            halter.holder() == self.knoten
        } else {
            self.wahl.bin_arbiter()
        };
        let target = request.requester;
        let request_id = request.request_id;
        if self.queue.einfuegen(request).is_err() && ich_entscheide {
            tracing::debug!(kanal = %self.kanal, an = %target, "Warteschlange voll");
            self.senden(FloorMessage::Deny {
                target,
                request_id,
                reason: DenyReason::QueueFull,
            });
        }
    }

    /// Grant oder Heartbeat eines Halters
    fn zuteilung_beobachtet(&mut self, request: FloorRequest, jetzt_ms: u64) {
        match self.halter.clone() {
            None if request.requester == self.knoten => {
                let passt = self
                    .eigene
                    .as_ref()
                    .is_some_and(|e| e.request.request_id == request.request_id);
                if passt {
                    self.neuer_halter(request, jetzt_ms, false);
                }
            }
            None => self.neuer_halter(request, jetzt_ms, true),
            Some(halter) if halter.holder() == request.requester => {
                if let Some(h) = self.halter.as_mut() {
                    h.expires_at_ms = jetzt_ms + self.config.holder_timeout_ms;
                }
                if halter.holder() != self.knoten {
                    self.planen(TimerKind::HolderTimeout, self.config.holder_timeout_ms);
                }
            }
            Some(halter) if request.geht_vor(&halter.request) => {
                tracing::info!(
                    kanal = %self.kanal,
                    alt = %halter.holder(),
                    neu = %request.requester,
                    "Konkurrierende Zuteilung, Gesamtordnung entscheidet"
                );
                self.neuer_halter(request, jetzt_ms, true);
            }
            Some(halter) => self.unterlegene_zuteilung(request, &halter, jetzt_ms),
        }
    }

    fn verdraengung_empfangen(&mut self, target: NodeId, grant: FloorRequest, jetzt_ms: u64) {
        match self.halter.clone() {
            None => self.neuer_halter(grant, jetzt_ms, false),
            Some(halter) if halter.holder() == grant.requester => {}
            Some(halter) if self.kann_verdraengen(&grant, &halter.request) => {
                if halter.holder() != target {
                    tracing::debug!(
                        kanal = %self.kanal,
                        ziel = %target,
                        halter = %halter.holder(),
                        "Verdraengung trifft anderen Halter"
                    );
                }
                let gleichrangig = grant.effektive_prioritaet() == halter.priority();
                self.neuer_halter(grant, jetzt_ms, gleichrangig);
            }
            Some(halter) => self.unterlegene_zuteilung(grant, &halter, jetzt_ms),
        }
    }

    /// Eine Zuteilung verliert gegen den bekannten Halter
    fn unterlegene_zuteilung(
        &mut self,
        request: FloorRequest,
        halter: &FloorGrantRecord,
        jetzt_ms: u64,
    ) {
        if request.requester != self.knoten {
            let _ = self.queue.einfuegen(request);
        }
        // Der Unterlegene erfaehrt sofort vom gueltigen Halter
        if halter.holder() == self.knoten {
            self.heartbeat_senden(jetzt_ms);
        }
    }

    fn ablehnung_empfangen(&mut self, target: NodeId, request_id: RequestId, reason: DenyReason) {
        if target == self.knoten {
            let betrifft_mich = self
                .eigene
                .as_ref()
                .is_some_and(|e| e.request.request_id == request_id);
            if betrifft_mich {
                self.ablehnen(reason);
            }
        } else {
            self.queue.entfernen_request(&request_id);
            self.offen.retain(|(r, _)| r.request_id != request_id);
        }
    }

    fn freigabe_empfangen(&mut self, holder: NodeId, request_id: RequestId, jetzt_ms: u64) {
        let ist_halter = self.halter.as_ref().is_some_and(|h| h.holder() == holder);
        if !ist_halter {
            // Zurueckgezogene Anfrage eines Wartenden
            self.queue.entfernen_request(&request_id);
            self.offen.retain(|(r, _)| r.requester != holder);
            return;
        }
        self.halter = None;
        self.abbrechen(TimerKind::HolderTimeout);
        tracing::info!(kanal = %self.kanal, halter = %holder, "Floor freigegeben");
        self.melden(FloorEvent::Released { holder });
        self.zustand_aktualisieren();
        self.befoerdern(jetzt_ms);
    }

    // -----------------------------------------------------------------------
    // Halterwechsel
    // -----------------------------------------------------------------------

    /// Befoerdert die frueheste wartende Anfrage (auf allen Knoten gleich)
    fn befoerdern(&mut self, jetzt_ms: u64) {
        if let Some(naechster) = self.queue.naechster() {
            tracing::debug!(kanal = %self.kanal, neu = %naechster.requester, "Befoerderung aus der Warteschlange");
            self.neuer_halter(naechster, jetzt_ms, false);
        }
    }

    /// Setzt `request` als Halter
    ///
    /// Ein verdraengter bisheriger Halter wird nur bei `wieder_einreihen`
    /// (konkurrierende Zuteilung, gleichrangiger Notfall) in die
    /// Warteschlange zurueckgestellt.
    fn neuer_halter(&mut self, request: FloorRequest, jetzt_ms: u64, wieder_einreihen: bool) {
        let neu = request.requester;

        if let Some(alt) = self.halter.take() {
            if alt.holder() != neu {
                tracing::info!(kanal = %self.kanal, halter = %alt.holder(), durch = %neu, "Floor entzogen");
                self.melden(FloorEvent::Revoked {
                    holder: alt.holder(),
                    by: neu,
                });
                if alt.holder() == self.knoten {
                    self.abbrechen(TimerKind::Heartbeat);
                    self.abbrechen(TimerKind::MaxDuration);
                    self.zustand_setzen(FloorState::Revoked);
                    if wieder_einreihen {
                        self.eigene = Some(EigeneAnfrage {
                            request: alt.request.clone(),
                            phase: Phase::Eingereiht,
                            versuche: 0,
                            ergebnis_offen: false,
                            angekuendigt: true,
                        });
                        self.eigene_einreihen(alt.request);
                    } else {
                        self.zustand_setzen(FloorState::Idle);
                    }
                } else if wieder_einreihen {
                    let _ = self.queue.einfuegen(alt.request);
                }
            }
        }

        self.queue.entfernen_anfrager(&neu);
        self.offen.retain(|(r, _)| r.requester != neu);
        let dauer_ms = request.requested_duration_ms;
        let request_id = request.request_id;
        let priority = request.effektive_prioritaet();
        self.halter = Some(FloorGrantRecord {
            request,
            granted_at_ms: jetzt_ms,
            expires_at_ms: jetzt_ms + self.config.holder_timeout_ms,
        });

        // Alle offenen Anfragen warten jetzt auf diesen Halter
        for (offen, _) in std::mem::take(&mut self.offen) {
            let _ = self.queue.einfuegen(offen);
        }

        if neu == self.knoten {
            for kind in ANFRAGE_TIMER {
                self.abbrechen(kind);
            }
            self.abbrechen(TimerKind::HolderTimeout);
            self.planen(TimerKind::Heartbeat, self.config.heartbeat_interval_ms);
            if dauer_ms > 0 {
                self.planen(TimerKind::MaxDuration, u64::from(dauer_ms));
            }
            tracing::info!(kanal = %self.kanal, prioritaet = %priority, "Floor erhalten");
            self.ergebnis_melden(FloorOutcome::Granted);
            self.eigene = None;
            self.rueckfall_verteilt = false;
        } else {
            self.planen(TimerKind::HolderTimeout, self.config.holder_timeout_ms);
            let eigene = self.eigene.as_ref().map(|e| (e.request.clone(), e.phase));
            if let Some((eigene, phase)) = eigene {
                if phase != Phase::Eingereiht {
                    let halter = self.halter.as_ref().map(|h| h.request.clone());
                    match halter {
                        Some(h) if self.kann_verdraengen(&eigene, &h) => {
                            self.melden_zuteilung(neu, request_id, priority);
                            self.verdraengen(eigene, jetzt_ms);
                            return;
                        }
                        _ => self.eigene_einreihen(eigene),
                    }
                }
            }
        }

        self.melden_zuteilung(neu, request_id, priority);
        self.zustand_aktualisieren();
    }

    fn melden_zuteilung(&mut self, holder: NodeId, request_id: RequestId, priority: Priority) {
        self.melden(FloorEvent::Granted {
            holder,
            request_id,
            priority,
        });
    }

    fn halter_verloren(&mut self, jetzt_ms: u64) {
        let Some(halter) = self.halter.as_ref().map(|h| h.holder()) else {
            return;
        };
        if halter == self.knoten {
            return;
        }
        tracing::warn!(kanal = %self.kanal, halter = %halter, "Halter verloren (keine Heartbeats)");
        self.halter = None;
        self.wahl.entfernen(&halter);
        self.melden(FloorEvent::HolderLost { holder: halter });
        self.queue.leeren();
        self.offen.clear();
        self.wahl_aktualisieren(jetzt_ms);

        // Wartende stellen ihre Anfrage neu
        if self.phase() == Some(Phase::Eingereiht) {
            self.anfrage_erneuern(jetzt_ms);
            self.anfrage_ausfuehren(jetzt_ms);
        }
    }

    fn heartbeat_senden(&mut self, jetzt_ms: u64) {
        let Some(halter) = self.halter.as_mut() else {
            return;
        };
        if halter.holder() != self.knoten {
            return;
        }
        halter.expires_at_ms = jetzt_ms + self.config.holder_timeout_ms;
        let holding = Some(halter.request.clone());
        self.senden(FloorMessage::Heartbeat {
            rank: self.wahl.rang(),
            holding,
        });
        self.planen(TimerKind::Heartbeat, self.config.heartbeat_interval_ms);
    }

    fn praesenz_senden(&mut self) {
        if self.config.mode != ArbitrationMode::Centralized {
            return;
        }
        let halte_selbst = self
            .halter
            .as_ref()
            .is_some_and(|h| h.holder() == self.knoten);
        if !halte_selbst {
            self.senden(FloorMessage::Heartbeat {
                rank: self.wahl.rang(),
                holding: None,
            });
        }
        self.planen(TimerKind::Presence, self.config.heartbeat_interval_ms);
    }

    // -----------------------------------------------------------------------
    // Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn verteilt(&self) -> bool {
        self.config.mode == ArbitrationMode::Distributed || self.rueckfall_verteilt
    }

    fn phase(&self) -> Option<Phase> {
        self.eigene.as_ref().map(|e| e.phase)
    }

    fn phase_setzen(&mut self, phase: Phase) {
        if let Some(eigene) = self.eigene.as_mut() {
            eigene.phase = phase;
        }
    }

    /// Notfall ab `priority_floor`, der in der Gesamtordnung vor dem Halter liegt
    fn kann_verdraengen(&self, request: &FloorRequest, halter: &FloorRequest) -> bool {
        let prio = request.effektive_prioritaet();
        prio.ist_notfall() && prio >= self.priority_floor && request.geht_vor(halter)
    }

    fn wahl_aktualisieren(&mut self, jetzt_ms: u64) {
        if self.config.mode != ArbitrationMode::Centralized {
            return;
        }
        if let Some(arbiter) = self.wahl.waehlen(jetzt_ms) {
            tracing::info!(kanal = %self.kanal, arbiter = %arbiter, "Arbiter gewaehlt");
            self.melden(FloorEvent::ArbiterChanged {
                arbiter: Some(arbiter),
            });
        }
    }

    fn offen_merken(&mut self, request: FloorRequest, jetzt_ms: u64) {
        self.offen.retain(|(r, _)| r.requester != request.requester);
        self.offen.push((request, jetzt_ms));
    }

    fn offen_bereinigen(&mut self, jetzt_ms: u64) {
        let max_alter = 2 * self.config.arbitration_window_ms;
        self.offen
            .retain(|(_, gesehen)| jetzt_ms.saturating_sub(*gesehen) < max_alter);
    }

    fn abgeleiteter_zustand(&self) -> FloorState {
        if let Some(halter) = &self.halter {
            if halter.holder() == self.knoten {
                return FloorState::Granted;
            }
        }
        if self.netz_gestoert {
            return FloorState::Error;
        }
        match (&self.halter, &self.eigene) {
            (_, Some(e)) if e.phase == Phase::Eingereiht => FloorState::Queued,
            (_, Some(_)) => FloorState::PendingRequest,
            (Some(h), None) => FloorState::Taken(h.holder()),
            (None, None) => FloorState::Idle,
        }
    }

    fn zustand_aktualisieren(&mut self) {
        let neu = self.abgeleiteter_zustand();
        self.zustand_setzen(neu);
    }

    fn zustand_setzen(&mut self, neu: FloorState) {
        if neu == self.zustand {
            return;
        }
        let alt = std::mem::replace(&mut self.zustand, neu);
        tracing::debug!(kanal = %self.kanal, alt = %alt, neu = %neu, "Floor-Zustand");
        self.melden(FloorEvent::StateChanged { alt, neu });
    }

    fn ergebnis_melden(&mut self, outcome: FloorOutcome) {
        if let Some(eigene) = self.eigene.as_mut() {
            if eigene.ergebnis_offen {
                eigene.ergebnis_offen = false;
                self.aktionen.push(FloorAction::Outcome(outcome));
            }
        }
    }

    fn senden(&mut self, message: FloorMessage) {
        let lamport = self.uhr.tick();
        self.senden_mit_lamport(lamport, message);
    }

    fn senden_mit_lamport(&mut self, lamport: u64, message: FloorMessage) {
        self.aktionen.push(FloorAction::Broadcast(ControlRecord::new(
            self.kanal.clone(),
            self.knoten,
            lamport,
            message,
        )));
    }

    fn planen(&mut self, kind: TimerKind, dauer_ms: u64) {
        self.aktionen
            .push(FloorAction::Schedule(kind, Duration::from_millis(dauer_ms)));
    }

    fn abbrechen(&mut self, kind: TimerKind) {
        self.aktionen.push(FloorAction::Cancel(kind));
    }

    fn melden(&mut self, event: FloorEvent) {
        self.aktionen.push(FloorAction::Emit(event));
    }

    fn abholen(&mut self) -> Vec<FloorAction> {
        std::mem::take(&mut self.aktionen)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
