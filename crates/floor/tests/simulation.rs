//! Mehrknoten-Simulation der Floor-Kontrolle
//!
//! Mehrere Engines teilen ein simuliertes Netz ohne Verzoegerung und eine
//! virtuelle Uhr. Broadcasts werden in FIFO-Reihenfolge an alle anderen
//! Knoten zugestellt, Timer feuern in der Reihenfolge ihrer Faelligkeit.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use meshptt_core::{
    ChannelId, FloorEvent, FloorOutcome, FloorState, NodeId, Priority, Result,
};
use meshptt_floor::{
    ArbitrationMode, FloorAction, FloorConfig, FloorEngine, LamportClock, TimerKind,
};
use meshptt_protocol::{ControlRecord, FloorMessage};

struct Knoten {
    engine: FloorEngine,
    timer: HashMap<TimerKind, u64>,
    ergebnisse: Vec<FloorOutcome>,
    ereignisse: Vec<FloorEvent>,
    ausgefallen: bool,
}

struct Netz {
    knoten: Vec<Knoten>,
    jetzt: u64,
    unterwegs: VecDeque<(usize, ControlRecord)>,
    gesendet: Vec<(usize, FloorMessage)>,
}

fn id(i: usize) -> NodeId {
    NodeId::from_bytes([i as u8 + 1; 32])
}

impl Netz {
    fn new(anzahl: usize, mode: ArbitrationMode) -> Self {
        Self::mit_uhren(&vec![0; anzahl], mode)
    }

    /// Startwerte der Lamport-Uhren pro Knoten
    fn mit_uhren(uhren: &[u64], mode: ArbitrationMode) -> Self {
        let config = FloorConfig {
            mode,
            ..FloorConfig::default()
        };
        let knoten = uhren
            .iter()
            .enumerate()
            .map(|(i, start)| Knoten {
                engine: FloorEngine::new(
                    ChannelId::new("alpha"),
                    id(i),
                    Arc::new(LamportClock::mit_wert(*start)),
                    config.clone(),
                )
                .mit_seed(i as u64),
                timer: HashMap::new(),
                ergebnisse: Vec::new(),
                ereignisse: Vec::new(),
                ausgefallen: false,
            })
            .collect();
        let mut netz = Self {
            knoten,
            jetzt: 0,
            unterwegs: VecDeque::new(),
            gesendet: Vec::new(),
        };
        for i in 0..netz.knoten.len() {
            let aktionen = netz.knoten[i].engine.starten(0);
            netz.anwenden(i, aktionen);
        }
        netz
    }

    fn anwenden(&mut self, i: usize, aktionen: Vec<FloorAction>) {
        for aktion in aktionen {
            match aktion {
                FloorAction::Broadcast(record) => {
                    self.gesendet.push((i, record.message.clone()));
                    self.unterwegs.push_back((i, record));
                }
                FloorAction::Schedule(kind, dauer) => {
                    self.knoten[i]
                        .timer
                        .insert(kind, self.jetzt + dauer.as_millis() as u64);
                }
                FloorAction::Cancel(kind) => {
                    self.knoten[i].timer.remove(&kind);
                }
                FloorAction::Emit(event) => self.knoten[i].ereignisse.push(event),
                FloorAction::Outcome(outcome) => self.knoten[i].ergebnisse.push(outcome),
            }
        }
    }

    fn zustellen(&mut self) {
        while let Some((von, record)) = self.unterwegs.pop_front() {
            if self.knoten[von].ausgefallen {
                continue;
            }
            for i in 0..self.knoten.len() {
                if i == von || self.knoten[i].ausgefallen {
                    continue;
                }
                let aktionen = self.knoten[i]
                    .engine
                    .handle_incoming_message(&record, self.jetzt);
                self.anwenden(i, aktionen);
            }
        }
    }

    /// Laesst Zeit vergehen, bis `ende` erreicht ist
    fn laufen_bis(&mut self, ende: u64) {
        loop {
            self.zustellen();
            self.exklusivitaet_pruefen();
            let naechster = self
                .knoten
                .iter()
                .enumerate()
                .filter(|(_, k)| !k.ausgefallen)
                .flat_map(|(i, k)| k.timer.iter().map(move |(kind, t)| (*t, i, *kind)))
                .filter(|(t, _, _)| *t <= ende)
                .min_by_key(|(t, i, _)| (*t, *i));
            let Some((t, i, kind)) = naechster else {
                break;
            };
            self.jetzt = t;
            self.knoten[i].timer.remove(&kind);
            let aktionen = self.knoten[i].engine.timer_fired(kind, t);
            self.anwenden(i, aktionen);
        }
        self.jetzt = ende;
    }

    fn anfragen(&mut self, i: usize, prio: Priority, notfall: bool) -> Result<()> {
        let aktionen = self.knoten[i]
            .engine
            .request_floor(prio, notfall, 0, self.jetzt)?;
        self.anwenden(i, aktionen);
        Ok(())
    }

    fn freigeben(&mut self, i: usize) -> Result<()> {
        let aktionen = self.knoten[i].engine.release_floor(self.jetzt)?;
        self.anwenden(i, aktionen);
        Ok(())
    }

    /// Knoten verlaesst den Kanal; seine letzten Nachrichten gehen noch raus
    fn verlassen(&mut self, i: usize) {
        let aktionen = self.knoten[i].engine.schliessen(self.jetzt);
        self.anwenden(i, aktionen);
        self.zustellen();
        self.knoten[i].ausgefallen = true;
    }

    fn zustand(&self, i: usize) -> FloorState {
        self.knoten[i].engine.state()
    }

    fn halter(&self) -> Vec<usize> {
        (0..self.knoten.len())
            .filter(|i| !self.knoten[*i].ausgefallen && self.zustand(*i) == FloorState::Granted)
            .collect()
    }

    fn warteschlange(&self, i: usize) -> Vec<NodeId> {
        self.knoten[i]
            .engine
            .warteschlange()
            .map(|r| r.requester)
            .collect()
    }

    fn exklusivitaet_pruefen(&self) {
        let halter = self.halter();
        assert!(
            halter.len() <= 1,
            "mehrere Sender gleichzeitig: {:?} bei t={}",
            halter,
            self.jetzt
        );
    }

    /// Alle Knoten sehen denselben Halter
    fn einig(&self) -> Option<usize> {
        let halter = self.halter();
        let h = *halter.first()?;
        for i in 0..self.knoten.len() {
            if i == h || self.knoten[i].ausgefallen {
                continue;
            }
            let sicht = self.knoten[i].engine.halter().map(|g| g.holder());
            assert_eq!(sicht, Some(id(h)), "Knoten {i} sieht anderen Halter");
        }
        Some(h)
    }

    fn gesendet_von(&self, i: usize, seit: usize) -> Vec<&FloorMessage> {
        self.gesendet[seit..]
            .iter()
            .filter(|(von, _)| *von == i)
            .map(|(_, m)| m)
            .collect()
    }
}

fn permutationen(n: usize) -> Vec<Vec<usize>> {
    fn rek(rest: Vec<usize>, praefix: Vec<usize>, aus: &mut Vec<Vec<usize>>) {
        if rest.is_empty() {
            aus.push(praefix);
            return;
        }
        for (k, x) in rest.iter().enumerate() {
            let mut r = rest.clone();
            r.remove(k);
            let mut p = praefix.clone();
            p.push(*x);
            rek(r, p, aus);
        }
    }
    let mut aus = Vec::new();
    rek((0..n).collect(), Vec::new(), &mut aus);
    aus
}

// ---------------------------------------------------------------------------
// Szenarien
// ---------------------------------------------------------------------------

#[test]
fn abc_freigabe_befoerdert_ohne_nachrichten() {
    let mut netz = Netz::new(3, ArbitrationMode::Distributed);
    let (a, b, c) = (0, 1, 2);

    netz.anfragen(a, Priority::Normal, false).unwrap();
    netz.laufen_bis(2_500);
    assert_eq!(netz.einig(), Some(a));

    netz.anfragen(b, Priority::Normal, false).unwrap();
    netz.laufen_bis(2_600);
    netz.anfragen(c, Priority::Normal, false).unwrap();
    netz.laufen_bis(2_700);

    for i in [a, b, c] {
        assert_eq!(netz.warteschlange(i), vec![id(b), id(c)]);
    }
    assert_eq!(netz.knoten[b].ergebnisse, vec![FloorOutcome::Queued { position: 1 }]);
    assert_eq!(netz.knoten[c].ergebnisse, vec![FloorOutcome::Queued { position: 2 }]);

    let vorher = netz.gesendet.len();
    netz.freigeben(a).unwrap();
    netz.laufen_bis(2_800);

    assert_eq!(netz.einig(), Some(b));
    assert_eq!(netz.zustand(c), FloorState::Queued);
    for i in [a, b, c] {
        assert_eq!(netz.warteschlange(i), vec![id(c)]);
    }
    // Nur die Freigabe selbst wurde gesendet
    assert_eq!(netz.gesendet.len() - vorher, 1);
    assert!(netz.gesendet_von(b, vorher).is_empty());
}

#[test]
fn konvergenz_unabhaengig_von_der_reihenfolge() {
    let mut gewinner = Vec::new();
    let mut schlangen = Vec::new();

    for reihenfolge in permutationen(4) {
        // Verschiedene Uhren: Lamport und Prioritaet muessen entscheiden
        let mut netz = Netz::mit_uhren(&[7, 3, 3, 12], ArbitrationMode::Distributed);
        let prio = [Priority::Normal, Priority::Normal, Priority::Normal, Priority::High];
        for &i in &reihenfolge {
            netz.anfragen(i, prio[i], false).unwrap();
        }
        netz.laufen_bis(5_000);

        let h = netz.einig().expect("ein Halter");
        gewinner.push(h);
        schlangen.push(netz.warteschlange((h + 1) % 4));
        for i in 0..4 {
            if i != h {
                assert_eq!(netz.zustand(i), FloorState::Queued);
            }
        }
    }

    // High gewinnt, danach Lamport 4 (Knoten 1 vor 2 per Identitaet), dann 8
    assert!(gewinner.iter().all(|h| *h == 3));
    assert!(schlangen.iter().all(|s| *s == vec![id(1), id(2), id(0)]));
}

#[test]
fn gleichzeitige_anfragen_einer_gewinnt() {
    let mut netz = Netz::new(5, ArbitrationMode::Distributed);
    for i in 0..5 {
        netz.anfragen(i, Priority::Normal, false).unwrap();
    }
    netz.laufen_bis(10_000);
    // Gleiche Lamport-Zeit, kleinste Identitaet gewinnt
    assert_eq!(netz.einig(), Some(0));
    assert_eq!(netz.warteschlange(4).len(), 4);

    // Reihum freigeben: jeder kommt genau einmal dran
    let mut reihenfolge = vec![0];
    for _ in 0..4 {
        let h = netz.einig().unwrap();
        netz.freigeben(h).unwrap();
        netz.laufen_bis(netz.jetzt + 100);
        reihenfolge.push(netz.einig().unwrap());
    }
    assert_eq!(reihenfolge, vec![0, 1, 2, 3, 4]);
}

#[test]
fn notfall_verdraengt_und_halter_wird_zuerst_entzogen() {
    let mut netz = Netz::new(3, ArbitrationMode::Distributed);
    netz.anfragen(0, Priority::Normal, false).unwrap();
    netz.laufen_bis(2_500);
    assert_eq!(netz.einig(), Some(0));

    netz.anfragen(2, Priority::Normal, true).unwrap();
    netz.laufen_bis(2_600);

    assert_eq!(netz.einig(), Some(2));
    assert_eq!(netz.knoten[2].ergebnisse, vec![FloorOutcome::Granted]);

    // Alter Halter: Granted -> Revoked -> Idle -> Taken(Notfall)
    let zustaende: Vec<FloorState> = netz.knoten[0]
        .ereignisse
        .iter()
        .filter_map(|e| match e {
            FloorEvent::StateChanged { neu, .. } => Some(*neu),
            _ => None,
        })
        .collect();
    let ende = &zustaende[zustaende.len() - 3..];
    assert_eq!(
        ende,
        &[FloorState::Revoked, FloorState::Idle, FloorState::Taken(id(2))]
    );
    assert!(netz.warteschlange(1).is_empty());
}

#[test]
fn gleichzeitige_notfaelle_nach_lamport() {
    // Knoten 2 hat die kleinere Lamport-Zeit
    let mut netz = Netz::mit_uhren(&[0, 20, 5], ArbitrationMode::Distributed);
    netz.anfragen(0, Priority::Normal, false).unwrap();
    netz.laufen_bis(2_500);
    assert_eq!(netz.einig(), Some(0));

    // Beide verdraengen, bevor sie voneinander hoeren
    netz.anfragen(1, Priority::Emergency, true).unwrap();
    netz.anfragen(2, Priority::Emergency, true).unwrap();
    netz.laufen_bis(2_600);

    assert_eq!(netz.einig(), Some(2));
    assert_eq!(netz.zustand(1), FloorState::Queued);
    // Der gleichrangige Verlierer wartet, der verdraengte Normal-Halter nicht
    for i in 0..3 {
        assert_eq!(netz.warteschlange(i), vec![id(1)]);
    }

    netz.freigeben(2).unwrap();
    netz.laufen_bis(2_700);
    assert_eq!(netz.einig(), Some(1));
}

#[test]
fn notfall_verdraengt_keinen_frueheren_notfall() {
    let mut netz = Netz::new(2, ArbitrationMode::Distributed);
    netz.anfragen(0, Priority::Emergency, true).unwrap();
    netz.laufen_bis(2_500);
    assert_eq!(netz.einig(), Some(0));

    netz.anfragen(1, Priority::Emergency, true).unwrap();
    netz.laufen_bis(2_600);
    assert_eq!(netz.einig(), Some(0));
    assert_eq!(netz.zustand(1), FloorState::Queued);
}

#[test]
fn ausgefallener_halter_wird_nach_timeout_ersetzt() {
    let mut netz = Netz::new(3, ArbitrationMode::Distributed);
    netz.anfragen(0, Priority::Normal, false).unwrap();
    netz.laufen_bis(2_500);
    netz.anfragen(1, Priority::Normal, false).unwrap();
    netz.laufen_bis(3_000);
    assert_eq!(netz.zustand(1), FloorState::Queued);

    netz.knoten[0].ausgefallen = true;
    // Grant bei 2000, ohne Heartbeat laeuft der Timeout bei 12000 ab
    netz.laufen_bis(16_000);
    assert!(netz.knoten[2]
        .ereignisse
        .contains(&FloorEvent::HolderLost { holder: id(0) }));

    // Der Wartende fragt neu an und gewinnt das Fenster
    netz.laufen_bis(25_000);
    assert_eq!(netz.einig(), Some(1));
}

#[test]
fn heartbeats_halten_den_floor() {
    let mut netz = Netz::new(2, ArbitrationMode::Distributed);
    netz.anfragen(0, Priority::Normal, false).unwrap();
    netz.laufen_bis(60_000);
    assert_eq!(netz.einig(), Some(0));
    assert!(!netz.knoten[1]
        .ereignisse
        .iter()
        .any(|e| matches!(e, FloorEvent::HolderLost { .. })));
}

#[test]
fn zentral_arbiter_teilt_zu() {
    let mut netz = Netz::new(3, ArbitrationMode::Centralized);
    netz.laufen_bis(100);
    for i in 0..3 {
        assert_eq!(netz.knoten[i].engine.arbiter(), Some(id(0)));
    }

    netz.anfragen(2, Priority::Normal, false).unwrap();
    netz.laufen_bis(200);
    // Ohne Arbitrierungsfenster
    assert_eq!(netz.einig(), Some(2));

    netz.anfragen(1, Priority::Normal, false).unwrap();
    netz.laufen_bis(300);
    assert_eq!(netz.zustand(1), FloorState::Queued);
    netz.freigeben(2).unwrap();
    netz.laufen_bis(400);
    assert_eq!(netz.einig(), Some(1));
}

#[test]
fn zentral_arbiter_ausfall_faellt_auf_verteilt_zurueck() {
    let mut netz = Netz::new(3, ArbitrationMode::Centralized);
    netz.laufen_bis(100);
    netz.knoten[0].ausgefallen = true;

    netz.anfragen(1, Priority::Normal, false).unwrap();
    // Arbiter-Timeout (10 s) plus Fenster (2 s)
    netz.laufen_bis(13_000);
    assert_eq!(netz.einig(), Some(1));
    assert!(netz.knoten[1].ereignisse.iter().any(|e| matches!(
        e,
        FloorEvent::ArbiterChanged { arbiter: Some(a) } if *a == id(1)
    )));
}

#[test]
fn freigabe_nur_als_halter() {
    let mut netz = Netz::new(2, ArbitrationMode::Distributed);
    netz.anfragen(0, Priority::Normal, false).unwrap();
    assert!(netz.freigeben(0).is_err());
    netz.laufen_bis(2_500);
    assert!(netz.freigeben(1).is_err());
    assert!(netz.freigeben(0).is_ok());
}

#[test]
fn wartender_verlaesst_kanal_und_wird_uebersprungen() {
    let mut netz = Netz::new(3, ArbitrationMode::Distributed);
    let (a, b, c) = (0, 1, 2);

    netz.anfragen(a, Priority::Normal, false).unwrap();
    netz.laufen_bis(2_500);
    netz.anfragen(b, Priority::Normal, false).unwrap();
    netz.laufen_bis(2_600);
    netz.anfragen(c, Priority::Normal, false).unwrap();
    netz.laufen_bis(2_700);
    assert_eq!(netz.warteschlange(a), vec![id(b), id(c)]);

    let vorher = netz.gesendet.len();
    netz.verlassen(b);
    assert!(matches!(
        netz.gesendet_von(b, vorher)[..],
        [FloorMessage::Release { holder, .. }] if *holder == id(b)
    ));
    for i in [a, c] {
        assert_eq!(netz.warteschlange(i), vec![id(c)]);
    }

    netz.freigeben(a).unwrap();
    netz.laufen_bis(2_800);
    assert_eq!(netz.einig(), Some(c));
    assert_eq!(netz.zustand(c), FloorState::Granted);
    for i in [a, c] {
        assert_ne!(
            netz.knoten[i].engine.halter().map(|g| g.holder()),
            Some(id(b))
        );
    }
}

#[test]
fn verlassen_im_fenster_raeumt_offene_anfrage() {
    let mut netz = Netz::new(2, ArbitrationMode::Distributed);
    netz.anfragen(0, Priority::High, false).unwrap();
    netz.laufen_bis(500);
    netz.verlassen(0);

    // Die hoeher priorisierte Anfrage haelt den Rest nicht mehr auf
    netz.anfragen(1, Priority::Normal, false).unwrap();
    netz.laufen_bis(3_000);
    assert_eq!(netz.einig(), Some(1));
    assert_eq!(netz.knoten[1].ergebnisse, vec![FloorOutcome::Granted]);
}
