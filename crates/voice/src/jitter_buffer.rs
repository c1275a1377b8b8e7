//! Adaptiver Jitter Buffer fuer Media-Pakete
//!
//! Ordnet eingehende Pakete nach Sequenznummer (modulo 2^16, intern auf
//! eine erweiterte i64-Sequenz abgebildet) und gibt im 20-ms-Takt genau
//! eine Ausgabe pro Aufruf von [`JitterBuffer::pop`] zurueck.
//!
//! ## Zustaende
//! ```text
//! Empty --push--> Filling --Zieltiefe erreicht--> Steady
//!   ^                ^                               |
//!   |                +-------push-------- Draining <-+ Puffer leer
//!   +-------------- Drain-Timeout ----------+
//! ```
//!
//! ## Jitter
//! RFC 3550: `J += (|D| - J) / 16` mit `D` = Aenderung der Transitzeit.
//! Zielverzoegerung `max(min_delay, 2 × J + margin)`, begrenzt auf
//! 20..=`max_delay` ms, laufend neu berechnet. Liegt die Tiefe im
//! Steady-Zustand ueber Ziel + ein Frame, wird pro Takt das aelteste
//! Paket als verspaetet verworfen; ueber `max_delay` sofort.
//!
//! Jeder Unterlauf-Takt verbraucht eine Sequenz (die Wiedergabe wird
//! verdeckt), damit Nachzuegler nach einem Stau als verspaetet gelten.
//!
//! Der Buffer ist pro Kanal und nicht thread-safe (der Empfangs-Task
//! besitzt ihn exklusiv). Zeit wird explizit in Millisekunden uebergeben.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use meshptt_protocol::{seq_diff, EncodedPacket, FRAME_MS};

/// Untere Grenze der Zielverzoegerung
pub const MIN_ZIEL_MS: u32 = 20;
/// Obere Grenze der Zielverzoegerung
pub const MAX_ZIEL_MS: u32 = 100;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Jitter Buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterBufferConfig {
    /// Minimale Puffertiefe in ms
    pub min_delay_ms: u32,
    /// Maximale Zielverzoegerung in ms (hoechstens 100)
    pub max_delay_ms: u32,
    /// Sicherheitsaufschlag auf 2 × Jitter
    pub margin_ms: u32,
    /// Maximale Anzahl gepufferter Pakete, aelteste werden verdraengt
    pub kapazitaet: usize,
    /// Nach so langer Leere im Draining gilt der Strom als beendet
    pub drain_timeout_ms: u64,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 40,
            max_delay_ms: MAX_ZIEL_MS,
            margin_ms: 10,
            kapazitaet: 32,
            drain_timeout_ms: 300,
        }
    }
}

impl JitterBufferConfig {
    pub fn validieren(&self) -> Result<(), String> {
        if self.max_delay_ms < MIN_ZIEL_MS || self.max_delay_ms > MAX_ZIEL_MS {
            return Err(format!(
                "max_delay_ms muss zwischen {} und {} liegen (war: {})",
                MIN_ZIEL_MS, MAX_ZIEL_MS, self.max_delay_ms
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(format!(
                "min_delay_ms ({}) groesser als max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            ));
        }
        if self.kapazitaet < 2 {
            return Err("Jitter-Buffer-Kapazitaet muss mindestens 2 sein".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Zustand, Ergebnisse, Statistik
// ---------------------------------------------------------------------------

/// Zustand des Empfangsstroms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterState {
    Empty,
    Filling,
    Steady,
    Draining,
}

/// Ergebnis von [`JitterBuffer::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushErgebnis {
    Eingefuegt,
    /// Erstes Paket eines neuen Stroms (andere SSRC oder Neubeginn)
    NeuerStrom,
    /// Sequenz liegt vor dem Abspielpunkt
    Verspaetet,
    Duplikat,
    /// Paket einer anderen Quelle waehrend ein Strom laeuft
    Fremdquelle,
}

/// Ausgabe eines Takts
#[derive(Debug, Clone, PartialEq)]
pub enum Ausgabe {
    /// Naechstes Paket in Reihenfolge
    Paket(EncodedPacket),
    /// Erwartetes Paket fehlt; `fec` enthaelt die Nutzdaten des Nachfolgers falls gepuffert
    Fehlend { seq: u16, fec: Option<Vec<u8>> },
    /// Puffer ist waehrend eines Stroms leergelaufen
    Unterlauf,
    /// Kein Strom aktiv oder Puffer fuellt sich noch
    Stille,
}

/// Statistiken des Jitter Buffers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JitterStatistik {
    pub empfangen: u64,
    pub abgespielt: u64,
    pub verspaetet: u64,
    pub duplikate: u64,
    /// Sequenzen die zum Abspielzeitpunkt fehlten
    pub verloren: u64,
    /// Wegen voller Kapazitaet verworfene Pakete
    pub verdraengt: u64,
    pub fremdquelle: u64,
    pub stroeme: u64,
}

#[derive(Debug)]
struct Eintrag {
    paket: EncodedPacket,
    ankunft_ms: u64,
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

pub struct JitterBuffer {
    config: JitterBufferConfig,
    samples_pro_ms: f64,
    zustand: JitterState,
    pakete: BTreeMap<i64, Eintrag>,
    ssrc: Option<u32>,
    /// Hoechste bisher gesehene erweiterte Sequenz (Referenz fuer Wrap-Around)
    hoechste: i64,
    /// Naechste abzuspielende erweiterte Sequenz
    abspielpunkt: Option<i64>,
    drain_start_ms: u64,
    jitter_ms: f64,
    letzte_transit: Option<(u64, u32)>,
    statistik: JitterStatistik,
}

impl JitterBuffer {
    pub fn new(config: JitterBufferConfig, sample_rate: u32) -> Self {
        Self {
            config,
            samples_pro_ms: sample_rate as f64 / 1000.0,
            zustand: JitterState::Empty,
            pakete: BTreeMap::new(),
            ssrc: None,
            hoechste: 0,
            abspielpunkt: None,
            drain_start_ms: 0,
            jitter_ms: 0.0,
            letzte_transit: None,
            statistik: JitterStatistik::default(),
        }
    }

    pub fn zustand(&self) -> JitterState {
        self.zustand
    }

    pub fn statistik(&self) -> &JitterStatistik {
        &self.statistik
    }

    /// Gepufferte Pakete
    pub fn tiefe(&self) -> usize {
        self.pakete.len()
    }

    /// Gepufferte Audiodauer in ms
    pub fn tiefe_ms(&self) -> u32 {
        self.pakete.len() as u32 * FRAME_MS
    }

    /// Aktueller Interarrival-Jitter (RFC 3550) in ms
    pub fn jitter_ms(&self) -> f64 {
        self.jitter_ms
    }

    /// Aktuelle Zielverzoegerung in ms
    pub fn ziel_ms(&self) -> u32 {
        let adaptiv = (2.0 * self.jitter_ms).round() as u32 + self.config.margin_ms;
        adaptiv
            .max(self.config.min_delay_ms)
            .clamp(MIN_ZIEL_MS, self.obergrenze_ms())
    }

    /// Fuegt ein empfangenes Paket ein
    pub fn push(&mut self, paket: EncodedPacket, ankunft_ms: u64) -> PushErgebnis {
        self.statistik.empfangen += 1;

        let ergebnis = match self.ssrc {
            Some(ssrc) if ssrc == paket.ssrc() => PushErgebnis::Eingefuegt,
            Some(_)
                if !paket.marker()
                    && matches!(self.zustand, JitterState::Filling | JitterState::Steady) =>
            {
                self.statistik.fremdquelle += 1;
                tracing::debug!(
                    ssrc = paket.ssrc(),
                    aktiv = ?self.ssrc,
                    "Paket fremder Quelle verworfen"
                );
                return PushErgebnis::Fremdquelle;
            }
            _ => {
                self.neuer_strom(&paket);
                PushErgebnis::NeuerStrom
            }
        };

        let ext = self.hoechste + seq_diff(paket.sequence(), self.hoechste as u16) as i64;

        if let Some(abspiel) = self.abspielpunkt {
            if ext < abspiel {
                self.statistik.verspaetet += 1;
                tracing::trace!(seq = paket.sequence(), "Verspaetetes Paket verworfen");
                return PushErgebnis::Verspaetet;
            }
        }
        if self.pakete.contains_key(&ext) {
            self.statistik.duplikate += 1;
            return PushErgebnis::Duplikat;
        }

        self.jitter_messen(ankunft_ms, paket.timestamp());
        self.hoechste = self.hoechste.max(ext);
        self.pakete.insert(ext, Eintrag { paket, ankunft_ms });

        while self.pakete.len() > self.config.kapazitaet {
            if let Some((aelteste, _)) = self.pakete.pop_first() {
                self.statistik.verdraengt += 1;
                if let Some(abspiel) = self.abspielpunkt.as_mut() {
                    *abspiel = (*abspiel).max(aelteste + 1);
                }
                tracing::debug!(ext = aelteste, "Buffer voll: aeltestes Paket verdraengt");
            }
        }
        self.kuerzen(self.obergrenze_ms(), usize::MAX);

        if self.zustand == JitterState::Draining {
            self.zustand = JitterState::Filling;
        }

        ergebnis
    }

    /// Liefert die Ausgabe fuer den aktuellen Takt
    pub fn pop(&mut self, jetzt_ms: u64) -> Ausgabe {
        match self.zustand {
            JitterState::Empty => Ausgabe::Stille,
            JitterState::Filling => {
                // Wartezeit des aeltesten gepufferten Pakets
                let gewartet = self
                    .pakete
                    .values()
                    .map(|e| jetzt_ms.saturating_sub(e.ankunft_ms))
                    .max()
                    .unwrap_or(0);
                let ziel = self.ziel_ms();
                if self.tiefe_ms() >= ziel || gewartet >= ziel as u64 {
                    self.zustand = JitterState::Steady;
                    if self.abspielpunkt.is_none() {
                        self.abspielpunkt = self.pakete.keys().next().copied();
                    }
                    tracing::trace!(tiefe = self.tiefe(), ziel, "Jitter Buffer eingeschwungen");
                    self.abspielen(jetzt_ms)
                } else {
                    Ausgabe::Stille
                }
            }
            JitterState::Steady => self.abspielen(jetzt_ms),
            JitterState::Draining => {
                if jetzt_ms.saturating_sub(self.drain_start_ms) >= self.config.drain_timeout_ms {
                    tracing::debug!(ssrc = ?self.ssrc, "Strom beendet");
                    self.leeren();
                    Ausgabe::Stille
                } else {
                    self.unterlauf()
                }
            }
        }
    }

    /// Verwirft alle Pakete und den Strom, Jitter-Schaetzung bleibt
    pub fn leeren(&mut self) {
        self.pakete.clear();
        self.ssrc = None;
        self.abspielpunkt = None;
        self.letzte_transit = None;
        self.zustand = JitterState::Empty;
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn obergrenze_ms(&self) -> u32 {
        self.config.max_delay_ms.clamp(MIN_ZIEL_MS, MAX_ZIEL_MS)
    }

    /// Verwirft hoechstens `max_anzahl` der aeltesten Pakete als verspaetet,
    /// bis die Tiefe `grenze_ms` nicht mehr ueberschreitet
    fn kuerzen(&mut self, grenze_ms: u32, max_anzahl: usize) {
        let mut verworfen = 0usize;
        while self.tiefe_ms() > grenze_ms && verworfen < max_anzahl {
            let Some((aelteste, _)) = self.pakete.pop_first() else {
                break;
            };
            verworfen += 1;
            self.statistik.verspaetet += 1;
            if let Some(abspiel) = self.abspielpunkt.as_mut() {
                *abspiel = (*abspiel).max(aelteste + 1);
            }
        }
        if verworfen > 0 {
            tracing::debug!(
                verworfen,
                tiefe_ms = self.tiefe_ms(),
                grenze_ms,
                "Jitter Buffer gekuerzt"
            );
        }
    }

    /// Leerer Puffer im laufenden Strom: die faellige Sequenz gilt als verbraucht
    fn unterlauf(&mut self) -> Ausgabe {
        if let Some(abspiel) = self.abspielpunkt.as_mut() {
            *abspiel += 1;
        }
        Ausgabe::Unterlauf
    }

    fn abspielen(&mut self, jetzt_ms: u64) -> Ausgabe {
        if self.abspielpunkt.is_none() {
            return Ausgabe::Stille;
        }

        if self.pakete.is_empty() {
            self.zustand = JitterState::Draining;
            self.drain_start_ms = jetzt_ms;
            return self.unterlauf();
        }

        self.kuerzen(self.obergrenze_ms(), usize::MAX);
        self.kuerzen(self.ziel_ms() + FRAME_MS, 1);

        let Some(abspiel) = self.abspielpunkt else {
            return Ausgabe::Stille;
        };
        self.abspielpunkt = Some(abspiel + 1);
        match self.pakete.remove(&abspiel) {
            Some(eintrag) => {
                self.statistik.abgespielt += 1;
                Ausgabe::Paket(eintrag.paket)
            }
            None => {
                self.statistik.verloren += 1;
                let fec = self
                    .pakete
                    .get(&(abspiel + 1))
                    .map(|e| e.paket.payload.clone());
                tracing::trace!(ext = abspiel, fec = fec.is_some(), "Paket fehlt");
                Ausgabe::Fehlend {
                    seq: abspiel as u16,
                    fec,
                }
            }
        }
    }

    fn neuer_strom(&mut self, paket: &EncodedPacket) {
        if self.ssrc.is_some() {
            tracing::debug!(alt = ?self.ssrc, neu = paket.ssrc(), "Neuer Strom ersetzt alten");
        }
        self.pakete.clear();
        self.ssrc = Some(paket.ssrc());
        // Erweiterte Sequenz beginnt beim ersten Paket mit dessen Wert
        self.hoechste = paket.sequence() as i64;
        self.abspielpunkt = None;
        self.letzte_transit = None;
        self.zustand = JitterState::Filling;
        self.statistik.stroeme += 1;
    }

    fn jitter_messen(&mut self, ankunft_ms: u64, zeitstempel: u32) {
        if let Some((letzte_ankunft, letzter_ts)) = self.letzte_transit {
            let ankunft_delta = ankunft_ms as f64 - letzte_ankunft as f64;
            let ts_delta = zeitstempel.wrapping_sub(letzter_ts) as i32 as f64 / self.samples_pro_ms;
            let d = ankunft_delta - ts_delta;
            self.jitter_ms += (d.abs() - self.jitter_ms) / 16.0;
        }
        self.letzte_transit = Some((ankunft_ms, zeitstempel));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
