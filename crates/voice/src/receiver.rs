//! Empfangs- und Wiedergabepfad eines Kanals
//!
//! Ein fester 20-ms-Takt entnimmt pro Tick genau eine Ausgabe aus dem
//! Jitter Buffer und schreibt einen Frame in die Senke: echtes, verdecktes
//! oder stilles Audio. Der Takt stockt nie, auch nicht ohne Pakete.
//!
//! Solange der eigene Knoten das Floor haelt (`Granted`), werden
//! eingehende Media-Pakete verworfen (Halbduplex).

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use meshptt_audio::{AudioFrame, OutputSink, SprachDecoder};
use meshptt_core::{ChannelId, FloorState};
use meshptt_protocol::{EncodedPacket, FRAME_MS};

use crate::jitter_buffer::{Ausgabe, JitterBuffer, JitterBufferConfig, PushErgebnis};
use crate::plc::{PacketLossConcealer, PlcErgebnis};
use crate::telemetry::{KanalTelemetrie, TransportStat, STATISTIK_INTERVALL};
use crate::transport::NutzdatenSchutz;

/// Kollaborateure des Empfangspfads
pub struct EmpfaengerTeile {
    pub decoder: Box<dyn SprachDecoder>,
    pub sink: Box<dyn OutputSink>,
    pub schutz: NutzdatenSchutz,
    pub telemetrie: KanalTelemetrie,
    pub floor: watch::Receiver<FloorState>,
}

pub struct Empfaenger {
    kanal: ChannelId,
    sample_rate: u32,
    jitter: JitterBuffer,
    plc: PacketLossConcealer,
    teile: EmpfaengerTeile,
    sink_fehler_gemeldet: bool,
}

impl Empfaenger {
    pub fn new(
        kanal: ChannelId,
        config: &JitterBufferConfig,
        sample_rate: u32,
        teile: EmpfaengerTeile,
    ) -> Self {
        let frame_size = teile.decoder.frame_size();
        Self {
            kanal,
            sample_rate,
            jitter: JitterBuffer::new(config.clone(), sample_rate),
            plc: PacketLossConcealer::new(frame_size),
            teile,
            sink_fehler_gemeldet: false,
        }
    }

    pub fn jitter_buffer(&self) -> &JitterBuffer {
        &self.jitter
    }

    /// Nimmt ein empfangenes Media-Paket an
    pub fn paket_annehmen(&mut self, mut paket: EncodedPacket, jetzt_ms: u64) {
        if self.teile.floor.borrow().darf_senden() {
            tracing::trace!(kanal = %self.kanal, seq = paket.sequence(), "Media waehrend eigener Uebertragung verworfen");
            return;
        }

        let bytes = paket.groesse();
        let payload = std::mem::take(&mut paket.payload);
        match self.teile.schutz.oeffnen(payload) {
            Some(klar) => paket.payload = klar,
            None => {
                self.teile.telemetrie.codec_fehler();
                tracing::debug!(kanal = %self.kanal, seq = paket.sequence(), "Nutzdaten nicht entschluesselbar");
                return;
            }
        }

        self.teile.telemetrie.paket_empfangen(bytes);
        match self.jitter.push(paket, jetzt_ms) {
            PushErgebnis::Eingefuegt => {}
            PushErgebnis::NeuerStrom => {
                self.plc.zuruecksetzen();
                if let Err(e) = self.teile.decoder.zuruecksetzen() {
                    tracing::warn!(kanal = %self.kanal, fehler = %e, "Decoder-Reset fehlgeschlagen");
                }
            }
            PushErgebnis::Verspaetet => self.teile.telemetrie.verspaetet(),
            PushErgebnis::Duplikat => self.teile.telemetrie.duplikat(),
            PushErgebnis::Fremdquelle => {}
        }
    }

    /// Erzeugt den Frame fuer einen Wiedergabe-Takt
    pub fn takt(&mut self, jetzt_ms: u64) -> AudioFrame {
        let decoder = self.teile.decoder.as_mut();
        let ergebnis = match self.jitter.pop(jetzt_ms) {
            Ausgabe::Paket(paket) => {
                self.teile.telemetrie.abgespielt();
                let e = self.plc.paket(decoder, &paket.payload);
                if !e.ist_original() {
                    self.teile.telemetrie.codec_fehler();
                }
                Some(e)
            }
            Ausgabe::Fehlend { seq, fec } => {
                self.teile.telemetrie.verloren();
                tracing::trace!(kanal = %self.kanal, seq, "Verlust wird verdeckt");
                Some(self.plc.fehlend(decoder, fec.as_deref()))
            }
            Ausgabe::Unterlauf => Some(self.plc.fehlend(decoder, None)),
            Ausgabe::Stille => None,
        };

        self.teile.telemetrie.jitter_aktualisieren(
            self.jitter.jitter_ms(),
            self.jitter.tiefe(),
            self.jitter.ziel_ms(),
        );

        match ergebnis {
            Some(e) => {
                if e.plc_aktiv() {
                    self.teile.telemetrie.verdeckt();
                }
                AudioFrame::new(e.into_samples(), self.sample_rate)
            }
            None => AudioFrame::stille(self.plc_frame_size(), self.sample_rate),
        }
    }

    fn plc_frame_size(&self) -> usize {
        self.teile.decoder.frame_size()
    }

    async fn ausgeben(&mut self, frame: AudioFrame) {
        if let Err(e) = self.teile.sink.write_frame(frame).await {
            if !self.sink_fehler_gemeldet {
                self.sink_fehler_gemeldet = true;
                tracing::warn!(kanal = %self.kanal, fehler = %e, "Wiedergabe fehlgeschlagen");
            }
        } else {
            self.sink_fehler_gemeldet = false;
        }
    }

    /// Empfangs-Task: laeuft bis `shutdown` ausgeloest wird
    pub async fn laufen(
        mut self,
        mut media_rx: mpsc::Receiver<EncodedPacket>,
        stat_tx: mpsc::UnboundedSender<TransportStat>,
        shutdown: CancellationToken,
    ) {
        let start = Instant::now();
        let mut takt = interval(Duration::from_millis(FRAME_MS as u64));
        takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut statistik = interval(STATISTIK_INTERVALL);
        statistik.tick().await;

        tracing::debug!(kanal = %self.kanal, "Empfangs-Task gestartet");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(paket) = media_rx.recv() => {
                    let jetzt = start.elapsed().as_millis() as u64;
                    self.paket_annehmen(paket, jetzt);
                }
                _ = takt.tick() => {
                    let jetzt = start.elapsed().as_millis() as u64;
                    let frame = self.takt(jetzt);
                    self.ausgeben(frame).await;
                }
                _ = statistik.tick() => {
                    let stat = self.teile.telemetrie.snapshot_erstellen();
                    tracing::trace!("{}", stat.zusammenfassung());
                    if stat_tx.send(stat).is_err() {
                        tracing::trace!(kanal = %self.kanal, "Kein Abnehmer fuer Transport-Statistik");
                    }
                }
            }
        }

        tracing::debug!(kanal = %self.kanal, "Empfangs-Task beendet");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
