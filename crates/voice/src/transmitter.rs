//! Aufnahme-, Kodier- und Sendepfad eines Kanals
//!
//! Der Task wartet auf `Granted` im veroeffentlichten Floor-Zustand, liest
//! dann Frames aus der Quelle, entrauscht, kodiert, paketiert und sendet
//! sie an die Gruppe. Jede Zustandsaenderung weg von `Granted` beendet die
//! Uebertragung. Ein Sendefehler wird pro Uebertragung genau einmal
//! gemeldet; die Sitzung gibt daraufhin das Floor frei.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use meshptt_audio::{AudioFrame, CaptureSource, NoiseSuppressor, SprachEncoder, Vad};
use meshptt_core::{ChannelId, FloorState};

use crate::bitrate::{BitrateAktion, BitrateController};
use crate::packetizer::Packetizer;
use crate::telemetry::KanalTelemetrie;
use crate::transport::{DatagramVersand, NutzdatenSchutz};

/// Gemeldeter Sendefehler einer Uebertragung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendeFehler {
    pub kanal: ChannelId,
    pub fehler: String,
}

/// Kollaborateure des Sendepfads
pub struct SenderTeile {
    pub capture: Box<dyn CaptureSource>,
    pub encoder: Box<dyn SprachEncoder>,
    pub versand: Arc<dyn DatagramVersand>,
    pub schutz: NutzdatenSchutz,
    pub telemetrie: KanalTelemetrie,
    pub floor: watch::Receiver<FloorState>,
    pub fehler_tx: mpsc::UnboundedSender<SendeFehler>,
}

pub struct Sendepfad {
    kanal: ChannelId,
    packetizer: Packetizer,
    rauschen: Option<NoiseSuppressor>,
    vad: Option<Vad>,
    bitrate: BitrateController,
    bitrate_intervall: Duration,
    teile: SenderTeile,
    fehler_gemeldet: bool,
}

impl Sendepfad {
    pub fn new(
        kanal: ChannelId,
        vad: Option<Vad>,
        bitrate: BitrateController,
        bitrate_intervall: Duration,
        teile: SenderTeile,
    ) -> Self {
        let frame_size = teile.encoder.frame_size();
        Self {
            kanal,
            packetizer: Packetizer::new(frame_size),
            rauschen: None,
            vad,
            bitrate,
            bitrate_intervall,
            teile,
            fehler_gemeldet: false,
        }
    }

    /// Rauschunterdrueckung vor VAD und Encoder
    pub fn mit_rauschunterdrueckung(mut self, suppressor: NoiseSuppressor) -> Self {
        self.rauschen = Some(suppressor);
        self
    }

    /// Sende-Task: laeuft bis `shutdown` ausgeloest wird
    pub async fn laufen(mut self, shutdown: CancellationToken) {
        tracing::debug!(kanal = %self.kanal, "Sende-Task gestartet");
        loop {
            let darf_senden = self.teile.floor.borrow_and_update().darf_senden();
            if darf_senden {
                self.uebertragen(&shutdown).await;
                if shutdown.is_cancelled() {
                    break;
                }
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                r = self.teile.floor.changed() => {
                    if r.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(kanal = %self.kanal, "Sende-Task beendet");
    }

    /// Eine Uebertragung, solange der Zustand `Granted` bleibt
    async fn uebertragen(&mut self, shutdown: &CancellationToken) {
        self.packetizer.neue_uebertragung();
        if let Some(vad) = self.vad.as_mut() {
            vad.reset();
        }
        self.fehler_gemeldet = false;
        tracing::info!(kanal = %self.kanal, ssrc = self.packetizer.ssrc(), "Uebertragung beginnt");

        let mut bitrate_takt = interval(self.bitrate_intervall);
        bitrate_takt.set_missed_tick_behavior(MissedTickBehavior::Skip);
        bitrate_takt.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                r = self.teile.floor.changed() => {
                    if r.is_err() || !self.teile.floor.borrow_and_update().darf_senden() {
                        break;
                    }
                }
                _ = bitrate_takt.tick() => self.bitrate_anpassen(),
                frame = self.teile.capture.read_frame() => match frame {
                    Ok(frame) => self.frame_senden(frame).await,
                    Err(e) => {
                        tracing::warn!(kanal = %self.kanal, fehler = %e, "Aufnahme fehlgeschlagen");
                        self.fehler_melden(format!("Aufnahme: {}", e));
                        break;
                    }
                },
            }
        }

        tracing::info!(kanal = %self.kanal, "Uebertragung beendet");
        // Auf Zustandswechsel warten, sonst startet die naechste Uebertragung sofort
        while self.teile.floor.borrow_and_update().darf_senden() {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                r = self.teile.floor.changed() => {
                    if r.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn frame_senden(&mut self, mut frame: AudioFrame) {
        if let Some(ns) = self.rauschen.as_mut() {
            ns.process(&mut frame.samples);
        }
        if let Some(vad) = self.vad.as_mut() {
            let aktiv = vad.detect(&frame.samples);
            // Erstes Paket immer senden, damit der Marker ankommt
            if !aktiv && !self.packetizer.erstes_paket_ausstehend() {
                self.packetizer.ueberspringen();
                return;
            }
        }

        let payload = match self.teile.encoder.encode(&frame.samples) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(kanal = %self.kanal, fehler = %e, "Frame nicht kodierbar");
                self.teile.telemetrie.codec_fehler();
                self.packetizer.ueberspringen();
                return;
            }
        };
        let payload = match self.teile.schutz.schuetzen(payload) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(kanal = %self.kanal, fehler = %e, "Verschluesselung fehlgeschlagen");
                self.teile.telemetrie.codec_fehler();
                self.packetizer.ueberspringen();
                return;
            }
        };

        let paket = self.packetizer.paketieren(payload);
        let bytes = paket.encode();
        match self.teile.versand.senden(&bytes).await {
            Ok(()) => {
                self.teile.telemetrie.paket_gesendet(bytes.len());
                tracing::trace!(kanal = %self.kanal, seq = paket.sequence(), "Paket gesendet");
            }
            Err(e) => {
                self.teile.telemetrie.sendefehler();
                self.fehler_melden(e.to_string());
            }
        }
    }

    fn fehler_melden(&mut self, fehler: String) {
        if self.fehler_gemeldet {
            return;
        }
        self.fehler_gemeldet = true;
        tracing::warn!(kanal = %self.kanal, fehler = %fehler, "Sendefehler, Uebertragung wird abgebrochen");
        let _ = self.teile.fehler_tx.send(SendeFehler {
            kanal: self.kanal.clone(),
            fehler,
        });
    }

    fn bitrate_anpassen(&mut self) {
        let verlust = self.teile.telemetrie.verlust_schaetzung();
        match self.bitrate.auswerten(verlust) {
            BitrateAktion::Reduziert { kbps } | BitrateAktion::Erhoeht { kbps } => {
                if let Err(e) = self.teile.encoder.set_bitrate_kbps(kbps) {
                    tracing::warn!(kanal = %self.kanal, fehler = %e, "Bitrate nicht setzbar");
                } else {
                    self.teile.telemetrie.bitrate_setzen(kbps);
                }
            }
            BitrateAktion::Stabil => {}
        }
        if let Err(e) = self
            .teile
            .encoder
            .set_verlust_hinweis(self.bitrate.verlust_hinweis())
        {
            tracing::debug!(kanal = %self.kanal, fehler = %e, "Verlusthinweis nicht setzbar");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitrate::BitrateConfig;
    use async_trait::async_trait;
    use meshptt_audio::{AudioResult, KanalCapture, NoiseConfig, SuppressionLevel, VadConfig};
    use meshptt_core::{CryptoProvider, NodeId};
    use meshptt_protocol::{Datagram, EncodedPacket};
    use parking_lot::Mutex;
    use std::io;

    struct TestEncoder {
        bitrate: Arc<Mutex<u16>>,
    }

    impl SprachEncoder for TestEncoder {
        fn encode(&mut self, pcm: &[f32]) -> AudioResult<Vec<u8>> {
            Ok(vec![(pcm[0] * 100.0) as u8; 4])
        }
        fn set_bitrate_kbps(&mut self, kbps: u16) -> AudioResult<()> {
            *self.bitrate.lock() = kbps;
            Ok(())
        }
        fn set_verlust_hinweis(&mut self, _prozent: u8) -> AudioResult<()> {
            Ok(())
        }
        fn frame_size(&self) -> usize {
            320
        }
    }

    /// Sammelt gesendete Datagramme, optional mit Fehler
    #[derive(Default)]
    struct Sammler {
        pakete: Mutex<Vec<Vec<u8>>>,
        fehlerhaft: bool,
    }

    #[async_trait]
    impl DatagramVersand for Sammler {
        async fn senden(&self, daten: &[u8]) -> io::Result<()> {
            if self.fehlerhaft {
                return Err(io::Error::new(io::ErrorKind::Other, "kein Netz"));
            }
            self.pakete.lock().push(daten.to_vec());
            Ok(())
        }
    }

    impl Sammler {
        fn media(&self) -> Vec<EncodedPacket> {
            self.pakete
                .lock()
                .iter()
                .filter_map(|d| match Datagram::parse(d) {
                    Ok(Datagram::Media(p)) => Some(p),
                    _ => None,
                })
                .collect()
        }
    }

    struct OhneKrypto;

    impl CryptoProvider for OhneKrypto {
        fn public_key(&self) -> NodeId {
            NodeId::from_bytes([0; 32])
        }
        fn sign(&self, _data: &[u8]) -> meshptt_core::Result<Vec<u8>> {
            Ok(vec![0; 64])
        }
        fn verify(&self, _data: &[u8], _signature: &[u8], _signer: &NodeId) -> bool {
            true
        }
        fn encrypt(&self, plaintext: &[u8], _key: &[u8]) -> meshptt_core::Result<Vec<u8>> {
            Ok(plaintext.to_vec())
        }
        fn decrypt(&self, ciphertext: &[u8], _key: &[u8]) -> Option<Vec<u8>> {
            Some(ciphertext.to_vec())
        }
    }

    struct Aufbau {
        frames: mpsc::Sender<AudioFrame>,
        floor: watch::Sender<FloorState>,
        versand: Arc<Sammler>,
        fehler_rx: mpsc::UnboundedReceiver<SendeFehler>,
        token: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn starten(vad: Option<Vad>, fehlerhaft: bool) -> Aufbau {
        starten_mit(vad, None, fehlerhaft)
    }

    fn starten_mit(
        vad: Option<Vad>,
        rauschen: Option<NoiseSuppressor>,
        fehlerhaft: bool,
    ) -> Aufbau {
        let (frames, capture) = KanalCapture::new(16);
        let (floor, floor_rx) = watch::channel(FloorState::Idle);
        let versand = Arc::new(Sammler {
            pakete: Mutex::new(Vec::new()),
            fehlerhaft,
        });
        let (fehler_tx, fehler_rx) = mpsc::unbounded_channel();
        let teile = SenderTeile {
            capture: Box::new(capture),
            encoder: Box::new(TestEncoder {
                bitrate: Arc::new(Mutex::new(12)),
            }),
            versand: versand.clone(),
            schutz: NutzdatenSchutz::new(Arc::new(OhneKrypto), None),
            telemetrie: KanalTelemetrie::new(ChannelId::new("alpha"), 12),
            floor: floor_rx,
            fehler_tx,
        };
        let mut sender = Sendepfad::new(
            ChannelId::new("alpha"),
            vad,
            BitrateController::new(BitrateConfig::default(), 12, 6, 24),
            Duration::from_secs(1),
            teile,
        );
        if let Some(ns) = rauschen {
            sender = sender.mit_rauschunterdrueckung(ns);
        }
        let token = CancellationToken::new();
        let task = tokio::spawn(sender.laufen(token.clone()));
        Aufbau {
            frames,
            floor,
            versand,
            fehler_rx,
            token,
            task,
        }
    }

    fn frame(pegel: f32) -> AudioFrame {
        AudioFrame::new(vec![pegel; 320], 16_000)
    }

    async fn warten() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn sendet_nur_waehrend_granted() {
        let a = starten(None, false);
        a.frames.send(frame(0.1)).await.unwrap();
        warten().await;
        assert!(a.versand.media().is_empty(), "Idle darf nicht senden");

        a.floor.send_replace(FloorState::Granted);
        warten().await;
        a.frames.send(frame(0.2)).await.unwrap();
        a.frames.send(frame(0.3)).await.unwrap();
        warten().await;

        a.floor.send_replace(FloorState::Idle);
        warten().await;
        a.frames.send(frame(0.4)).await.unwrap();
        warten().await;

        let media = a.versand.media();
        // Der Frame aus der Idle-Phase wird beim Granted-Start zuerst gelesen
        assert_eq!(media.len(), 3);
        assert!(media[0].marker());
        assert!(!media[1].marker());
        assert_eq!(media[1].sequence(), media[0].sequence().wrapping_add(1));

        a.token.cancel();
        a.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn neue_uebertragung_neue_ssrc() {
        let a = starten(None, false);
        a.floor.send_replace(FloorState::Granted);
        warten().await;
        a.frames.send(frame(0.2)).await.unwrap();
        warten().await;
        a.floor.send_replace(FloorState::Idle);
        warten().await;
        a.floor.send_replace(FloorState::Granted);
        warten().await;
        a.frames.send(frame(0.2)).await.unwrap();
        warten().await;

        let media = a.versand.media();
        assert_eq!(media.len(), 2);
        assert!(media[0].marker() && media[1].marker());
        assert_ne!(media[0].ssrc(), media[1].ssrc());

        a.token.cancel();
        a.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn vad_unterdrueckt_stille_aber_nicht_das_erste_paket() {
        let vad = Vad::new(VadConfig {
            enabled: true,
            calibration_frames: 0,
            hangover_frames: 0,
            smoothing: 0.0,
            ..VadConfig::default()
        });
        let a = starten(Some(vad), false);
        a.floor.send_replace(FloorState::Granted);
        warten().await;
        for pegel in [0.0, 0.0, 0.3, 0.0] {
            a.frames.send(frame(pegel)).await.unwrap();
        }
        warten().await;

        let media = a.versand.media();
        assert_eq!(media.len(), 2);
        assert!(media[0].marker());
        // Zwei Frames dazwischen: Zeitstempel laeuft weiter, Sequenz nicht
        assert_eq!(media[1].sequence(), media[0].sequence().wrapping_add(1));
        assert_eq!(media[1].timestamp(), media[0].timestamp().wrapping_add(2 * 320));

        a.token.cancel();
        a.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rauschen_wird_vor_dem_encoder_gedaempft() {
        let ns = NoiseSuppressor::new(NoiseConfig {
            level: SuppressionLevel::Low,
            ..NoiseConfig::default()
        });
        let a = starten_mit(None, Some(ns), false);
        a.floor.send_replace(FloorState::Granted);
        warten().await;
        for _ in 0..30 {
            a.frames.send(frame(0.015)).await.unwrap();
        }
        a.frames.send(frame(0.3)).await.unwrap();
        warten().await;

        // Der Test-Encoder kodiert das erste Sample x100
        let erste: Vec<u8> = a.versand.media().iter().map(|p| p.payload[0]).collect();
        assert_eq!(erste.len(), 31);
        assert_eq!(erste[0], 1, "Rauschpegel noch nicht gelernt");
        assert_eq!(erste[29], 0, "Rauschen nicht gedaempft");
        assert!(erste[30] >= 27, "Sprache zu stark gedaempft: {}", erste[30]);

        a.token.cancel();
        a.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sendefehler_wird_einmal_gemeldet() {
        let mut a = starten(None, true);
        a.floor.send_replace(FloorState::Granted);
        warten().await;
        for _ in 0..3 {
            a.frames.send(frame(0.2)).await.unwrap();
        }
        warten().await;

        let fehler = a.fehler_rx.recv().await.unwrap();
        assert_eq!(fehler.kanal, ChannelId::new("alpha"));
        assert!(a.fehler_rx.try_recv().is_err());

        a.token.cancel();
        a.task.await.unwrap();
    }
}
