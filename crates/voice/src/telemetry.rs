//! Transport-Telemetrie pro Kanal
//!
//! Empfangs- und Sendepfad melden ihre Ereignisse an eine gemeinsame
//! [`KanalTelemetrie`]. Der Empfangs-Task erstellt periodisch einen
//! [`TransportStat`]-Snapshot; dabei wird die Verlustschaetzung
//! aktualisiert, die der Sendepfad als Opus-Verlusthinweis nutzt.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use meshptt_core::ChannelId;

/// Intervall fuer periodische Snapshots
pub const STATISTIK_INTERVALL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Periodischer Transport-Snapshot eines Kanals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportStat {
    pub kanal: ChannelId,
    /// Erfassungszeitraum in ms
    pub zeitraum_ms: u64,
    pub pakete_gesendet: u64,
    pub pakete_empfangen: u64,
    /// Zum Abspielzeitpunkt fehlende Pakete
    pub pakete_verloren: u64,
    pub pakete_verspaetet: u64,
    pub duplikate: u64,
    pub codec_fehler: u64,
    /// Durch FEC oder Decoder-PLC ersetzte Frames
    pub frames_verdeckt: u64,
    pub sendefehler: u64,
    /// Verluste inkl. Codec-Fehler im Zeitraum (0.0–1.0)
    pub verlust_rate: f64,
    pub jitter_ms: f64,
    pub puffer_tiefe: usize,
    pub ziel_ms: u32,
    pub bitrate_kbps: u16,
    pub empfang_bps: u64,
    pub sende_bps: u64,
}

impl TransportStat {
    /// Lesbare Zusammenfassung fuer Logs
    pub fn zusammenfassung(&self) -> String {
        format!(
            "{}: Loss={:.1}% Jitter={:.1}ms Buffer={} (Ziel {}ms) Bitrate={}kbps Empfang={}kbps Sende={}kbps",
            self.kanal,
            self.verlust_rate * 100.0,
            self.jitter_ms,
            self.puffer_tiefe,
            self.ziel_ms,
            self.bitrate_kbps,
            self.empfang_bps / 1000,
            self.sende_bps / 1000,
        )
    }
}

// ---------------------------------------------------------------------------
// Akkumulator (intern)
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Akkumulator {
    pakete_gesendet: u64,
    gesendete_bytes: u64,
    pakete_empfangen: u64,
    empfangene_bytes: u64,
    abgespielt: u64,
    verloren: u64,
    verspaetet: u64,
    duplikate: u64,
    codec_fehler: u64,
    verdeckt: u64,
    sendefehler: u64,
    jitter_ms: f64,
    puffer_tiefe: usize,
    ziel_ms: u32,
    bitrate_kbps: u16,
    verlust_schaetzung: f64,
    zeitraum_start: Instant,
}

impl Akkumulator {
    fn neu(bitrate_kbps: u16) -> Self {
        Self {
            pakete_gesendet: 0,
            gesendete_bytes: 0,
            pakete_empfangen: 0,
            empfangene_bytes: 0,
            abgespielt: 0,
            verloren: 0,
            verspaetet: 0,
            duplikate: 0,
            codec_fehler: 0,
            verdeckt: 0,
            sendefehler: 0,
            jitter_ms: 0.0,
            puffer_tiefe: 0,
            ziel_ms: 0,
            bitrate_kbps,
            verlust_schaetzung: 0.0,
            zeitraum_start: Instant::now(),
        }
    }

    fn intervall_zuruecksetzen(&mut self) {
        self.pakete_gesendet = 0;
        self.gesendete_bytes = 0;
        self.pakete_empfangen = 0;
        self.empfangene_bytes = 0;
        self.abgespielt = 0;
        self.verloren = 0;
        self.verspaetet = 0;
        self.duplikate = 0;
        self.codec_fehler = 0;
        self.verdeckt = 0;
        self.sendefehler = 0;
        self.zeitraum_start = Instant::now();
    }
}

// ---------------------------------------------------------------------------
// KanalTelemetrie
// ---------------------------------------------------------------------------

/// Gemeinsame Telemetrie eines Kanals (Clone teilt den Zustand)
#[derive(Clone)]
pub struct KanalTelemetrie {
    kanal: ChannelId,
    inner: Arc<Mutex<Akkumulator>>,
}

impl KanalTelemetrie {
    pub fn new(kanal: ChannelId, bitrate_kbps: u16) -> Self {
        Self {
            kanal,
            inner: Arc::new(Mutex::new(Akkumulator::neu(bitrate_kbps))),
        }
    }

    pub fn paket_gesendet(&self, bytes: usize) {
        let mut a = self.inner.lock();
        a.pakete_gesendet += 1;
        a.gesendete_bytes += bytes as u64;
    }

    pub fn paket_empfangen(&self, bytes: usize) {
        let mut a = self.inner.lock();
        a.pakete_empfangen += 1;
        a.empfangene_bytes += bytes as u64;
    }

    pub fn abgespielt(&self) {
        self.inner.lock().abgespielt += 1;
    }

    pub fn verloren(&self) {
        self.inner.lock().verloren += 1;
    }

    pub fn verspaetet(&self) {
        self.inner.lock().verspaetet += 1;
    }

    pub fn duplikat(&self) {
        self.inner.lock().duplikate += 1;
    }

    pub fn codec_fehler(&self) {
        self.inner.lock().codec_fehler += 1;
    }

    pub fn verdeckt(&self) {
        self.inner.lock().verdeckt += 1;
    }

    pub fn sendefehler(&self) {
        self.inner.lock().sendefehler += 1;
    }

    pub fn jitter_aktualisieren(&self, jitter_ms: f64, puffer_tiefe: usize, ziel_ms: u32) {
        let mut a = self.inner.lock();
        a.jitter_ms = jitter_ms;
        a.puffer_tiefe = puffer_tiefe;
        a.ziel_ms = ziel_ms;
    }

    pub fn bitrate_setzen(&self, kbps: u16) {
        self.inner.lock().bitrate_kbps = kbps;
    }

    /// Verlustrate des letzten abgeschlossenen Zeitraums
    pub fn verlust_schaetzung(&self) -> f64 {
        self.inner.lock().verlust_schaetzung
    }

    /// Erstellt einen Snapshot und setzt die Intervallzaehler zurueck
    pub fn snapshot_erstellen(&self) -> TransportStat {
        let mut a = self.inner.lock();
        let zeitraum = a.zeitraum_start.elapsed();
        let zeitraum_secs = zeitraum.as_secs_f64().max(0.001);

        let fehlerhaft = a.verloren + a.codec_fehler;
        let erwartet = a.abgespielt + a.verloren;
        let verlust_rate = if erwartet > 0 {
            (fehlerhaft as f64 / erwartet as f64).min(1.0)
        } else {
            0.0
        };
        // Zeitraeume ohne Empfang lassen die Schaetzung unveraendert
        if erwartet > 0 {
            a.verlust_schaetzung = verlust_rate;
        }

        let stat = TransportStat {
            kanal: self.kanal.clone(),
            zeitraum_ms: zeitraum.as_millis() as u64,
            pakete_gesendet: a.pakete_gesendet,
            pakete_empfangen: a.pakete_empfangen,
            pakete_verloren: a.verloren,
            pakete_verspaetet: a.verspaetet,
            duplikate: a.duplikate,
            codec_fehler: a.codec_fehler,
            frames_verdeckt: a.verdeckt,
            sendefehler: a.sendefehler,
            verlust_rate,
            jitter_ms: a.jitter_ms,
            puffer_tiefe: a.puffer_tiefe,
            ziel_ms: a.ziel_ms,
            bitrate_kbps: a.bitrate_kbps,
            empfang_bps: ((a.empfangene_bytes * 8) as f64 / zeitraum_secs) as u64,
            sende_bps: ((a.gesendete_bytes * 8) as f64 / zeitraum_secs) as u64,
        };

        a.intervall_zuruecksetzen();
        stat
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetrie() -> KanalTelemetrie {
        KanalTelemetrie::new(ChannelId::new("alpha"), 12)
    }

    #[tokio::test(start_paused = true)]
    async fn verlust_rate_inklusive_codec_fehler() {
        let tele = telemetrie();
        for _ in 0..8 {
            tele.abgespielt();
        }
        tele.verloren();
        tele.verloren();
        tele.codec_fehler();

        let stat = tele.snapshot_erstellen();
        // (2 + 1) / (8 + 2)
        assert!((stat.verlust_rate - 0.3).abs() < 1e-9);
        assert!((tele.verlust_schaetzung() - 0.3).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn zaehler_werden_nach_snapshot_zurueckgesetzt() {
        let tele = telemetrie();
        tele.paket_gesendet(60);
        tele.paket_empfangen(60);
        tele.abgespielt();
        tele.verloren();
        tele.jitter_aktualisieren(4.5, 3, 40);

        let erste = tele.snapshot_erstellen();
        assert_eq!(erste.pakete_gesendet, 1);
        assert_eq!(erste.puffer_tiefe, 3);

        let zweite = tele.snapshot_erstellen();
        assert_eq!(zweite.pakete_gesendet, 0);
        assert_eq!(zweite.pakete_verloren, 0);
        // Pegelwerte bleiben stehen
        assert_eq!(zweite.ziel_ms, 40);
        // Ohne Empfang bleibt die letzte Schaetzung erhalten
        assert!((tele.verlust_schaetzung() - 0.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn bitraten_aus_bytes_und_zeitraum() {
        let tele = telemetrie();
        tokio::time::advance(Duration::from_secs(1)).await;
        tele.paket_empfangen(1000);
        tele.paket_gesendet(500);
        let stat = tele.snapshot_erstellen();
        assert_eq!(stat.zeitraum_ms, 1000);
        assert_eq!(stat.empfang_bps, 8000);
        assert_eq!(stat.sende_bps, 4000);
    }

    #[test]
    fn geteilter_zustand() {
        let tele = telemetrie();
        let kopie = tele.clone();
        kopie.sendefehler();
        kopie.bitrate_setzen(18);
        let stat = tele.snapshot_erstellen();
        assert_eq!(stat.sendefehler, 1);
        assert_eq!(stat.bitrate_kbps, 18);
        assert!(stat.zusammenfassung().contains("channel:alpha"));
    }
}
