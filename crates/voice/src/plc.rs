//! Packet Loss Concealment (PLC)
//!
//! Ersetzt fehlende Frames im Wiedergabe-Pfad durch Ersatz-Audio.
//!
//! ## Strategien
//! 1. **FEC-Dekodierung**: Liegt das Folgepaket bereits im Jitter Buffer,
//!    wird der verlorene Frame aus dessen Opus In-Band FEC rekonstruiert.
//! 2. **Decoder-PLC mit Fade**: Der Decoder extrapoliert, die Amplitude
//!    sinkt pro Frame um `FADE_FAKTOR`.
//! 3. **Stille**: Nach `MAX_VERDECKT` aufeinanderfolgenden Verlusten.

use meshptt_audio::{AudioResult, SprachDecoder};

/// Maximale Anzahl verdeckter Frames vor dem Uebergang zu Stille
pub const MAX_VERDECKT: u32 = 3;

/// Fade-Faktor pro verdecktem Frame (0.75 = 25% Abnahme pro Frame)
pub const FADE_FAKTOR: f32 = 0.75;

// ---------------------------------------------------------------------------
// PLC-Ergebnis
// ---------------------------------------------------------------------------

/// Ergebnis eines Wiedergabe-Takts
#[derive(Debug, Clone, PartialEq)]
pub enum PlcErgebnis {
    /// Regulaer dekodierter Frame
    Original(Vec<f32>),
    /// Verlust aus FEC-Daten des Folgepakets rekonstruiert
    FecRekonstruiert(Vec<f32>),
    /// Verlust durch Decoder-PLC mit Fade verdeckt
    Verdeckt(Vec<f32>),
    /// Zu viele aufeinanderfolgende Verluste
    Stille(Vec<f32>),
}

impl PlcErgebnis {
    pub fn samples(&self) -> &[f32] {
        match self {
            Self::Original(s) | Self::FecRekonstruiert(s) | Self::Verdeckt(s) | Self::Stille(s) => s,
        }
    }

    pub fn into_samples(self) -> Vec<f32> {
        match self {
            Self::Original(s) | Self::FecRekonstruiert(s) | Self::Verdeckt(s) | Self::Stille(s) => s,
        }
    }

    pub fn ist_original(&self) -> bool {
        matches!(self, Self::Original(_))
    }

    /// `true` wenn Ersatz-Audio erzeugt wurde (FEC oder Verdeckung)
    pub fn plc_aktiv(&self) -> bool {
        matches!(self, Self::FecRekonstruiert(_) | Self::Verdeckt(_))
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlcStatistik {
    pub originale: u64,
    pub fec_rekonstruiert: u64,
    pub verdeckt: u64,
    pub stille_eingefuegt: u64,
    pub codec_fehler: u64,
}

// ---------------------------------------------------------------------------
// PacketLossConcealer
// ---------------------------------------------------------------------------

/// Verdeckt Paketverluste, pro Kanal im Empfangs-Task
#[derive(Debug)]
pub struct PacketLossConcealer {
    frame_size: usize,
    aufeinanderfolgend: u32,
    fade: f32,
    statistik: PlcStatistik,
}

impl PacketLossConcealer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            aufeinanderfolgend: 0,
            fade: 1.0,
            statistik: PlcStatistik::default(),
        }
    }

    pub fn statistik(&self) -> &PlcStatistik {
        &self.statistik
    }

    /// Dekodiert ein empfangenes Paket.
    ///
    /// Ein Codec-Fehler verwirft das Paket und wird wie ein Verlust verdeckt.
    pub fn paket(&mut self, decoder: &mut dyn SprachDecoder, payload: &[u8]) -> PlcErgebnis {
        match decoder.decode(payload) {
            Ok(pcm) => {
                self.aufeinanderfolgend = 0;
                self.fade = 1.0;
                self.statistik.originale += 1;
                PlcErgebnis::Original(pcm)
            }
            Err(e) => {
                self.statistik.codec_fehler += 1;
                tracing::debug!(fehler = %e, "Paket nicht dekodierbar, wird verdeckt");
                self.verdecken(decoder)
            }
        }
    }

    /// Erzeugt Ersatz-Audio fuer einen fehlenden Frame
    pub fn fehlend(
        &mut self,
        decoder: &mut dyn SprachDecoder,
        fec_naechstes: Option<&[u8]>,
    ) -> PlcErgebnis {
        if let Some(naechstes) = fec_naechstes {
            match decoder.decode_fec(naechstes) {
                Ok(pcm) => {
                    self.aufeinanderfolgend = 0;
                    self.fade = 1.0;
                    self.statistik.fec_rekonstruiert += 1;
                    tracing::trace!("PLC: FEC-Rekonstruktion");
                    return PlcErgebnis::FecRekonstruiert(pcm);
                }
                Err(e) => {
                    self.statistik.codec_fehler += 1;
                    tracing::debug!(fehler = %e, "FEC-Dekodierung fehlgeschlagen");
                }
            }
        }
        self.verdecken(decoder)
    }

    /// Setzt die Verlust-Kette zurueck (neuer Strom)
    pub fn zuruecksetzen(&mut self) {
        self.aufeinanderfolgend = 0;
        self.fade = 1.0;
    }

    fn verdecken(&mut self, decoder: &mut dyn SprachDecoder) -> PlcErgebnis {
        self.aufeinanderfolgend += 1;

        if self.aufeinanderfolgend > MAX_VERDECKT {
            self.statistik.stille_eingefuegt += 1;
            return PlcErgebnis::Stille(vec![0.0; self.frame_size]);
        }

        self.fade *= FADE_FAKTOR;
        let pcm: AudioResult<Vec<f32>> = decoder.decode_plc();
        match pcm {
            Ok(mut samples) => {
                for s in samples.iter_mut() {
                    *s *= self.fade;
                }
                self.statistik.verdeckt += 1;
                tracing::trace!(fade = self.fade, "PLC: Decoder-Verdeckung");
                PlcErgebnis::Verdeckt(samples)
            }
            Err(e) => {
                self.statistik.codec_fehler += 1;
                self.statistik.stille_eingefuegt += 1;
                tracing::debug!(fehler = %e, "Decoder-PLC fehlgeschlagen");
                PlcErgebnis::Stille(vec![0.0; self.frame_size])
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
