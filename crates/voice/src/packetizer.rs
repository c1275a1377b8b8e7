//! Paketierung kodierter Frames in Media-Pakete
//!
//! Pro Uebertragung wird eine neue, zufaellige SSRC (nie 0) gewaehlt. Die
//! Sequenznummer laeuft modulo 2^16, der Zeitstempel waechst um die
//! Sample-Anzahl eines Frames, auch fuer Frames die per VAD unterdrueckt
//! werden. Das erste Paket einer Uebertragung traegt das Marker-Bit.

use rand::Rng;

use meshptt_protocol::{EncodedPacket, MediaHeader};

/// Erzeugt die Media-Pakete einer Quelle
#[derive(Debug)]
pub struct Packetizer {
    samples_pro_frame: u32,
    ssrc: u32,
    sequenz: u16,
    zeitstempel: u32,
    erstes_paket: bool,
}

impl Packetizer {
    pub fn new(samples_pro_frame: usize) -> Self {
        let mut p = Self {
            samples_pro_frame: samples_pro_frame as u32,
            ssrc: 0,
            sequenz: 0,
            zeitstempel: 0,
            erstes_paket: true,
        };
        p.neue_uebertragung();
        p
    }

    /// Beginnt eine neue Uebertragung: neue SSRC, zufaellige Startwerte
    pub fn neue_uebertragung(&mut self) {
        let mut rng = rand::thread_rng();
        self.ssrc = rng.gen_range(1..=u32::MAX);
        self.sequenz = rng.gen();
        self.zeitstempel = rng.gen();
        self.erstes_paket = true;
        tracing::trace!(ssrc = self.ssrc, seq = self.sequenz, "Neue Uebertragung");
    }

    /// Verpackt einen kodierten Frame
    pub fn paketieren(&mut self, payload: Vec<u8>) -> EncodedPacket {
        let header = MediaHeader::new(
            self.erstes_paket,
            self.sequenz,
            self.zeitstempel,
            self.ssrc,
        );
        self.erstes_paket = false;
        self.sequenz = self.sequenz.wrapping_add(1);
        self.zeitstempel = self.zeitstempel.wrapping_add(self.samples_pro_frame);
        EncodedPacket::new(header, payload)
    }

    /// Frame wird nicht gesendet (DTX), nur der Zeitstempel laeuft weiter
    pub fn ueberspringen(&mut self) {
        self.zeitstempel = self.zeitstempel.wrapping_add(self.samples_pro_frame);
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// `true` solange in der aktuellen Uebertragung noch nichts gesendet wurde
    pub fn erstes_paket_ausstehend(&self) -> bool {
        self.erstes_paket
    }
}
