//! Media-Protokoll (RTP-aehnlich, UDP-Multicast)
//!
//! Binaere Paketstruktur fuer die Audio-Uebertragung. Der Header ist ein
//! RTP-v2-Header ohne CSRC und Extensions, damit Standardwerkzeuge die
//! Pakete lesen koennen.
//!
//! ## Paketformat (Header = 12 Bytes, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   V=2 (2 Bit), P, X, CC (immer 0)
//!  1       1   Marker (1 Bit), PayloadType (7 Bit, 111 = Opus)
//!  2       2   Sequenznummer (big-endian, 16 Bit, laeuft ueber)
//!  4       4   Zeitstempel (big-endian, Sample-Takt)
//!  8       4   SSRC (big-endian, pro Uebertragung neu)
//! 12+      N   Nutzdaten (Opus-Bytes, ggf. verschluesselt)
//! ```

use std::io;

/// RTP-Version im Header
pub const RTP_VERSION: u8 = 2;

/// Dynamischer Payload-Typ fuer Opus
pub const PAYLOAD_TYPE_OPUS: u8 = 111;

/// Maximale Datagramm-Groesse (unterhalb typischer Mesh-MTU)
pub const MAX_PACKET_SIZE: usize = 1400;

/// Standard-Port fuer Kanaele ohne eigene Angabe
pub const STANDARD_PORT: u16 = 5004;

// ---------------------------------------------------------------------------
// Sequenz-Arithmetik (mod 2^16)
// ---------------------------------------------------------------------------

/// Vorzeichenbehafteter Abstand `a - b` modulo 2^16
///
/// Positive Werte: `a` liegt nach `b`. Abstaende ueber 2^15 kippen ins
/// Negative, damit ein Ueberlauf 65535 → 0 als "naechstes Paket" gilt.
pub fn seq_diff(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

/// `true` wenn `a` (wraparound-bewusst) nach `b` kommt
pub fn seq_neuer(a: u16, b: u16) -> bool {
    seq_diff(a, b) > 0
}

// ---------------------------------------------------------------------------
// MediaHeader
// ---------------------------------------------------------------------------

/// 12-Byte Header eines Media-Pakets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaHeader {
    /// Erstes Paket einer Uebertragung
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    /// Laeuft pro Frame um die Sample-Anzahl weiter
    pub timestamp: u32,
    /// Quell-ID, stabil fuer die Dauer einer Uebertragung
    pub ssrc: u32,
}

impl MediaHeader {
    /// Header-Groesse in Bytes
    pub const SIZE: usize = 12;

    pub fn new(marker: bool, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            marker,
            payload_type: PAYLOAD_TYPE_OPUS,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialisiert den Header in ein 12-Byte-Array (big-endian)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = RTP_VERSION << 6;
        buf[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Deserialisiert einen Header aus einem Byte-Slice
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Slice kuerzer als 12 Bytes ist
    /// - `InvalidData` bei falscher RTP-Version
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Header zu kurz: {} Bytes (erwartet {})",
                    buf.len(),
                    Self::SIZE
                ),
            ));
        }

        let version = buf[0] >> 6;
        if version != RTP_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Ungueltige RTP-Version: {version} (erwartet {RTP_VERSION})"),
            ));
        }

        Ok(Self {
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7F,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

// ---------------------------------------------------------------------------
// EncodedPacket
// ---------------------------------------------------------------------------

/// Vollstaendiges Media-Paket (Header + Opus-Nutzdaten)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub header: MediaHeader,
    pub payload: Vec<u8>,
}

impl EncodedPacket {
    pub fn new(header: MediaHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn marker(&self) -> bool {
        self.header.marker
    }

    /// Serialisiert das gesamte Paket in einen Byte-Vec
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MediaHeader::SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserialisiert ein Paket und validiert es
    ///
    /// # Fehler
    /// - Header-Validierungsfehler
    /// - Paket ueberschreitet `MAX_PACKET_SIZE`
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Paket zu gross: {} Bytes (Maximum {})",
                    buf.len(),
                    MAX_PACKET_SIZE
                ),
            ));
        }
        let header = MediaHeader::decode(buf)?;
        Ok(Self {
            header,
            payload: buf[MediaHeader::SIZE..].to_vec(),
        })
    }

    /// Gesamtgroesse des Paketes in Bytes
    pub fn groesse(&self) -> usize {
        MediaHeader::SIZE + self.payload.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
