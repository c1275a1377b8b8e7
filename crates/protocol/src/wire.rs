//! Wire-Format fuer den Multicast-Kanal
//!
//! Kontroll- und Media-Pakete teilen sich eine Multicast-Gruppe pro Kanal.
//! Das erste Byte unterscheidet sie: RTP v2 beginnt immer mit den Bits `10`,
//! Kontroll-Frames mit `0xF1` (Bits `11`), eine Kollision ist ausgeschlossen.
//!
//! ## Kontroll-Frame
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Art (0xF1)
//!  1       1   Nachrichtentyp (1..=6, siehe MessageType)
//!  2       4   Body-Laenge N (u32 BE)
//!  6       N   ControlRecord als JSON
//!  6+N    64   Ed25519-Signatur ueber Bytes 0..6+N
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::control::{ControlRecord, MessageType, SignedControl};
use crate::error::ParseError;
use crate::media::{EncodedPacket, MAX_PACKET_SIZE, RTP_VERSION};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Erstes Byte eines Kontroll-Frames
pub const CONTROL_MARKER: u8 = 0xF1;

/// Art + Typ + Laengenfeld
pub const CONTROL_HEADER_SIZE: usize = 6;

/// Groesse der Signatur in Bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Maximale Body-Laenge, damit ein Frame in ein Datagramm passt
pub const MAX_BODY_SIZE: usize = MAX_PACKET_SIZE - CONTROL_HEADER_SIZE - SIGNATURE_SIZE;

/// Header und JSON-Body eines Records (die zu signierenden Bytes)
pub(crate) fn frame_bytes(record: &ControlRecord) -> Result<Vec<u8>, ParseError> {
    let json = serde_json::to_vec(record)?;
    if json.len() > MAX_BODY_SIZE {
        return Err(ParseError::LaengeUngueltig {
            angegeben: json.len(),
            maximal: MAX_BODY_SIZE,
        });
    }
    let mut buf = Vec::with_capacity(CONTROL_HEADER_SIZE + json.len() + SIGNATURE_SIZE);
    buf.push(CONTROL_MARKER);
    buf.push(record.message.typ());
    buf.extend_from_slice(&(json.len() as u32).to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

impl SignedControl {
    /// Gesamter Frame (Header, Body, Signatur)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.signiert.len() + self.signature.len());
        buf.extend_from_slice(&self.signiert);
        buf.extend_from_slice(&self.signature);
        buf
    }

    /// Parst einen vollstaendigen Frame (ohne Signaturpruefung)
    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let mut src = BytesMut::from(buf);
        let frame = ControlCodec::new()
            .decode(&mut src)?
            .ok_or(ParseError::ZuKurz {
                laenge: buf.len(),
                erwartet: CONTROL_HEADER_SIZE + SIGNATURE_SIZE,
            })?;
        Ok(frame)
    }
}

// ---------------------------------------------------------------------------
// ControlCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer signierte Kontroll-Frames
///
/// Implementiert `Encoder<SignedControl>` und `Decoder`, damit Kontroll-Frames
/// sowohl aus Datagrammen als auch aus Byte-Stroemen gelesen werden koennen.
#[derive(Debug, Clone, Default)]
pub struct ControlCodec;

impl ControlCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ControlCodec {
    type Item = SignedControl;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf den vollstaendigen Header
        if src.len() < CONTROL_HEADER_SIZE {
            return Ok(None);
        }

        if src[0] != CONTROL_MARKER {
            return Err(ParseError::UnbekannteArt(src[0]));
        }
        let typ = src[1];
        if !MessageType::ist_bekannt(typ) {
            return Err(ParseError::UnbekannterTyp(typ));
        }

        let laenge = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;
        if laenge > MAX_BODY_SIZE {
            return Err(ParseError::LaengeUngueltig {
                angegeben: laenge,
                maximal: MAX_BODY_SIZE,
            });
        }

        let gesamt = CONTROL_HEADER_SIZE + laenge + SIGNATURE_SIZE;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        let signiert = src.split_to(CONTROL_HEADER_SIZE + laenge).to_vec();
        let signature = src.split_to(SIGNATURE_SIZE).to_vec();

        let record: ControlRecord = serde_json::from_slice(&signiert[CONTROL_HEADER_SIZE..])?;
        let inhalt = record.message.typ();
        if inhalt != typ {
            return Err(ParseError::TypKonflikt {
                header: typ,
                inhalt,
            });
        }
        record.absender_pruefen()?;

        Ok(Some(SignedControl {
            record,
            signiert,
            signature,
        }))
    }
}

impl Encoder<SignedControl> for ControlCodec {
    type Error = ParseError;

    fn encode(&mut self, item: SignedControl, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.signiert.len() + item.signature.len());
        dst.put_slice(&item.signiert);
        dst.put_slice(&item.signature);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Datagram
// ---------------------------------------------------------------------------

/// Ein empfangenes Datagramm, nach erstem Byte unterschieden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Media(EncodedPacket),
    Control(SignedControl),
}

impl Datagram {
    /// Parst ein Datagramm; unbekannte oder kaputte Eingaben liefern `ParseError`
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let erstes = *buf.first().ok_or(ParseError::ZuKurz {
            laenge: 0,
            erwartet: 1,
        })?;

        if erstes == CONTROL_MARKER {
            let mut src = BytesMut::from(buf);
            let frame = ControlCodec::new()
                .decode(&mut src)?
                .ok_or(ParseError::ZuKurz {
                    laenge: buf.len(),
                    erwartet: CONTROL_HEADER_SIZE + SIGNATURE_SIZE,
                })?;
            // Ein Datagramm enthaelt genau einen Frame
            if src.has_remaining() {
                return Err(ParseError::LaengeUngueltig {
                    angegeben: buf.len(),
                    maximal: buf.len() - src.remaining(),
                });
            }
            return Ok(Datagram::Control(frame));
        }

        if erstes >> 6 == RTP_VERSION {
            return EncodedPacket::decode(buf)
                .map(Datagram::Media)
                .map_err(|e| ParseError::Media(e.to_string()));
        }

        Err(ParseError::UnbekannteArt(erstes))
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Datagram::Media(paket) => paket.encode(),
            Datagram::Control(frame) => frame.encode(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::FloorMessage;
    use crate::media::MediaHeader;
    use meshptt_core::{
        ChannelId, CryptoProvider, FloorRequest, NodeId, Priority, PttError, RequestId,
    };

    /// Test-Provider: "Signatur" = erste 32 Bytes XOR Schluessel, aufgefuellt
    struct XorSigner(NodeId);

    fn xor_sig(data: &[u8], key: &NodeId) -> Vec<u8> {
        let mut sig = vec![0u8; SIGNATURE_SIZE];
        for (i, b) in data.iter().enumerate() {
            sig[i % SIGNATURE_SIZE] ^= b ^ key.as_bytes()[i % 32];
        }
        sig
    }

    impl CryptoProvider for XorSigner {
        fn public_key(&self) -> NodeId {
            self.0
        }
        fn sign(&self, data: &[u8]) -> meshptt_core::Result<Vec<u8>> {
            Ok(xor_sig(data, &self.0))
        }
        fn verify(&self, data: &[u8], signature: &[u8], signer: &NodeId) -> bool {
            xor_sig(data, signer) == signature
        }
        fn encrypt(&self, plaintext: &[u8], _key: &[u8]) -> meshptt_core::Result<Vec<u8>> {
            Ok(plaintext.to_vec())
        }
        fn decrypt(&self, ciphertext: &[u8], _key: &[u8]) -> Option<Vec<u8>> {
            Some(ciphertext.to_vec())
        }
    }

    fn signierter_request(knoten: u8) -> (XorSigner, SignedControl) {
        let id = NodeId::from_bytes([knoten; 32]);
        let signer = XorSigner(id);
        let request = FloorRequest {
            request_id: RequestId::new(),
            requester: id,
            priority: Priority::High,
            lamport: 7,
            local_timestamp_ms: 42,
            is_emergency: false,
            requested_duration_ms: 0,
        };
        let record = ControlRecord::new(
            ChannelId::new("alpha"),
            id,
            7,
            FloorMessage::Request { request },
        );
        let frame = SignedControl::signieren(record, &signer).unwrap();
        (signer, frame)
    }

    #[test]
    fn kontroll_frame_layout() {
        let (_, frame) = signierter_request(1);
        let bytes = frame.encode();
        assert_eq!(bytes[0], CONTROL_MARKER);
        assert_eq!(bytes[1], MessageType::REQUEST);
        let laenge = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
        assert_eq!(bytes.len(), CONTROL_HEADER_SIZE + laenge + SIGNATURE_SIZE);
    }

    #[test]
    fn signatur_ueberlebt_den_draht() {
        let (signer, frame) = signierter_request(2);
        let empfangen = match Datagram::parse(&frame.encode()).unwrap() {
            Datagram::Control(f) => f,
            other => panic!("Kontroll-Frame erwartet, war {other:?}"),
        };
        assert!(empfangen.verifizieren(&signer));
        assert_eq!(empfangen.record(), frame.record());
    }

    #[test]
    fn manipulierter_body_faellt_durch_verifikation() {
        let (signer, frame) = signierter_request(3);
        let mut bytes = frame.encode();
        // Lamport-Ziffer im JSON aendern ("lamport":7 -> 8)
        let pos = bytes
            .windows(9)
            .position(|w| w == b"lamport\":")
            .unwrap()
            + 9;
        bytes[pos] = b'8';
        let empfangen = SignedControl::decode(&bytes).unwrap();
        assert!(!empfangen.verifizieren(&signer));
    }

    #[test]
    fn media_und_kontrolle_werden_getrennt() {
        let paket = EncodedPacket::new(MediaHeader::new(true, 1, 320, 99), vec![1, 2, 3]);
        assert!(matches!(
            Datagram::parse(&paket.encode()).unwrap(),
            Datagram::Media(_)
        ));
        // RTP v2 beginnt mit 0b10, der Kontroll-Marker mit 0b11
        assert_ne!(CONTROL_MARKER >> 6, RTP_VERSION);
    }

    #[test]
    fn unbekannte_art_wird_abgelehnt() {
        assert!(matches!(
            Datagram::parse(&[0x00, 1, 2, 3]),
            Err(ParseError::UnbekannteArt(0x00))
        ));
        assert!(matches!(
            Datagram::parse(&[]),
            Err(ParseError::ZuKurz { .. })
        ));
    }

    #[test]
    fn unbekannter_typ_wird_abgelehnt() {
        let (_, frame) = signierter_request(4);
        let mut bytes = frame.encode();
        bytes[1] = 9;
        assert!(matches!(
            Datagram::parse(&bytes),
            Err(ParseError::UnbekannterTyp(9))
        ));
    }

    #[test]
    fn typ_konflikt_wird_erkannt() {
        let (_, frame) = signierter_request(5);
        let mut bytes = frame.encode();
        bytes[1] = MessageType::GRANT;
        assert!(matches!(
            Datagram::parse(&bytes),
            Err(ParseError::TypKonflikt { header: 2, inhalt: 1 })
        ));
    }

    #[test]
    fn ueberlange_wird_abgelehnt() {
        let mut bytes = vec![CONTROL_MARKER, MessageType::RELEASE];
        bytes.extend_from_slice(&(MAX_BODY_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(
            Datagram::parse(&bytes),
            Err(ParseError::LaengeUngueltig { .. })
        ));
    }

    #[test]
    fn abgeschnittener_frame() {
        let (_, frame) = signierter_request(6);
        let bytes = frame.encode();
        assert!(matches!(
            Datagram::parse(&bytes[..bytes.len() - 10]),
            Err(ParseError::ZuKurz { .. })
        ));
    }

    #[test]
    fn muell_json_ist_parse_fehler() {
        let mut bytes = vec![CONTROL_MARKER, MessageType::REQUEST];
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(b"{{{{");
        bytes.extend_from_slice(&[0u8; SIGNATURE_SIZE]);
        assert!(matches!(Datagram::parse(&bytes), Err(ParseError::Json(_))));
    }

    #[test]
    fn codec_liest_mehrere_frames_aus_strom() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        for i in 10..13 {
            let (_, frame) = signierter_request(i);
            codec.encode(frame, &mut buf).unwrap();
        }
        let mut gelesen = 0;
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            assert_eq!(frame.record().lamport, 7);
            gelesen += 1;
        }
        assert_eq!(gelesen, 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn falsche_signaturlaenge_beim_signieren() {
        struct Kaputt;
        impl CryptoProvider for Kaputt {
            fn public_key(&self) -> NodeId {
                NodeId::from_bytes([0; 32])
            }
            fn sign(&self, _data: &[u8]) -> meshptt_core::Result<Vec<u8>> {
                Ok(vec![1, 2, 3])
            }
            fn verify(&self, _: &[u8], _: &[u8], _: &NodeId) -> bool {
                false
            }
            fn encrypt(&self, p: &[u8], _: &[u8]) -> meshptt_core::Result<Vec<u8>> {
                Ok(p.to_vec())
            }
            fn decrypt(&self, c: &[u8], _: &[u8]) -> Option<Vec<u8>> {
                Some(c.to_vec())
            }
        }
        let record = ControlRecord::new(
            ChannelId::new("alpha"),
            NodeId::from_bytes([0; 32]),
            1,
            FloorMessage::Heartbeat {
                rank: Priority::Normal,
                holding: None,
            },
        );
        assert!(matches!(
            SignedControl::signieren(record, &Kaputt),
            Err(PttError::Krypto(_))
        ));
    }
}
