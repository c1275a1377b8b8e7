//! Zwei Knoten an einem In-Memory-Datagramm-Bus
//!
//! Echte Ed25519-Signaturen, echte Tasks, simulierte Zeit. Nur Socket und
//! Codec sind ersetzt.

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};

use meshptt_audio::{
    AudioFrame, AudioResult, CaptureSource, KanalSink, OutputSink, SprachDecoder, SprachEncoder,
    ToneCapture,
};
use meshptt_core::{
    ChannelId, FloorEvent, FloorOutcome, FloorState, NodeId, Priority, PttError, Result,
};
use meshptt_crypto::{Ed25519Provider, NodeIdentity};
use meshptt_protocol::{
    ControlRecord, Datagram, FloorMessage, OpusConfig, SignedControl, CONTROL_MARKER,
};
use meshptt_session::{
    AudioFabrik, ChannelConfig, KanalAnschluss, NetzFabrik, PttCore, SessionConfig, SessionEvent,
};
use meshptt_voice::{DatagramEmpfang, DatagramVersand, TransportConfig};

// ---------------------------------------------------------------------------
// In-Memory-Bus
// ---------------------------------------------------------------------------

type Gruppe = (Ipv4Addr, u16);

#[derive(Default)]
struct Bus {
    mitglieder: Mutex<HashMap<Gruppe, Vec<(u64, mpsc::UnboundedSender<Vec<u8>>)>>>,
    naechste_id: Mutex<u64>,
}

impl Bus {
    fn verteilen(&self, gruppe: Gruppe, von: Option<u64>, daten: &[u8]) {
        if let Some(liste) = self.mitglieder.lock().get(&gruppe) {
            for (id, tx) in liste {
                if Some(*id) != von {
                    let _ = tx.send(daten.to_vec());
                }
            }
        }
    }

    fn mitglieder(&self, gruppe: Gruppe) -> usize {
        self.mitglieder.lock().get(&gruppe).map_or(0, Vec::len)
    }
}

struct BusVersand {
    bus: Arc<Bus>,
    gruppe: Gruppe,
    id: u64,
}

#[async_trait]
impl DatagramVersand for BusVersand {
    async fn senden(&self, daten: &[u8]) -> io::Result<()> {
        self.bus.verteilen(self.gruppe, Some(self.id), daten);
        Ok(())
    }
}

struct BusEmpfang {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl DatagramEmpfang for BusEmpfang {
    async fn empfangen(&self, puffer: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(daten) => {
                let n = daten.len().min(puffer.len());
                puffer[..n].copy_from_slice(&daten[..n]);
                Ok(n)
            }
            None => std::future::pending().await,
        }
    }
}

struct BusFabrik(Arc<Bus>);

impl NetzFabrik for BusFabrik {
    fn oeffnen(
        &self,
        kanal: &ChannelConfig,
        _config: &TransportConfig,
    ) -> io::Result<KanalAnschluss> {
        let gruppe = (kanal.multicast_address, kanal.port);
        let id = {
            let mut naechste = self.0.naechste_id.lock();
            *naechste += 1;
            *naechste
        };
        let (tx, rx) = mpsc::unbounded_channel();
        self.0
            .mitglieder
            .lock()
            .entry(gruppe)
            .or_default()
            .push((id, tx));

        let bus = Arc::clone(&self.0);
        Ok(KanalAnschluss {
            versand: Arc::new(BusVersand {
                bus: Arc::clone(&self.0),
                gruppe,
                id,
            }),
            empfang: Arc::new(BusEmpfang {
                rx: tokio::sync::Mutex::new(rx),
            }),
            verlassen: Box::new(move || {
                if let Some(liste) = bus.mitglieder.lock().get_mut(&gruppe) {
                    liste.retain(|(m, _)| *m != id);
                }
                Ok(())
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Test-Audio: PCM als i16 statt Opus
// ---------------------------------------------------------------------------

struct PcmEncoder;

impl SprachEncoder for PcmEncoder {
    fn encode(&mut self, pcm: &[f32]) -> AudioResult<Vec<u8>> {
        Ok(pcm
            .iter()
            .flat_map(|s| ((s * i16::MAX as f32) as i16).to_le_bytes())
            .collect())
    }
    fn set_bitrate_kbps(&mut self, _kbps: u16) -> AudioResult<()> {
        Ok(())
    }
    fn set_verlust_hinweis(&mut self, _prozent: u8) -> AudioResult<()> {
        Ok(())
    }
    fn frame_size(&self) -> usize {
        320
    }
}

struct PcmDecoder;

impl SprachDecoder for PcmDecoder {
    fn decode(&mut self, data: &[u8]) -> AudioResult<Vec<f32>> {
        Ok(data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
            .collect())
    }
    fn decode_fec(&mut self, _naechstes: &[u8]) -> AudioResult<Vec<f32>> {
        Ok(vec![0.0; 320])
    }
    fn decode_plc(&mut self) -> AudioResult<Vec<f32>> {
        Ok(vec![0.0; 320])
    }
    fn zuruecksetzen(&mut self) -> AudioResult<()> {
        Ok(())
    }
    fn frame_size(&self) -> usize {
        320
    }
}

#[derive(Default)]
struct TestAudio {
    senken: Mutex<HashMap<ChannelId, mpsc::UnboundedReceiver<AudioFrame>>>,
}

impl TestAudio {
    fn wiedergabe(&self, kanal: &ChannelId) -> mpsc::UnboundedReceiver<AudioFrame> {
        self.senken.lock().remove(kanal).expect("Senke nicht erzeugt")
    }
}

impl AudioFabrik for TestAudio {
    fn capture(&self, _kanal: &ChannelId, sample_rate: u32) -> Result<Box<dyn CaptureSource>> {
        Ok(Box::new(ToneCapture::new(sample_rate, 440.0, 0.5)))
    }

    fn sink(&self, kanal: &ChannelId) -> Result<Box<dyn OutputSink>> {
        let (sink, rx) = KanalSink::new();
        self.senken.lock().insert(kanal.clone(), rx);
        Ok(Box::new(sink))
    }

    fn encoder(&self, _config: &OpusConfig) -> Result<Box<dyn SprachEncoder>> {
        Ok(Box::new(PcmEncoder))
    }

    fn decoder(&self, _config: &OpusConfig) -> Result<Box<dyn SprachDecoder>> {
        Ok(Box::new(PcmDecoder))
    }
}

// ---------------------------------------------------------------------------
// Aufbau
// ---------------------------------------------------------------------------

struct Knoten {
    core: PttCore,
    audio: Arc<TestAudio>,
}

fn knoten(bus: &Arc<Bus>) -> Knoten {
    let provider = Arc::new(Ed25519Provider::new(NodeIdentity::generate()));
    let audio = Arc::new(TestAudio::default());
    let core = PttCore::new(
        provider,
        SessionConfig::default(),
        audio.clone(),
        Arc::new(BusFabrik(Arc::clone(bus))),
    )
    .unwrap();
    Knoten { core, audio }
}

fn alpha() -> ChannelConfig {
    ChannelConfig::new("alpha", Ipv4Addr::new(239, 10, 0, 1), 5004).mit_schluessel(&[9u8; 32])
}

async fn warten_bis(
    rx: &mut watch::Receiver<FloorState>,
    bedingung: impl Fn(&FloorState) -> bool,
) -> FloorState {
    let ergebnis = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let aktuell = *rx.borrow_and_update();
            if bedingung(&aktuell) {
                return aktuell;
            }
            rx.changed().await.expect("Kontroll-Task beendet");
        }
    })
    .await;
    ergebnis.expect("Zustand nicht erreicht")
}

async fn floor_ereignis(
    rx: &mut broadcast::Receiver<SessionEvent>,
    passt: impl Fn(&FloorEvent) -> bool,
) -> FloorEvent {
    let ergebnis = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::Floor { event, .. }) if passt(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("Ereignisstrom geschlossen"),
            }
        }
    })
    .await;
    ergebnis.expect("Ereignis nicht erhalten")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn grant_wird_gesehen_und_audio_kommt_an() {
    let bus = Arc::new(Bus::default());
    let a = knoten(&bus);
    let b = knoten(&bus);
    let kanal = alpha().id;

    a.core.join_channel(alpha()).await.unwrap();
    b.core.join_channel(alpha()).await.unwrap();
    let mut b_ereignisse = b.core.subscribe();
    let mut b_floor = b.core.floor_beobachten(&kanal).unwrap();
    let mut b_wiedergabe = b.audio.wiedergabe(&kanal);

    let ergebnis = a.core.request_floor(&kanal, Priority::Normal, false).await;
    assert_eq!(ergebnis.unwrap(), FloorOutcome::Granted);
    assert_eq!(a.core.floor_state(&kanal), Some(FloorState::Granted));

    let halter = a.core.knoten();
    warten_bis(&mut b_floor, |s| *s == FloorState::Taken(halter)).await;
    let event = floor_ereignis(&mut b_ereignisse, |e| matches!(e, FloorEvent::Granted { .. })).await;
    assert!(matches!(event, FloorEvent::Granted { holder, .. } if holder == halter));

    // Verschluesseltes Audio von A wird bei B hoerbar abgespielt
    let hoerbar = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(frame) = b_wiedergabe.recv().await {
            if frame.pegel() > 0.1 {
                return true;
            }
        }
        false
    })
    .await;
    assert!(matches!(hoerbar, Ok(true)));

    a.core.release_floor(&kanal).await.unwrap();
    warten_bis(&mut b_floor, |s| *s == FloorState::Idle).await;
    assert_eq!(a.core.floor_state(&kanal), Some(FloorState::Idle));

    a.core.herunterfahren().await;
    b.core.herunterfahren().await;
}

#[tokio::test(start_paused = true)]
async fn zweite_anfrage_wartet_und_wird_befoerdert() {
    let bus = Arc::new(Bus::default());
    let a = knoten(&bus);
    let b = knoten(&bus);
    let kanal = alpha().id;

    a.core.join_channel(alpha()).await.unwrap();
    b.core.join_channel(alpha()).await.unwrap();
    let mut b_floor = b.core.floor_beobachten(&kanal).unwrap();

    assert_eq!(
        a.core.request_floor(&kanal, Priority::Normal, false).await.unwrap(),
        FloorOutcome::Granted
    );
    warten_bis(&mut b_floor, |s| matches!(s, FloorState::Taken(_))).await;

    let ergebnis = b.core.request_floor(&kanal, Priority::Normal, false).await.unwrap();
    assert_eq!(ergebnis, FloorOutcome::Queued { position: 1 });
    assert_eq!(b.core.floor_state(&kanal), Some(FloorState::Queued));

    a.core.release_floor(&kanal).await.unwrap();
    warten_bis(&mut b_floor, |s| *s == FloorState::Granted).await;

    let mut a_floor = a.core.floor_beobachten(&kanal).unwrap();
    let b_id = b.core.knoten();
    warten_bis(&mut a_floor, |s| *s == FloorState::Taken(b_id)).await;

    a.core.herunterfahren().await;
    b.core.herunterfahren().await;
}

#[tokio::test(start_paused = true)]
async fn notfall_verdraengt_den_halter() {
    let bus = Arc::new(Bus::default());
    let a = knoten(&bus);
    let b = knoten(&bus);
    let kanal = alpha().id;

    a.core.join_channel(alpha()).await.unwrap();
    b.core.join_channel(alpha()).await.unwrap();
    let mut a_ereignisse = a.core.subscribe();
    let mut a_floor = a.core.floor_beobachten(&kanal).unwrap();
    let mut b_floor = b.core.floor_beobachten(&kanal).unwrap();

    a.core.request_floor(&kanal, Priority::Normal, false).await.unwrap();
    warten_bis(&mut b_floor, |s| matches!(s, FloorState::Taken(_))).await;

    let ergebnis = b.core.request_floor(&kanal, Priority::Emergency, true).await.unwrap();
    assert_eq!(ergebnis, FloorOutcome::Granted);

    let b_id = b.core.knoten();
    let event = floor_ereignis(&mut a_ereignisse, |e| matches!(e, FloorEvent::Revoked { .. })).await;
    assert_eq!(
        event,
        FloorEvent::Revoked {
            holder: a.core.knoten(),
            by: b_id
        }
    );
    warten_bis(&mut a_floor, |s| *s == FloorState::Taken(b_id)).await;

    a.core.herunterfahren().await;
    b.core.herunterfahren().await;
}

#[tokio::test(start_paused = true)]
async fn verlassen_als_halter_gibt_frei() {
    let bus = Arc::new(Bus::default());
    let a = knoten(&bus);
    let b = knoten(&bus);
    let config = alpha();
    let kanal = config.id.clone();
    let gruppe = (config.multicast_address, config.port);

    a.core.join_channel(alpha()).await.unwrap();
    b.core.join_channel(alpha()).await.unwrap();
    assert_eq!(bus.mitglieder(gruppe), 2);
    let mut b_ereignisse = b.core.subscribe();
    let mut b_floor = b.core.floor_beobachten(&kanal).unwrap();

    a.core.request_floor(&kanal, Priority::Normal, false).await.unwrap();
    warten_bis(&mut b_floor, |s| matches!(s, FloorState::Taken(_))).await;

    a.core.leave_channel(&kanal).await;
    assert_eq!(bus.mitglieder(gruppe), 1);
    assert!(a.core.kanaele().is_empty());

    let event = floor_ereignis(&mut b_ereignisse, |e| matches!(e, FloorEvent::Released { .. })).await;
    assert_eq!(
        event,
        FloorEvent::Released {
            holder: a.core.knoten()
        }
    );
    warten_bis(&mut b_floor, |s| *s == FloorState::Idle).await;

    // Nach dem Verlassen ist der Kanal unbekannt, erneutes Verlassen ist harmlos
    let fehler = a.core.request_floor(&kanal, Priority::Normal, false).await;
    assert!(matches!(fehler, Err(PttError::KanalNichtGefunden(_))));
    a.core.leave_channel(&kanal).await;

    b.core.herunterfahren().await;
}

#[tokio::test(start_paused = true)]
async fn ungueltige_zustaende_werden_sofort_gemeldet() {
    let bus = Arc::new(Bus::default());
    let a = knoten(&bus);
    let kanal = alpha().id;

    let erster = a.core.join_channel(alpha()).await.unwrap();
    let zweiter = a.core.join_channel(alpha()).await.unwrap();
    assert_eq!(erster.kanal(), zweiter.kanal());
    assert_eq!(a.core.kanaele(), vec![kanal.clone()]);

    let fehler = a.core.release_floor(&kanal).await;
    assert!(matches!(fehler, Err(PttError::InvalidState { .. })));

    assert_eq!(
        a.core.request_floor(&kanal, Priority::High, false).await.unwrap(),
        FloorOutcome::Granted
    );
    let doppelt = a.core.request_floor(&kanal, Priority::High, false).await;
    assert!(matches!(doppelt, Err(PttError::InvalidState { .. })));

    a.core.herunterfahren().await;
}

#[tokio::test(start_paused = true)]
async fn gefaelschte_kontrollnachricht_wird_verworfen() {
    let bus = Arc::new(Bus::default());
    let a = knoten(&bus);
    let config = alpha();
    let kanal = config.id.clone();

    a.core.join_channel(alpha()).await.unwrap();
    let mut ereignisse = a.core.subscribe();

    // Signiert von einem Angreifer, ausgegeben als fremder Knoten
    let angreifer = Ed25519Provider::new(NodeIdentity::generate());
    let opfer = NodeId::from_bytes([0x42; 32]);
    let record = ControlRecord::new(
        kanal.clone(),
        opfer,
        1,
        FloorMessage::Release {
            holder: opfer,
            request_id: meshptt_core::RequestId::new(),
        },
    );
    let frame = SignedControl::signieren(record, &angreifer).unwrap();
    bus.verteilen(
        (config.multicast_address, config.port),
        None,
        &Datagram::Control(frame).encode(),
    );

    let event = floor_ereignis(&mut ereignisse, |e| {
        matches!(e, FloorEvent::MessageRejected { .. })
    })
    .await;
    assert!(matches!(event, FloorEvent::MessageRejected { .. }));
    assert_eq!(a.core.floor_state(&kanal), Some(FloorState::Idle));
    assert_ne!(a.core.knoten(), opfer);

    a.core.herunterfahren().await;
}

#[tokio::test(start_paused = true)]
async fn abgeschnittener_kontroll_frame_zaehlt_als_abgelehnt() {
    let bus = Arc::new(Bus::default());
    let a = knoten(&bus);
    let config = alpha();
    let kanal = config.id.clone();

    a.core.join_channel(alpha()).await.unwrap();
    let mut ereignisse = a.core.subscribe();

    let fremd = Ed25519Provider::new(NodeIdentity::generate());
    let absender = NodeId::from_bytes([0x17; 32]);
    let record = ControlRecord::new(
        kanal.clone(),
        absender,
        1,
        FloorMessage::Release {
            holder: absender,
            request_id: meshptt_core::RequestId::new(),
        },
    );
    let mut bytes = Datagram::Control(SignedControl::signieren(record, &fremd).unwrap()).encode();
    // Signatur unvollstaendig
    bytes.truncate(bytes.len() - 10);
    assert_eq!(bytes[0], CONTROL_MARKER);
    bus.verteilen((config.multicast_address, config.port), None, &bytes);

    let event = floor_ereignis(&mut ereignisse, |e| {
        matches!(e, FloorEvent::MessageRejected { .. })
    })
    .await;
    let FloorEvent::MessageRejected { reason } = event else {
        unreachable!()
    };
    assert!(reason.contains("nicht parsebar"), "{reason}");
    assert_eq!(a.core.floor_state(&kanal), Some(FloorState::Idle));

    a.core.herunterfahren().await;
}
