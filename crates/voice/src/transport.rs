//! Multicast-Transport eines Kanals
//!
//! Ein Socket pro Kanal, Media- und Kontrollpakete teilen sich die Gruppe.
//!
//! ```text
//! UDP Socket (recv_from)
//!     |
//!     v
//! Datagram::parse()            <- Diskriminator-Byte
//!     |
//!     +--> Media   --> mpsc (bounded) --> Empfangs-Task
//!     +--> Control --> mpsc (bounded) --> Kontroll-Task
//! ```
//!
//! Empfangsfehler werden mit exponentiellem Backoff (1 ms bis 1 s) auf
//! derselben Mitgliedschaft wiederholt. Nach mehreren Fehlern in Folge wird
//! der Kanal als degradiert gemeldet, beim naechsten Erfolg als erholt.
//! Nicht parsebare Kontroll-Frames gehen als Statusmeldung an den
//! Kontroll-Task, sonstiger Datenmuell wird nur verworfen.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use meshptt_core::{ChannelId, CryptoProvider};
use meshptt_protocol::{Datagram, EncodedPacket, SignedControl, CONTROL_MARKER, MAX_PACKET_SIZE};

/// Backoff-Startwert bei Empfangsfehlern
pub const BACKOFF_START: Duration = Duration::from_millis(1);
/// Backoff-Obergrenze bei Empfangsfehlern
pub const BACKOFF_MAX: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Socket- und Queue-Einstellungen fuer alle Kanaele
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Interface fuer Mitgliedschaft und Versand (0.0.0.0 = Standard)
    pub interface: Ipv4Addr,
    pub ttl: u32,
    /// Eigene Pakete zuruecklesen (Kontroll-Frames des eigenen Knotens werden verworfen)
    pub loopback: bool,
    /// DSCP-Wert, 46 = Expedited Forwarding
    pub dscp: u8,
    pub media_queue: usize,
    pub control_queue: usize,
    /// Empfangsfehler in Folge bis der Kanal als degradiert gilt
    pub fehler_bis_degradiert: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 8,
            loopback: true,
            dscp: 46,
            media_queue: 64,
            control_queue: 64,
            fehler_bis_degradiert: 5,
        }
    }
}

impl TransportConfig {
    /// IP-TOS-Byte aus DSCP (DSCP belegt die oberen 6 Bit)
    pub fn tos(&self) -> u32 {
        (self.dscp as u32) << 2
    }

    pub fn validieren(&self) -> Result<(), String> {
        if self.dscp > 63 {
            return Err(format!("DSCP muss zwischen 0 und 63 liegen (war: {})", self.dscp));
        }
        if self.ttl == 0 || self.ttl > 255 {
            return Err(format!("TTL muss zwischen 1 und 255 liegen (war: {})", self.ttl));
        }
        if self.media_queue == 0 || self.control_queue == 0 {
            return Err("Queue-Groessen muessen groesser 0 sein".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Versand- und Empfangs-Schnittstellen
// ---------------------------------------------------------------------------

/// Versendet ein Datagramm an die Kanalgruppe (fire-and-forget)
#[async_trait]
pub trait DatagramVersand: Send + Sync {
    async fn senden(&self, daten: &[u8]) -> io::Result<()>;
}

/// Liest das naechste Datagramm der Kanalgruppe
#[async_trait]
pub trait DatagramEmpfang: Send + Sync {
    async fn empfangen(&self, puffer: &mut [u8]) -> io::Result<usize>;
}

/// Zustandsmeldungen der Lese-Schleife
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    Degradiert { fehler: String },
    Wiederhergestellt,
    /// Datagramm mit Kontroll-Marker, aber kaputtem Frame
    KontrollFrameUngueltig { fehler: String },
}

// ---------------------------------------------------------------------------
// MulticastTransport
// ---------------------------------------------------------------------------

/// Multicast-Socket eines Kanals
pub struct MulticastTransport {
    socket: UdpSocket,
    gruppe: SocketAddrV4,
    interface: Ipv4Addr,
}

impl MulticastTransport {
    /// Erstellt den Socket, bindet den Gruppenport und tritt der Gruppe bei
    pub fn oeffnen(gruppe: Ipv4Addr, port: u16, config: &TransportConfig) -> io::Result<Self> {
        if !gruppe.is_multicast() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} ist keine Multicast-Adresse", gruppe),
            ));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;

        socket.join_multicast_v4(&gruppe, &config.interface)?;
        socket.set_multicast_if_v4(&config.interface)?;
        socket.set_multicast_ttl_v4(config.ttl)?;
        socket.set_multicast_loop_v4(config.loopback)?;
        // DSCP-Markierung ist nicht auf jeder Plattform erlaubt
        if let Err(e) = socket.set_tos(config.tos()) {
            tracing::warn!(fehler = %e, dscp = config.dscp, "DSCP-Markierung nicht moeglich");
        }

        let _ = socket.set_recv_buffer_size(256 * 1024);

        let socket = UdpSocket::from_std(socket.into())?;
        tracing::info!(gruppe = %gruppe, port, ttl = config.ttl, "Multicast-Gruppe beigetreten");

        Ok(Self {
            socket,
            gruppe: SocketAddrV4::new(gruppe, port),
            interface: config.interface,
        })
    }

    pub fn gruppe(&self) -> SocketAddrV4 {
        self.gruppe
    }

    pub fn lokale_adresse(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Verlaesst die Multicast-Gruppe (letzter Schritt beim Abbau)
    pub fn verlassen(&self) -> io::Result<()> {
        self.socket
            .leave_multicast_v4(*self.gruppe.ip(), self.interface)?;
        tracing::info!(gruppe = %self.gruppe, "Multicast-Gruppe verlassen");
        Ok(())
    }
}

#[async_trait]
impl DatagramVersand for MulticastTransport {
    async fn senden(&self, daten: &[u8]) -> io::Result<()> {
        self.socket.send_to(daten, self.gruppe).await.map(|_| ())
    }
}

#[async_trait]
impl DatagramEmpfang for MulticastTransport {
    async fn empfangen(&self, puffer: &mut [u8]) -> io::Result<usize> {
        let (n, _von) = self.socket.recv_from(puffer).await?;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Nutzdaten-Verschluesselung
// ---------------------------------------------------------------------------

/// Optionale Verschluesselung der Media-Nutzdaten mit dem Kanalschluessel
#[derive(Clone)]
pub struct NutzdatenSchutz {
    crypto: Arc<dyn CryptoProvider>,
    schluessel: Option<Arc<Vec<u8>>>,
}

impl NutzdatenSchutz {
    pub fn new(crypto: Arc<dyn CryptoProvider>, schluessel: Option<Vec<u8>>) -> Self {
        Self {
            crypto,
            schluessel: schluessel.map(Arc::new),
        }
    }

    pub fn aktiv(&self) -> bool {
        self.schluessel.is_some()
    }

    pub fn schuetzen(&self, payload: Vec<u8>) -> meshptt_core::Result<Vec<u8>> {
        match &self.schluessel {
            Some(k) => self.crypto.encrypt(&payload, k),
            None => Ok(payload),
        }
    }

    /// `None` wenn die Nutzdaten nicht entschluesselt werden koennen
    pub fn oeffnen(&self, payload: Vec<u8>) -> Option<Vec<u8>> {
        match &self.schluessel {
            Some(k) => self.crypto.decrypt(&payload, k),
            None => Some(payload),
        }
    }
}

// ---------------------------------------------------------------------------
// Lese-Schleife
// ---------------------------------------------------------------------------

/// Ziele der Lese-Schleife
pub struct LeseZiele {
    pub media: mpsc::Sender<EncodedPacket>,
    pub control: mpsc::Sender<SignedControl>,
    pub status: mpsc::UnboundedSender<TransportStatus>,
}

/// Liest Datagramme bis `shutdown` ausgeloest wird und verteilt sie
pub async fn lese_schleife(
    kanal: ChannelId,
    empfang: Arc<dyn DatagramEmpfang>,
    ziele: LeseZiele,
    fehler_bis_degradiert: u32,
    shutdown: CancellationToken,
) {
    let mut puffer = vec![0u8; MAX_PACKET_SIZE + 1];
    let mut fehler_in_folge: u32 = 0;
    let mut backoff = BACKOFF_START;
    let mut degradiert = false;

    tracing::debug!(kanal = %kanal, "Lese-Schleife gestartet");

    loop {
        let ergebnis = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = empfang.empfangen(&mut puffer) => r,
        };

        let n = match ergebnis {
            Ok(n) => n,
            Err(e) => {
                fehler_in_folge += 1;
                tracing::error!(kanal = %kanal, fehler = %e, versuch = fehler_in_folge, "Empfangsfehler");
                if !degradiert && fehler_in_folge >= fehler_bis_degradiert {
                    degradiert = true;
                    tracing::warn!(kanal = %kanal, "Kanal degradiert");
                    let _ = ziele.status.send(TransportStatus::Degradiert {
                        fehler: e.to_string(),
                    });
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
                continue;
            }
        };

        fehler_in_folge = 0;
        backoff = BACKOFF_START;
        if degradiert {
            degradiert = false;
            tracing::info!(kanal = %kanal, "Kanal wiederhergestellt");
            let _ = ziele.status.send(TransportStatus::Wiederhergestellt);
        }

        match Datagram::parse(&puffer[..n]) {
            Ok(Datagram::Media(paket)) => {
                if ziele.media.try_send(paket).is_err() {
                    tracing::debug!(kanal = %kanal, "Media-Queue voll, Paket verworfen");
                }
            }
            Ok(Datagram::Control(frame)) => {
                if ziele.control.try_send(frame).is_err() {
                    tracing::warn!(kanal = %kanal, "Kontroll-Queue voll, Frame verworfen");
                }
            }
            Err(e) if puffer[..n].first() == Some(&CONTROL_MARKER) => {
                tracing::warn!(kanal = %kanal, bytes = n, fehler = %e, "Ungueltiger Kontroll-Frame verworfen");
                let _ = ziele.status.send(TransportStatus::KontrollFrameUngueltig {
                    fehler: e.to_string(),
                });
            }
            Err(e) => {
                tracing::debug!(kanal = %kanal, bytes = n, fehler = %e, "Ungueltiges Datagramm verworfen");
            }
        }
    }

    tracing::debug!(kanal = %kanal, "Lese-Schleife beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use meshptt_protocol::MediaHeader;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Empfangs-Attrappe mit vorgegebener Ergebnisfolge
    struct Skript {
        schritte: Mutex<VecDeque<io::Result<Vec<u8>>>>,
    }

    #[async_trait]
    impl DatagramEmpfang for Skript {
        async fn empfangen(&self, puffer: &mut [u8]) -> io::Result<usize> {
            let naechster = self.schritte.lock().pop_front();
            match naechster {
                Some(Ok(daten)) => {
                    puffer[..daten.len()].copy_from_slice(&daten);
                    Ok(daten.len())
                }
                Some(Err(e)) => Err(e),
                None => std::future::pending().await,
            }
        }
    }

    fn media_bytes(seq: u16) -> Vec<u8> {
        EncodedPacket::new(MediaHeader::new(false, seq, 0, 1), vec![1, 2, 3]).encode()
    }

    fn fehler() -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::Other, "netz weg"))
    }

    #[test]
    fn tos_aus_dscp() {
        let config = TransportConfig::default();
        assert_eq!(config.tos(), 0xB8);
        assert!(config.validieren().is_ok());
        let falsch = TransportConfig {
            dscp: 64,
            ..TransportConfig::default()
        };
        assert!(falsch.validieren().is_err());
    }

    #[test]
    fn keine_multicast_adresse() {
        let r = MulticastTransport::oeffnen(
            Ipv4Addr::new(10, 0, 0, 1),
            5004,
            &TransportConfig::default(),
        );
        assert_eq!(r.err().map(|e| e.kind()), Some(io::ErrorKind::InvalidInput));
    }

    #[tokio::test(start_paused = true)]
    async fn verteilt_media_und_meldet_degradierung() {
        let mut schritte = VecDeque::new();
        schritte.push_back(Ok(media_bytes(1)));
        schritte.push_back(Ok(vec![0xFF, 0x00]));
        for _ in 0..3 {
            schritte.push_back(fehler());
        }
        schritte.push_back(Ok(media_bytes(2)));
        let empfang = Arc::new(Skript {
            schritte: Mutex::new(schritte),
        });

        let (media_tx, mut media_rx) = mpsc::channel(8);
        let (control_tx, _control_rx) = mpsc::channel(8);
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let task = tokio::spawn(lese_schleife(
            ChannelId::new("alpha"),
            empfang,
            LeseZiele {
                media: media_tx,
                control: control_tx,
                status: status_tx,
            },
            3,
            token.clone(),
        ));

        assert_eq!(media_rx.recv().await.unwrap().sequence(), 1);
        assert!(matches!(
            status_rx.recv().await.unwrap(),
            TransportStatus::Degradiert { .. }
        ));
        assert_eq!(media_rx.recv().await.unwrap().sequence(), 2);
        assert_eq!(status_rx.recv().await.unwrap(), TransportStatus::Wiederhergestellt);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn kaputter_kontroll_frame_wird_gemeldet() {
        let mut schritte = VecDeque::new();
        // Kontroll-Marker mit abgeschnittenem Header
        schritte.push_back(Ok(vec![CONTROL_MARKER, 0x01, 0x00]));
        // Unbekannte Art: nur verworfen
        schritte.push_back(Ok(vec![0xFF, 0x00]));
        schritte.push_back(Ok(media_bytes(7)));
        let empfang = Arc::new(Skript {
            schritte: Mutex::new(schritte),
        });

        let (media_tx, mut media_rx) = mpsc::channel(8);
        let (control_tx, mut control_rx) = mpsc::channel(8);
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let task = tokio::spawn(lese_schleife(
            ChannelId::new("alpha"),
            empfang,
            LeseZiele {
                media: media_tx,
                control: control_tx,
                status: status_tx,
            },
            3,
            token.clone(),
        ));

        assert_eq!(media_rx.recv().await.unwrap().sequence(), 7);
        assert!(matches!(
            status_rx.try_recv().unwrap(),
            TransportStatus::KontrollFrameUngueltig { .. }
        ));
        assert!(status_rx.try_recv().is_err());
        assert!(control_rx.try_recv().is_err());

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn volle_queue_verwirft_ohne_blockieren() {
        let mut schritte = VecDeque::new();
        for seq in 0..5 {
            schritte.push_back(Ok(media_bytes(seq)));
        }
        let empfang = Arc::new(Skript {
            schritte: Mutex::new(schritte),
        });
        let (media_tx, mut media_rx) = mpsc::channel(2);
        let (control_tx, _control_rx) = mpsc::channel(2);
        let (status_tx, _status_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let task = tokio::spawn(lese_schleife(
            ChannelId::new("alpha"),
            empfang,
            LeseZiele {
                media: media_tx,
                control: control_tx,
                status: status_tx,
            },
            3,
            token.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        task.await.unwrap();

        assert_eq!(media_rx.recv().await.unwrap().sequence(), 0);
        assert_eq!(media_rx.recv().await.unwrap().sequence(), 1);
        assert!(media_rx.try_recv().is_err());
    }
}
