//! Netzanschluss eines Kanals
//!
//! Die Session kennt nur Versand und Empfang als Traits. Die
//! [`MulticastFabrik`] liefert echte Multicast-Sockets, Tests stecken
//! einen In-Memory-Bus dazwischen.

use std::io;
use std::sync::Arc;

use meshptt_voice::{DatagramEmpfang, DatagramVersand, MulticastTransport, TransportConfig};

use crate::config::ChannelConfig;

/// Geoeffneter Anschluss an die Gruppe eines Kanals
pub struct KanalAnschluss {
    pub versand: Arc<dyn DatagramVersand>,
    pub empfang: Arc<dyn DatagramEmpfang>,
    /// Verlaesst die Gruppe (letzter Schritt beim Abbau)
    pub verlassen: Box<dyn FnOnce() -> io::Result<()> + Send + Sync>,
}

impl std::fmt::Debug for KanalAnschluss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KanalAnschluss").finish_non_exhaustive()
    }
}

/// Oeffnet Netzanschluesse fuer Kanaele
pub trait NetzFabrik: Send + Sync + 'static {
    fn oeffnen(&self, kanal: &ChannelConfig, config: &TransportConfig)
        -> io::Result<KanalAnschluss>;
}

/// UDP-Multicast ueber `socket2`
#[derive(Debug, Default, Clone, Copy)]
pub struct MulticastFabrik;

impl NetzFabrik for MulticastFabrik {
    fn oeffnen(
        &self,
        kanal: &ChannelConfig,
        config: &TransportConfig,
    ) -> io::Result<KanalAnschluss> {
        let transport = Arc::new(MulticastTransport::oeffnen(
            kanal.multicast_address,
            kanal.port,
            config,
        )?);
        let fuer_abbau = Arc::clone(&transport);
        Ok(KanalAnschluss {
            versand: transport.clone(),
            empfang: transport,
            verlassen: Box::new(move || fuer_abbau.verlassen()),
        })
    }
}
