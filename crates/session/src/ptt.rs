//! `PttCore` – Aufrufer-API eines Knotens
//!
//! Verwaltet alle beigetretenen Kanaele. Clone teilt den inneren Zustand,
//! alle Methoden nehmen `&self`. Ueber alle Kanaele laeuft eine
//! gemeinsame Lamport-Uhr.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};

use meshptt_core::{
    ChannelId, CryptoProvider, FloorOutcome, FloorState, NodeId, Priority, PttError, Result,
};
use meshptt_floor::LamportClock;

use crate::anschluss::NetzFabrik;
use crate::audio::AudioFabrik;
use crate::channel::{ChannelSession, KanalHandle, Umgebung};
use crate::config::{ChannelConfig, SessionConfig};
use crate::event::{SessionEvent, EREIGNIS_KAPAZITAET};

#[derive(Clone)]
pub struct PttCore {
    inner: Arc<PttCoreInner>,
}

struct PttCoreInner {
    umgebung: Umgebung,
    kanaele: DashMap<ChannelId, ChannelSession>,
}

impl PttCore {
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        config: SessionConfig,
        audio: Arc<dyn AudioFabrik>,
        netz: Arc<dyn NetzFabrik>,
    ) -> Result<Self> {
        config.validieren()?;
        let (events, _) = broadcast::channel(EREIGNIS_KAPAZITAET);
        tracing::info!(knoten = %crypto.public_key(), rang = %config.rang, "PttCore erstellt");
        Ok(Self {
            inner: Arc::new(PttCoreInner {
                umgebung: Umgebung {
                    crypto,
                    config,
                    audio,
                    netz,
                    uhr: Arc::new(LamportClock::new()),
                    events,
                },
                kanaele: DashMap::new(),
            }),
        })
    }

    /// Identitaet dieses Knotens
    pub fn knoten(&self) -> NodeId {
        self.inner.umgebung.crypto.public_key()
    }

    /// Ereignisse aller Kanaele
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.umgebung.events.subscribe()
    }

    /// Tritt einem Kanal bei; erneuter Beitritt liefert die bestehende Session
    pub async fn join_channel(&self, config: ChannelConfig) -> Result<KanalHandle> {
        match self.inner.kanaele.entry(config.id.clone()) {
            Entry::Occupied(eintrag) => {
                if eintrag.get().config() != &config {
                    tracing::warn!(
                        kanal = %config.id,
                        "Kanal bereits beigetreten, neue Konfiguration ignoriert"
                    );
                }
                Ok(eintrag.get().handle())
            }
            Entry::Vacant(eintrag) => {
                let session = ChannelSession::beitreten(config, &self.inner.umgebung)?;
                let handle = session.handle();
                eintrag.insert(session);
                Ok(handle)
            }
        }
    }

    /// Verlaesst einen Kanal; unbekannte Kanaele sind kein Fehler
    pub async fn leave_channel(&self, kanal: &ChannelId) {
        match self.inner.kanaele.remove(kanal) {
            Some((_, session)) => session.verlassen().await,
            None => tracing::debug!(kanal = %kanal, "Kanal war nicht beigetreten"),
        }
    }

    pub async fn request_floor(
        &self,
        kanal: &ChannelId,
        priority: Priority,
        is_emergency: bool,
    ) -> Result<FloorOutcome> {
        self.request_floor_mit_dauer(kanal, priority, is_emergency, 0)
            .await
    }

    /// Wie [`request_floor`](Self::request_floor), mit automatischer Freigabe nach `dauer_ms`
    pub async fn request_floor_mit_dauer(
        &self,
        kanal: &ChannelId,
        priority: Priority,
        is_emergency: bool,
        dauer_ms: u32,
    ) -> Result<FloorOutcome> {
        let handle = self.handle(kanal)?;
        handle.request_floor(priority, is_emergency, dauer_ms).await
    }

    pub async fn release_floor(&self, kanal: &ChannelId) -> Result<()> {
        self.handle(kanal)?.release_floor().await
    }

    pub fn floor_state(&self, kanal: &ChannelId) -> Option<FloorState> {
        self.inner
            .kanaele
            .get(kanal)
            .map(|s| s.handle().floor_state())
    }

    pub fn floor_beobachten(&self, kanal: &ChannelId) -> Option<watch::Receiver<FloorState>> {
        self.inner
            .kanaele
            .get(kanal)
            .map(|s| s.handle().floor_beobachten())
    }

    /// Beigetretene Kanaele, sortiert
    pub fn kanaele(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.inner.kanaele.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Verlaesst alle Kanaele
    pub async fn herunterfahren(&self) {
        for kanal in self.kanaele() {
            self.leave_channel(&kanal).await;
        }
        tracing::info!("Alle Kanaele verlassen");
    }

    /// Handle ohne DashMap-Referenz ueber ein `await` hinweg
    fn handle(&self, kanal: &ChannelId) -> Result<KanalHandle> {
        self.inner
            .kanaele
            .get(kanal)
            .map(|s| s.handle())
            .ok_or_else(|| PttError::KanalNichtGefunden(kanal.to_string()))
    }
}
