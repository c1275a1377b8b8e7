//! Abbrechbare Timer der Floor-Engine
//!
//! Pro Timer-Art laeuft hoechstens ein Task. Jede Planung vergibt eine neue
//! Generation; ein bereits gefeuerter, aber inzwischen ersetzter oder
//! abgebrochener Timer wird beim Zustellen an seiner Generation erkannt und
//! verworfen.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::TimerKind;

/// Meldung eines abgelaufenen Timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    generation: u64,
}

pub struct TimerRegistry {
    tx: mpsc::UnboundedSender<TimerFired>,
    laufend: HashMap<TimerKind, (u64, JoinHandle<()>)>,
    naechste_generation: u64,
}

impl TimerRegistry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                laufend: HashMap::new(),
                naechste_generation: 0,
            },
            rx,
        )
    }

    /// Plant `kind` neu; ein laufender Timer derselben Art wird ersetzt
    pub fn planen(&mut self, kind: TimerKind, dauer: Duration) {
        self.abbrechen(kind);
        self.naechste_generation += 1;
        let generation = self.naechste_generation;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(dauer).await;
            let _ = tx.send(TimerFired { kind, generation });
        });
        self.laufend.insert(kind, (generation, handle));
    }

    pub fn abbrechen(&mut self, kind: TimerKind) {
        if let Some((_, handle)) = self.laufend.remove(&kind) {
            handle.abort();
        }
    }

    pub fn alle_abbrechen(&mut self) {
        for (_, (_, handle)) in self.laufend.drain() {
            handle.abort();
        }
    }

    /// Nimmt eine Meldung an; `false` fuer veraltete Generationen
    pub fn annehmen(&mut self, fired: TimerFired) -> bool {
        match self.laufend.get(&fired.kind) {
            Some((generation, _)) if *generation == fired.generation => {
                self.laufend.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }

    pub fn aktiv(&self, kind: TimerKind) -> bool {
        self.laufend.contains_key(&kind)
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.alle_abbrechen();
    }
}
