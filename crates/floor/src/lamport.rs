//! Lamport-Uhr eines Knotens
//!
//! Eine Uhr pro Prozess, von allen Kanaelen gemeinsam genutzt. Jeder
//! Versand zaehlt weiter, jeder Empfang setzt auf `max(lokal, empfangen) + 1`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LamportClock {
    wert: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Startet bei einem bekannten Wert (Tests, Wiederanlauf)
    pub fn mit_wert(wert: u64) -> Self {
        Self {
            wert: AtomicU64::new(wert),
        }
    }

    /// Naechster Zeitstempel fuer einen Versand
    pub fn tick(&self) -> u64 {
        self.wert.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Verarbeitet einen empfangenen Zeitstempel und liefert den neuen Wert
    pub fn beobachten(&self, empfangen: u64) -> u64 {
        let mut aktuell = self.wert.load(Ordering::Acquire);
        loop {
            let neu = aktuell.max(empfangen) + 1;
            match self
                .wert
                .compare_exchange_weak(aktuell, neu, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return neu,
                Err(anderer) => aktuell = anderer,
            }
        }
    }

    pub fn aktuell(&self) -> u64 {
        self.wert.load(Ordering::Acquire)
    }
}
