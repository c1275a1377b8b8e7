//! Arbiter-Wahl fuer den zentralen Modus
//!
//! Jeder Knoten waehlt aus sich selbst und allen innerhalb der
//! Erreichbarkeitsdauer gesehenen Peers: hoechster Rang gewinnt, bei
//! gleichem Rang die kleinere NodeId. Alle Knoten mit derselben Peer-Sicht
//! kommen zum selben Ergebnis; abweichende Sichten (Split-Brain) werden
//! ueber die Gesamtordnung der Grants aufgeloest.

use std::collections::HashMap;

use meshptt_core::{NodeId, Priority};

#[derive(Debug, Clone, Copy)]
struct Peer {
    rang: Priority,
    zuletzt_ms: u64,
}

#[derive(Debug)]
pub struct ArbiterWahl {
    knoten: NodeId,
    rang: Priority,
    erreichbar_ms: u64,
    peers: HashMap<NodeId, Peer>,
    aktuell: Option<NodeId>,
}

impl ArbiterWahl {
    pub fn new(knoten: NodeId, rang: Priority, erreichbar_ms: u64) -> Self {
        Self {
            knoten,
            rang,
            erreichbar_ms,
            peers: HashMap::new(),
            aktuell: None,
        }
    }

    /// Vermerkt ein Lebenszeichen; ohne Rang bleibt der bekannte Rang stehen
    pub fn gesehen(&mut self, peer: NodeId, rang: Option<Priority>, jetzt_ms: u64) {
        if peer == self.knoten {
            return;
        }
        let eintrag = self.peers.entry(peer).or_insert(Peer {
            rang: Priority::default(),
            zuletzt_ms: jetzt_ms,
        });
        if let Some(rang) = rang {
            eintrag.rang = rang;
        }
        eintrag.zuletzt_ms = eintrag.zuletzt_ms.max(jetzt_ms);
    }

    /// Entfernt einen nicht antwortenden Peer aus der Wahl
    pub fn entfernen(&mut self, peer: &NodeId) {
        self.peers.remove(peer);
    }

    pub fn erreichbare_peers(&self, jetzt_ms: u64) -> usize {
        self.peers
            .values()
            .filter(|p| jetzt_ms.saturating_sub(p.zuletzt_ms) <= self.erreichbar_ms)
            .count()
    }

    /// Fuehrt die Wahl durch; `Some` nur wenn sich der Arbiter geaendert hat
    pub fn waehlen(&mut self, jetzt_ms: u64) -> Option<NodeId> {
        let erreichbar_ms = self.erreichbar_ms;
        self.peers
            .retain(|_, p| jetzt_ms.saturating_sub(p.zuletzt_ms) <= erreichbar_ms);

        let gewinner = self
            .peers
            .iter()
            .map(|(id, p)| (*id, p.rang))
            .chain(std::iter::once((self.knoten, self.rang)))
            .max_by(|(a_id, a_rang), (b_id, b_rang)| {
                a_rang.cmp(b_rang).then_with(|| b_id.cmp(a_id))
            })
            .map(|(id, _)| id);

        if gewinner != self.aktuell {
            self.aktuell = gewinner;
            gewinner
        } else {
            None
        }
    }

    pub fn arbiter(&self) -> Option<NodeId> {
        self.aktuell
    }

    pub fn bin_arbiter(&self) -> bool {
        self.aktuell == Some(self.knoten)
    }

    pub fn rang(&self) -> Priority {
        self.rang
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        NodeId::from_bytes([b; 32])
    }

    #[test]
    fn alleine_bin_ich_arbiter() {
        let mut wahl = ArbiterWahl::new(id(5), Priority::Normal, 10_000);
        assert_eq!(wahl.waehlen(0), Some(id(5)));
        assert!(wahl.bin_arbiter());
        // Keine Aenderung, keine Meldung
        assert_eq!(wahl.waehlen(1), None);
    }

    #[test]
    fn hoechster_rang_dann_kleinste_id() {
        let mut wahl = ArbiterWahl::new(id(5), Priority::Normal, 10_000);
        wahl.gesehen(id(9), Some(Priority::High), 0);
        wahl.gesehen(id(7), Some(Priority::High), 0);
        wahl.gesehen(id(1), Some(Priority::Low), 0);
        assert_eq!(wahl.waehlen(0), Some(id(7)));
        assert!(!wahl.bin_arbiter());
    }

    #[test]
    fn abgelaufene_peers_fallen_heraus() {
        let mut wahl = ArbiterWahl::new(id(5), Priority::Normal, 10_000);
        wahl.gesehen(id(2), Some(Priority::Emergency), 0);
        assert_eq!(wahl.waehlen(5_000), Some(id(2)));
        assert_eq!(wahl.erreichbare_peers(5_000), 1);
        assert_eq!(wahl.waehlen(10_001), Some(id(5)));
        assert_eq!(wahl.erreichbare_peers(10_001), 0);
    }

    #[test]
    fn rang_bleibt_bei_lebenszeichen_ohne_rang() {
        let mut wahl = ArbiterWahl::new(id(5), Priority::Normal, 10_000);
        wahl.gesehen(id(8), Some(Priority::High), 0);
        wahl.gesehen(id(8), None, 100);
        assert_eq!(wahl.waehlen(100), Some(id(8)));
        wahl.entfernen(&id(8));
        assert_eq!(wahl.waehlen(100), Some(id(5)));
    }
}
