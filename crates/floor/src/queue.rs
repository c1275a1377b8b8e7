//! Warteschlange der Floor-Anfragen
//!
//! Sortiert nach der Arbitrierungsreihenfolge, hoechstens ein Eintrag pro
//! Anfragendem. Jeder Knoten fuehrt dieselbe Schlange aus denselben
//! Nachrichten, die Befoerderung nach einer Freigabe braucht daher keinen
//! Nachrichtenaustausch.

use meshptt_core::{arbitration_order, FloorRequest, NodeId, RequestId};

/// Einfuegen in eine volle Schlange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueVoll;

#[derive(Debug, Clone)]
pub struct RequestQueue {
    eintraege: Vec<FloorRequest>,
    kapazitaet: usize,
}

impl RequestQueue {
    pub fn new(kapazitaet: usize) -> Self {
        Self {
            eintraege: Vec::with_capacity(kapazitaet),
            kapazitaet,
        }
    }

    /// Fuegt ein und liefert die Position (1-basiert)
    ///
    /// Eine neuere Anfrage desselben Knotens ersetzt die alte.
    pub fn einfuegen(&mut self, request: FloorRequest) -> Result<usize, QueueVoll> {
        let ersetzt = self.entfernen_anfrager(&request.requester).is_some();
        if !ersetzt && self.eintraege.len() >= self.kapazitaet {
            return Err(QueueVoll);
        }
        let index = self
            .eintraege
            .partition_point(|e| arbitration_order(e, &request).is_lt());
        self.eintraege.insert(index, request);
        Ok(index + 1)
    }

    /// Prueft ohne Aenderung, ob `requester` noch Platz faende
    pub fn haette_platz(&self, requester: &NodeId) -> bool {
        self.eintraege.len() < self.kapazitaet || self.enthaelt(requester)
    }

    pub fn entfernen_anfrager(&mut self, requester: &NodeId) -> Option<FloorRequest> {
        let index = self.eintraege.iter().position(|e| e.requester == *requester)?;
        Some(self.eintraege.remove(index))
    }

    pub fn entfernen_request(&mut self, request_id: &RequestId) -> Option<FloorRequest> {
        let index = self
            .eintraege
            .iter()
            .position(|e| e.request_id == *request_id)?;
        Some(self.eintraege.remove(index))
    }

    /// Entnimmt die frueheste Anfrage
    pub fn naechster(&mut self) -> Option<FloorRequest> {
        if self.eintraege.is_empty() {
            None
        } else {
            Some(self.eintraege.remove(0))
        }
    }

    pub fn position(&self, requester: &NodeId) -> Option<usize> {
        self.eintraege
            .iter()
            .position(|e| e.requester == *requester)
            .map(|i| i + 1)
    }

    pub fn enthaelt(&self, requester: &NodeId) -> bool {
        self.position(requester).is_some()
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FloorRequest> {
        self.eintraege.iter()
    }

    pub fn leeren(&mut self) -> Vec<FloorRequest> {
        std::mem::take(&mut self.eintraege)
    }
}
