//! Fehlertypen fuer meshptt
//!
//! Zentraler Fehler-Enum mit der Fehler-Taxonomie der Floor-Kontrolle und
//! des Audio-Transports. Untermodule definieren eigene Fehler und
//! konvertieren an den Crate-Grenzen in [`PttError`].

use thiserror::Error;

/// Globaler Result-Alias fuer meshptt
pub type Result<T> = std::result::Result<T, PttError>;

/// Alle Fehler die ueber die Crate-Grenzen hinweg sichtbar werden
#[derive(Debug, Error)]
pub enum PttError {
    // --- Sicherheit ---
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    AuthenticationFailure(String),

    // --- Floor ---
    #[error("Zeitlimit ueberschritten: {0}")]
    Timeout(String),

    #[error("Floor wurde entzogen: {0}")]
    Preempted(String),

    /// Operation ist im aktuellen Zustand nicht erlaubt (synchron gemeldet)
    #[error("Ungueltiger Zustand fuer {operation}: {state}")]
    InvalidState { operation: String, state: String },

    // --- Netzwerk & Audio ---
    #[error("Netzwerk nicht verfuegbar: {0}")]
    NetworkUnavailable(String),

    #[error("Codec-Fehler: {0}")]
    CodecFailure(String),

    // --- Ressourcen ---
    #[error("Kanal nicht gefunden: {0}")]
    KanalNichtGefunden(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Kryptografiefehler: {0}")]
    Krypto(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl PttError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Zustandsfehler
    pub fn ungueltiger_zustand(operation: impl Into<String>, state: impl ToString) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::NetworkUnavailable(_))
    }
}

impl From<std::io::Error> for PttError {
    fn from(e: std::io::Error) -> Self {
        Self::NetworkUnavailable(e.to_string())
    }
}
