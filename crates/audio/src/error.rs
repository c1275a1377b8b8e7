//! Fehlertypen fuer Audio und Codec

use thiserror::Error;

/// Alle Fehler der Audio-Schicht
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    /// Quelle oder Senke wurde geschlossen
    #[error("Audio-Geraet geschlossen: {0}")]
    Geschlossen(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for meshptt_core::PttError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::Konfiguration(m) => meshptt_core::PttError::Konfiguration(m),
            andere => meshptt_core::PttError::CodecFailure(andere.to_string()),
        }
    }
}
