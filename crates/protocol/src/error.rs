//! Parse-Fehler fuer Datagramme aus dem Netz
//!
//! Jede Eingabe aus dem Netz wird fehlbar geparst. Ein `ParseError` fuehrt
//! nur zum Verwerfen des Datagramms, nie zum Abbruch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Datagramm zu kurz: {laenge} Bytes (mindestens {erwartet})")]
    ZuKurz { laenge: usize, erwartet: usize },

    #[error("Unbekannte Datagramm-Art: 0x{0:02X}")]
    UnbekannteArt(u8),

    #[error("Unbekannter Nachrichtentyp: {0}")]
    UnbekannterTyp(u8),

    #[error("Laengenfeld ungueltig: angegeben={angegeben}, maximal={maximal}")]
    LaengeUngueltig { angegeben: usize, maximal: usize },

    #[error("JSON ungueltig: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Typ im Header ({header}) passt nicht zum Inhalt ({inhalt})")]
    TypKonflikt { header: u8, inhalt: u8 },

    #[error("Absender passt nicht zum Nachrichteninhalt")]
    AbsenderKonflikt,

    #[error("Media-Paket ungueltig: {0}")]
    Media(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}
