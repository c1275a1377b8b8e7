//! Bedienkonsole auf stdin
//!
//! Eine Zeile pro Befehl:
//!
//! ```text
//! ptt <kanal> [prioritaet] [dauer_ms]   Floor anfordern
//! notfall <kanal>                       Notruf (Emergency, verdraengt)
//! release <kanal>                       Floor freigeben
//! leave <kanal>                         Kanal verlassen
//! status                                Floor-Zustand aller Kanaele
//! hilfe                                 Befehle anzeigen
//! quit                                  Knoten beenden
//! ```

use meshptt_core::{ChannelId, Priority};
use meshptt_session::PttCore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub const HILFE: &str = "\
ptt <kanal> [prioritaet] [dauer_ms]  Floor anfordern
notfall <kanal>                      Notruf
release <kanal>                      Floor freigeben
leave <kanal>                        Kanal verlassen
status                               Zustand aller Kanaele
quit                                 beenden";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bedienbefehl {
    Sprechen {
        kanal: ChannelId,
        priority: Priority,
        dauer_ms: u32,
    },
    Notfall {
        kanal: ChannelId,
    },
    Freigeben {
        kanal: ChannelId,
    },
    Verlassen {
        kanal: ChannelId,
    },
    Status,
    Hilfe,
    Beenden,
}

impl Bedienbefehl {
    /// Leere Zeilen liefern `Ok(None)`
    pub fn parsen(zeile: &str) -> Result<Option<Self>, String> {
        let mut teile = zeile.split_whitespace();
        let Some(wort) = teile.next() else {
            return Ok(None);
        };

        let mut kanal = || {
            teile
                .next()
                .map(ChannelId::new)
                .ok_or_else(|| format!("{wort}: Kanal fehlt"))
        };

        let befehl = match wort {
            "ptt" => {
                let kanal = kanal()?;
                let priority = match teile.next() {
                    Some(p) => p.parse()?,
                    None => Priority::Normal,
                };
                let dauer_ms = match teile.next() {
                    Some(d) => d
                        .parse()
                        .map_err(|_| format!("Ungueltige Dauer: {d}"))?,
                    None => 0,
                };
                Bedienbefehl::Sprechen {
                    kanal,
                    priority,
                    dauer_ms,
                }
            }
            "notfall" => Bedienbefehl::Notfall { kanal: kanal()? },
            "release" => Bedienbefehl::Freigeben { kanal: kanal()? },
            "leave" => Bedienbefehl::Verlassen { kanal: kanal()? },
            "status" => Bedienbefehl::Status,
            "hilfe" | "help" => Bedienbefehl::Hilfe,
            "quit" | "exit" => Bedienbefehl::Beenden,
            other => return Err(format!("Unbekannter Befehl: {other}")),
        };
        Ok(Some(befehl))
    }
}

/// Fuehrt einen Befehl aus und liefert die Ausgabezeile
pub async fn ausfuehren(core: &PttCore, befehl: Bedienbefehl) -> String {
    match befehl {
        Bedienbefehl::Sprechen {
            kanal,
            priority,
            dauer_ms,
        } => match core
            .request_floor_mit_dauer(&kanal, priority, false, dauer_ms)
            .await
        {
            Ok(ergebnis) => format!("{kanal}: {ergebnis:?}"),
            Err(e) => format!("{kanal}: {e}"),
        },
        Bedienbefehl::Notfall { kanal } => {
            match core.request_floor(&kanal, Priority::Emergency, true).await {
                Ok(ergebnis) => format!("{kanal}: Notruf {ergebnis:?}"),
                Err(e) => format!("{kanal}: {e}"),
            }
        }
        Bedienbefehl::Freigeben { kanal } => match core.release_floor(&kanal).await {
            Ok(()) => format!("{kanal}: freigegeben"),
            Err(e) => format!("{kanal}: {e}"),
        },
        Bedienbefehl::Verlassen { kanal } => {
            core.leave_channel(&kanal).await;
            format!("{kanal}: verlassen")
        }
        Bedienbefehl::Status => {
            let zeilen: Vec<String> = core
                .kanaele()
                .into_iter()
                .filter_map(|k| core.floor_state(&k).map(|s| format!("{k}: {s}")))
                .collect();
            if zeilen.is_empty() {
                "keine Kanaele".into()
            } else {
                zeilen.join("\n")
            }
        }
        Bedienbefehl::Hilfe => HILFE.into(),
        Bedienbefehl::Beenden => "beende".into(),
    }
}

/// Liest Befehle von stdin bis `quit`, EOF oder `shutdown`
pub async fn konsole(core: PttCore, shutdown: CancellationToken) {
    let mut zeilen = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let zeile = tokio::select! {
            _ = shutdown.cancelled() => break,
            zeile = zeilen.next_line() => zeile,
        };
        let zeile = match zeile {
            Ok(Some(z)) => z,
            Ok(None) => {
                tracing::debug!("stdin geschlossen, Konsole beendet");
                return;
            }
            Err(e) => {
                tracing::warn!("stdin nicht lesbar: {e}");
                return;
            }
        };

        match Bedienbefehl::parsen(&zeile) {
            Ok(None) => {}
            Ok(Some(Bedienbefehl::Beenden)) => {
                shutdown.cancel();
                break;
            }
            Ok(Some(befehl)) => println!("{}", ausfuehren(&core, befehl).await),
            Err(e) => println!("{e}"),
        }
    }
}
