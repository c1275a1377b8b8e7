//! meshptt Knoten – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Knoten.

use anyhow::Result;
use meshptt_node::{
    config::{NodeConfig, ENV_CONFIG, STANDARD_PFAD},
    Node,
};
use meshptt_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var(ENV_CONFIG).unwrap_or_else(|_| STANDARD_PFAD.into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = NodeConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "meshptt Knoten wird initialisiert"
    );

    let node = Node::neu(config)?;
    node.starten(true).await?;

    Ok(())
}
