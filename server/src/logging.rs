//! Logging-Setup fuer den Server-Prozess
//!
//! `RUST_LOG` hat Vorrang vor dem Level aus der Konfigurationsdatei.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingEinstellungen;

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Unbekannte Werte fallen auf Text zurueck
    pub fn aus_config(format: &str) -> Self {
        match format.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Installiert den globalen tracing-Subscriber
///
/// Schlaegt fehl wenn bereits ein Subscriber installiert ist.
pub fn initialisieren(einstellungen: &LoggingEinstellungen) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&einstellungen.level));

    let ergebnis = match LogFormat::aus_config(&einstellungen.format) {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    ergebnis.map_err(|e| anyhow!("Logging konnte nicht initialisiert werden: {e}"))
}
