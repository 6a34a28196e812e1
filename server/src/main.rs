//! Treffpunkt Server – Einstiegspunkt
//!
//! Aufruf: `treffpunkt-server [pfad/zur/config.toml]`. Ohne Argument wird
//! `TREFFPUNKT_CONFIG` gelesen, danach `config.toml`.

use anyhow::Result;
use treffpunkt_server::config::{self, ServerConfig};
use treffpunkt_server::{logging, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let pfad = config::pfad_bestimmen(
        std::env::args().nth(1),
        std::env::var(config::CONFIG_UMGEBUNGSVARIABLE).ok(),
    );
    let config = ServerConfig::laden(&pfad)?;
    logging::initialisieren(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %pfad,
        bind = %config.tcp_bind_adresse(),
        timeout_sek = config.signaling.verbindungs_timeout_sek,
        "Treffpunkt Server wird initialisiert"
    );

    Server::neu(config).starten().await
}
