//! treffpunkt-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;
pub mod logging;

use anyhow::{Context, Result};
use config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use treffpunkt_signaling::{SignalingServer, SignalingState};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet den Signaling-Service und laeuft bis Ctrl-C
    ///
    /// Reihenfolge:
    /// 1. Gemeinsamen Zustand (Lobby) anlegen
    /// 2. TCP-Listener binden
    /// 3. Statistik-Task starten
    /// 4. Auf Ctrl-C warten, dann alle Verbindungen beenden
    pub async fn starten(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let bind_addr: SocketAddr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse '{}'", self.config.tcp_bind_adresse()))?;

        let state = SignalingState::neu(self.config.in_signaling_config());
        let server = SignalingServer::binden(Arc::clone(&state), bind_addr)
            .await
            .with_context(|| format!("TCP-Listener auf {bind_addr} konnte nicht gebunden werden"))?;

        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %server.lokale_adresse()?,
            max_clients = self.config.server.max_clients,
            "Server startet"
        );

        let listener = tokio::spawn(server.starten(shutdown_rx.clone()));

        let intervall = self.config.signaling.statistik_intervall_sek;
        if intervall > 0 {
            tokio::spawn(statistik_loggen(
                Arc::clone(&state),
                Duration::from_secs(intervall),
                shutdown_rx,
            ));
        }

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        // Fehler nur wenn alle Empfaenger schon weg sind
        let _ = shutdown_tx.send(true);
        listener.await.context("Listener-Task abgebrochen")??;

        tracing::info!(uptime_sek = state.uptime_sek(), "Server beendet");
        Ok(())
    }
}

/// Loggt periodisch einen Schnappschuss der Lobby
async fn statistik_loggen(
    state: Arc<SignalingState>,
    intervall: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(intervall);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = state.lobby.snapshot();
                tracing::info!(
                    verbindungen = state.aktive_verbindungen(),
                    registriert = snapshot.verbunden,
                    suchend = snapshot.suchend.len(),
                    sessions = snapshot.paare.len(),
                    uptime_sek = state.uptime_sek(),
                    "Lobby-Statistik"
                );
                if let Err(e) = state.lobby.invarianten_pruefen() {
                    tracing::error!(fehler = %e, "Lobby-Zustand inkonsistent");
                }
            }
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
