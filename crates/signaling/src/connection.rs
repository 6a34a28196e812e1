//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Eingehende Frames werden strikt in Ankunftsreihenfolge an den
//! Dispatcher gereicht, ausgehende Nachrichten kommen aus der eigenen
//! Ausgangs-Queue.
//!
//! ## Verbindungsende
//! Die Schleife endet wenn
//! - der Client die Verbindung schliesst oder `disconnect` sendet,
//! - ein Frame nicht gelesen oder geschrieben werden kann,
//! - der Inaktivitaets-Timeout ablaeuft,
//! - die Ausgangs-Queue geschlossen wurde (neue Registrierung derselben
//!   Identitaet auf einer anderen Verbindung),
//! - das Shutdown-Signal eintrifft.
//!
//! In jedem Fall laeuft danach das Disconnect-Cleanup fuer genau diese
//! Verbindung.
//!
//! Eine ausgehende Nachricht, die nicht in einen Frame passt, wird mit einer
//! Warnung verworfen; die Verbindung bleibt bestehen.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use treffpunkt_core::ConnectionId;
use treffpunkt_protocol::wire::{self, FrameCodec};

use crate::broadcast::ausgangskanal;
use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::server_state::SignalingState;

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne TCP-Verbindung
///
/// Liest Frames via `FrameCodec`, dispatcht an `MessageDispatcher` und
/// schreibt die Ausgangs-Queue auf den Socket.
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    connection_id: ConnectionId,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        Self {
            state,
            peer_addr,
            connection_id: ConnectionId::new(),
        }
    }

    /// Eindeutige ID dieser Transportverbindung
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Diese Methode laeuft bis die Verbindung getrennt wird oder ein
    /// Shutdown-Signal eingeht.
    pub async fn verarbeiten(
        self,
        stream: TcpStream,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let peer_addr = self.peer_addr;
        let config = Arc::clone(&self.state.config);
        let timeout_dauer = Duration::from_secs(config.verbindungs_timeout_sek);
        let mit_timeout = config.verbindungs_timeout_sek > 0;

        tracing::info!(peer = %peer_addr, connection = %self.connection_id, "Neue Verbindung");

        let mut framed = Framed::new(stream, FrameCodec::with_max_size(config.max_frame_groesse));

        // Ausgehende Nachrichten (Lobby -> TCP)
        let (sender, mut ausgang) = ausgangskanal(self.connection_id, config.queue_groesse);

        let mut ctx = DispatcherContext::neu(peer_addr, sender);
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        let mut frist = Instant::now() + timeout_dauer;

        loop {
            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(eingang)) => {
                            frist = Instant::now() + timeout_dauer;

                            if let Some(antwort) = dispatcher.dispatch(eingang, &mut ctx) {
                                if let Err(e) = framed.send(antwort).await {
                                    tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                                    break;
                                }
                            }

                            if ctx.beenden {
                                tracing::info!(peer = %peer_addr, "Client hat disconnect gesendet");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Ausgehende Nachricht aus der Lobby
                ausgehend = ausgang.empfangen() => {
                    let Some(nachricht) = ausgehend else {
                        tracing::info!(peer = %peer_addr, "Transport von neuer Registrierung abgeloest");
                        break;
                    };
                    let typ = nachricht.typ();
                    match framed.send(nachricht).await {
                        Ok(()) => {}
                        Err(e) if wire::ist_zu_gross(&e) => {
                            tracing::warn!(peer = %peer_addr, typ, fehler = %e, "Ausgehende Nachricht verworfen");
                        }
                        Err(e) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Ausgehende Nachricht fehlgeschlagen");
                            break;
                        }
                    }
                }

                // Inaktivitaets-Timeout
                _ = tokio::time::sleep_until(frist), if mit_timeout => {
                    tracing::warn!(
                        peer = %peer_addr,
                        timeout_sek = config.verbindungs_timeout_sek,
                        "Verbindungs-Timeout"
                    );
                    break;
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        break;
                    }
                }
            }
        }

        // Cleanup beim Verbindungsende
        dispatcher.client_cleanup(&mut ctx);
        drop(ausgang);

        tracing::info!(peer = %peer_addr, connection = %self.connection_id, "Verbindungs-Task beendet");
    }
}
