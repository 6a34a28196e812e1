//! Message-Dispatcher – Routet eingehende Nachrichten an die Lobby
//!
//! Der Dispatcher empfaengt geparste Frames von einer ClientConnection und
//! uebersetzt sie in Lobby-Operationen. Direkte Antworten (nur `pong`)
//! werden zurueckgegeben, alles andere laeuft ueber die Ausgangs-Queue.
//!
//! ## Zustandspruefung
//! - `ping` ist immer erlaubt
//! - `register` bindet die Verbindung an eine Identitaet
//! - alle anderen Nachrichten vor `register` werden geloggt und ignoriert

use std::net::SocketAddr;
use std::sync::Arc;
use treffpunkt_protocol::{ClientMessage, Eingang, ServerMessage};

use crate::broadcast::ClientSender;
use crate::error::SignalingError;
use crate::lobby::{identitaet_pruefen, Absender};
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
pub struct DispatcherContext {
    /// Peer-Adresse fuer Logging
    pub peer_addr: SocketAddr,
    /// Registrierte Identitaet dieser Verbindung (None vor `register`)
    pub absender: Option<Absender>,
    /// Send-Handle der eigenen Ausgangs-Queue
    pub sender: ClientSender,
    /// Client hat `disconnect` gesendet
    pub beenden: bool,
}

impl DispatcherContext {
    pub fn neu(peer_addr: SocketAddr, sender: ClientSender) -> Self {
        Self {
            peer_addr,
            absender: None,
            sender,
            beenden: false,
        }
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet einen eingehenden Frame
    ///
    /// Gibt `Some` nur fuer direkte Antworten zurueck.
    pub fn dispatch(&self, eingang: Eingang, ctx: &mut DispatcherContext) -> Option<ServerMessage> {
        let nachricht = match eingang {
            Eingang::Nachricht(nachricht) => nachricht,
            Eingang::Unbekannt { typ } => {
                tracing::debug!(peer = %ctx.peer_addr, typ = %typ, "Unbekannter Nachrichtentyp ignoriert");
                return None;
            }
            Eingang::Ungueltig { grund } => {
                let fehler = SignalingError::protokoll(grund);
                tracing::warn!(peer = %ctx.peer_addr, fehler = %fehler, "Ungueltige Nachricht ignoriert");
                return None;
            }
        };

        tracing::trace!(peer = %ctx.peer_addr, typ = nachricht.typ(), "Nachricht empfangen");

        match nachricht {
            // -------------------------------------------------------------------
            // Keepalive (immer erlaubt)
            // -------------------------------------------------------------------
            ClientMessage::Ping { timestamp } => {
                let server_ts = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                Some(ServerMessage::Pong {
                    timestamp,
                    server_timestamp: server_ts,
                })
            }

            // -------------------------------------------------------------------
            // Registrierung
            // -------------------------------------------------------------------
            ClientMessage::Register {
                identity,
                attributes,
            } => {
                if let Err(fehler) = identitaet_pruefen(&identity) {
                    tracing::warn!(peer = %ctx.peer_addr, fehler = %fehler, "Registrierung abgelehnt");
                    return None;
                }

                // Identitaetswechsel auf derselben Verbindung: alte Identitaet abmelden
                if let Some(alt) = ctx.absender.as_ref() {
                    if alt.identity != identity {
                        self.state.lobby.abmelden(alt);
                    }
                }

                match self
                    .state
                    .lobby
                    .registrieren(identity, attributes, ctx.sender.clone())
                {
                    Ok(absender) => ctx.absender = Some(absender),
                    Err(e) => {
                        tracing::warn!(peer = %ctx.peer_addr, fehler = %e, "Registrierung abgelehnt");
                        ctx.absender = None;
                    }
                }
                None
            }

            // -------------------------------------------------------------------
            // Registrierung erfordernde Nachrichten
            // -------------------------------------------------------------------
            andere => {
                let Some(absender) = ctx.absender.clone() else {
                    tracing::debug!(
                        peer = %ctx.peer_addr,
                        typ = andere.typ(),
                        "Nachricht vor register ignoriert"
                    );
                    return None;
                };
                self.dispatch_registriert(andere, &absender, ctx);
                None
            }
        }
    }

    /// Routet Nachrichten einer registrierten Verbindung
    fn dispatch_registriert(
        &self,
        nachricht: ClientMessage,
        absender: &Absender,
        ctx: &mut DispatcherContext,
    ) {
        let lobby = &self.state.lobby;

        match nachricht {
            ClientMessage::Search { filters } => lobby.suchen(absender, filters),
            ClientMessage::StopSearch => lobby.suche_stoppen(absender),
            ClientMessage::Next => lobby.naechster(absender),
            ClientMessage::EndCall => lobby.anruf_beenden(absender),
            ClientMessage::Disconnect => {
                lobby.trennen(absender);
                ctx.absender = None;
                ctx.beenden = true;
            }

            relay @ (ClientMessage::Message { .. }
            | ClientMessage::WebrtcOffer { .. }
            | ClientMessage::WebrtcAnswer { .. }
            | ClientMessage::WebrtcIceCandidate { .. }) => {
                if let Some(nutzlast) = relay.als_relay() {
                    lobby.weiterleiten(absender, nutzlast);
                }
            }

            // Register und Ping werden oben behandelt
            ClientMessage::Register { .. } | ClientMessage::Ping { .. } => {}
        }
    }

    /// Bereinigt den Lobby-Zustand einer Verbindung beim Trennen
    ///
    /// No-op wenn die Verbindung nie registriert war oder bereits abgeloest
    /// wurde.
    pub fn client_cleanup(&self, ctx: &mut DispatcherContext) {
        if let Some(absender) = ctx.absender.take() {
            if self.state.lobby.trennen(&absender) {
                tracing::debug!(identity = %absender.identity, "Client-Ressourcen bereinigt");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
