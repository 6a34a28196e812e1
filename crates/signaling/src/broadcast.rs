//! Relay und Broadcast – Ausgehende Nachrichten an verbundene Clients
//!
//! Jede Verbindung besitzt eine begrenzte Ausgangs-Queue. Der Schreib-Task
//! der Verbindung leert sie, alle anderen Tasks reihen nur nicht-blockierend
//! ein ([`ClientSender::senden`]).
//!
//! ## Prioritaeten bei voller Queue
//! 1. Die aelteste Telemetrie-Nachricht (Online-Zahl, Online-Liste,
//!    Ankuendigung) wird verdraengt.
//! 2. Gibt es keine Telemetrie mehr in der Queue, wird die neue Nachricht
//!    verworfen. Session-Verkehr wird nie zugunsten von Telemetrie geopfert.
//!
//! ## Broadcasts
//! - Online-Anzahl: `online_anzahl_senden`
//! - Online-Liste: `online_liste_senden`
//! - Beliebige Nachricht an alle: `an_alle_senden`
//!
//! Broadcasts sind best-effort: eine geschlossene Queue bricht den Broadcast
//! nicht ab, sondern wird dem Aufrufer fuer das Disconnect-Cleanup gemeldet.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use treffpunkt_core::{ConnectionId, Identity};
use treffpunkt_protocol::{OnlineUser, ServerMessage};

use crate::registry::Registry;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Standardgroesse der Send-Queue pro Client
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Ausgangs-Queue
// ---------------------------------------------------------------------------

/// Ergebnis eines nicht-blockierenden Sendeversuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendeErgebnis {
    /// Nachricht eingereiht
    Eingereiht,
    /// Nachricht eingereiht, dafuer aeltere Telemetrie verworfen
    TelemetrieVerdraengt,
    /// Queue voll ohne verdraengbare Telemetrie, neue Nachricht verworfen
    Verworfen,
    /// Transport bereits geschlossen
    Geschlossen,
}

impl SendeErgebnis {
    /// Wurde die Nachricht eingereiht?
    pub fn ist_zugestellt(self) -> bool {
        matches!(self, Self::Eingereiht | Self::TelemetrieVerdraengt)
    }
}

struct QueueZustand {
    nachrichten: VecDeque<ServerMessage>,
    geschlossen: bool,
}

struct Ausgangsqueue {
    zustand: Mutex<QueueZustand>,
    signal: Notify,
    kapazitaet: usize,
}

impl Ausgangsqueue {
    fn schliessen(&self) {
        let mut zustand = self.zustand.lock();
        if !zustand.geschlossen {
            zustand.geschlossen = true;
            zustand.nachrichten.clear();
            drop(zustand);
            self.signal.notify_one();
        }
    }
}

/// Erstellt eine Ausgangs-Queue fuer eine Verbindung
///
/// Der `ClientSender` wandert in die Registry, der `AusgangsEmpfaenger`
/// bleibt beim Verbindungs-Task.
pub fn ausgangskanal(
    connection_id: ConnectionId,
    kapazitaet: usize,
) -> (ClientSender, AusgangsEmpfaenger) {
    let queue = Arc::new(Ausgangsqueue {
        zustand: Mutex::new(QueueZustand {
            nachrichten: VecDeque::with_capacity(kapazitaet.min(SEND_QUEUE_GROESSE)),
            geschlossen: false,
        }),
        signal: Notify::new(),
        kapazitaet: kapazitaet.max(1),
    });
    (
        ClientSender {
            connection_id,
            queue: Arc::clone(&queue),
        },
        AusgangsEmpfaenger { queue },
    )
}

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue eines verbundenen Clients
///
/// Wird ausschliesslich zum Senden und Schliessen verwendet.
#[derive(Clone)]
pub struct ClientSender {
    connection_id: ConnectionId,
    queue: Arc<Ausgangsqueue>,
}

impl std::fmt::Debug for ClientSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSender")
            .field("connection_id", &self.connection_id)
            .field("geschlossen", &self.ist_geschlossen())
            .finish()
    }
}

impl ClientSender {
    /// Verbindung zu der diese Queue gehoert
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Sendet eine Nachricht nicht-blockierend an den Client
    pub fn senden(&self, nachricht: ServerMessage) -> SendeErgebnis {
        let mut zustand = self.queue.zustand.lock();
        if zustand.geschlossen {
            return SendeErgebnis::Geschlossen;
        }

        let ergebnis = if zustand.nachrichten.len() < self.queue.kapazitaet {
            SendeErgebnis::Eingereiht
        } else if let Some(pos) = zustand
            .nachrichten
            .iter()
            .position(ServerMessage::ist_telemetrie)
        {
            zustand.nachrichten.remove(pos);
            SendeErgebnis::TelemetrieVerdraengt
        } else {
            if nachricht.ist_telemetrie() {
                tracing::debug!(connection = %self.connection_id, "Send-Queue voll – Telemetrie verworfen");
            } else {
                tracing::warn!(connection = %self.connection_id, "Send-Queue voll – Session-Nachricht verworfen");
            }
            return SendeErgebnis::Verworfen;
        };

        zustand.nachrichten.push_back(nachricht);
        drop(zustand);
        self.queue.signal.notify_one();
        ergebnis
    }

    /// Schliesst den Transport; der Verbindungs-Task beendet sich daraufhin
    pub fn schliessen(&self) {
        self.queue.schliessen();
    }

    /// Prueft ob der Transport geschlossen ist
    pub fn ist_geschlossen(&self) -> bool {
        self.queue.zustand.lock().geschlossen
    }

    /// Anzahl der noch nicht geschriebenen Nachrichten
    pub fn ausstehend(&self) -> usize {
        self.queue.zustand.lock().nachrichten.len()
    }
}

// ---------------------------------------------------------------------------
// AusgangsEmpfaenger
// ---------------------------------------------------------------------------

/// Leseseite der Ausgangs-Queue (gehoert dem Verbindungs-Task)
///
/// Beim Drop wird die Queue geschlossen, damit spaetere Sendeversuche
/// als Transportfehler erkannt werden.
pub struct AusgangsEmpfaenger {
    queue: Arc<Ausgangsqueue>,
}

impl AusgangsEmpfaenger {
    /// Wartet auf die naechste Nachricht
    ///
    /// Gibt `None` zurueck sobald die Queue geschlossen wurde. Cancel-safe:
    /// eine Nachricht wird nur im selben Poll entnommen, in dem sie
    /// zurueckgegeben wird.
    pub async fn empfangen(&mut self) -> Option<ServerMessage> {
        loop {
            {
                let mut zustand = self.queue.zustand.lock();
                if zustand.geschlossen {
                    return None;
                }
                if let Some(nachricht) = zustand.nachrichten.pop_front() {
                    return Some(nachricht);
                }
            }
            self.queue.signal.notified().await;
        }
    }

    /// Entnimmt die naechste Nachricht ohne zu warten
    pub fn try_empfangen(&mut self) -> Option<ServerMessage> {
        let mut zustand = self.queue.zustand.lock();
        if zustand.geschlossen {
            return None;
        }
        zustand.nachrichten.pop_front()
    }

    /// Entnimmt alle aktuell eingereihten Nachrichten
    pub fn alle_entnehmen(&mut self) -> Vec<ServerMessage> {
        let mut zustand = self.queue.zustand.lock();
        zustand.nachrichten.drain(..).collect()
    }

    /// Prueft ob die Queue geschlossen wurde
    pub fn ist_geschlossen(&self) -> bool {
        self.queue.zustand.lock().geschlossen
    }
}

impl Drop for AusgangsEmpfaenger {
    fn drop(&mut self) {
        self.queue.schliessen();
    }
}

// ---------------------------------------------------------------------------
// Broadcasts ueber die Registry
// ---------------------------------------------------------------------------

/// Verbindung deren Transport beim Senden geschlossen war
pub type Transportfehler = (Identity, ConnectionId);

/// Sendet eine Nachricht an alle registrierten Verbindungen
///
/// Gibt die Verbindungen zurueck deren Transport geschlossen war.
pub fn an_alle_senden(registry: &Registry, nachricht: &ServerMessage) -> Vec<Transportfehler> {
    let mut fehler = Vec::new();
    for verbindung in registry.iter() {
        if verbindung.sender.senden(nachricht.clone()) == SendeErgebnis::Geschlossen {
            fehler.push((verbindung.identity.clone(), verbindung.connection_id));
        }
    }
    fehler
}

/// Sendet die aktuelle Online-Anzahl an alle Verbindungen
pub fn online_anzahl_senden(registry: &Registry) -> Vec<Transportfehler> {
    an_alle_senden(
        registry,
        &ServerMessage::OnlineCount {
            count: registry.anzahl(),
        },
    )
}

/// Sendet die redigierte Online-Liste an alle Verbindungen
///
/// Die Liste wird einmal gebaut; jede Queue haelt nur eine Referenz.
pub fn online_liste_senden(registry: &Registry) -> Vec<Transportfehler> {
    let users: Arc<[OnlineUser]> = online_liste(registry).into();
    an_alle_senden(registry, &ServerMessage::OnlineUsers { users })
}

/// Redigierter Schnappschuss aller Verbindungen (nur Identitaet, Attribute, Suchstatus)
pub fn online_liste(registry: &Registry) -> Vec<OnlineUser> {
    let mut liste: Vec<OnlineUser> = registry
        .iter()
        .map(|verbindung| OnlineUser {
            identity: verbindung.identity.clone(),
            attributes: verbindung.attribute.clone(),
            is_searching: verbindung.sucht,
        })
        .collect();
    liste.sort_by(|a, b| a.identity.cmp(&b.identity));
    liste
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
