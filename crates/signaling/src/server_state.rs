//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt Konfiguration und Lobby als Arc-Referenzen, die sicher zwischen
//! tokio-Tasks geteilt werden koennen.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use treffpunkt_protocol::wire::DEFAULT_MAX_FRAME_SIZE;

use crate::broadcast::SEND_QUEUE_GROESSE;
use crate::lobby::{Lobby, LobbyKonfig};

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Servers
    pub server_name: String,
    /// Maximale gleichzeitige TCP-Verbindungen
    pub max_clients: usize,
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_groesse: usize,
    /// Kapazitaet der Ausgangs-Queue pro Verbindung
    pub queue_groesse: usize,
    /// Timeout fuer inaktive Verbindungen in Sekunden (0 = kein Timeout)
    ///
    /// Standard ist 0: Clients senden waehrend Suche und Gespraech
    /// nicht zwingend etwas.
    pub verbindungs_timeout_sek: u64,
    /// Neue Matching-Versuche nach abgelehnter Paarung
    pub max_match_versuche: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "Treffpunkt".to_string(),
            max_clients: 1024,
            max_frame_groesse: DEFAULT_MAX_FRAME_SIZE,
            queue_groesse: SEND_QUEUE_GROESSE,
            verbindungs_timeout_sek: 0,
            max_match_versuche: LobbyKonfig::default().max_match_versuche,
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    /// Server-Konfiguration
    pub config: Arc<SignalingConfig>,
    /// Lebenszyklus-Steuerung und Kernzustand
    pub lobby: Lobby,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
    aktive_verbindungen: AtomicUsize,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState mit leerer Lobby
    pub fn neu(config: SignalingConfig) -> Arc<Self> {
        let lobby = Lobby::mit_konfig(LobbyKonfig {
            max_match_versuche: config.max_match_versuche,
        });
        Arc::new(Self {
            config: Arc::new(config),
            lobby,
            start_time: Instant::now(),
            aktive_verbindungen: AtomicUsize::new(0),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Anzahl offener TCP-Verbindungen (registriert oder nicht)
    pub fn aktive_verbindungen(&self) -> usize {
        self.aktive_verbindungen.load(Ordering::Relaxed)
    }

    /// Reserviert einen Verbindungsplatz; `None` wenn der Server voll ist
    pub fn platz_reservieren(self: &Arc<Self>) -> Option<VerbindungsPlatz> {
        let max = self.config.max_clients;
        self.aktive_verbindungen
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |aktiv| {
                (aktiv < max).then_some(aktiv + 1)
            })
            .ok()
            .map(|_| VerbindungsPlatz {
                state: Arc::clone(self),
            })
    }
}

/// Belegter Verbindungsplatz; wird beim Drop freigegeben
pub struct VerbindungsPlatz {
    state: Arc<SignalingState>,
}

impl Drop for VerbindungsPlatz {
    fn drop(&mut self) {
        self.state.aktive_verbindungen.fetch_sub(1, Ordering::AcqRel);
    }
}
