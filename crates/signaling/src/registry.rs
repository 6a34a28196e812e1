//! Connection-Registry – Alle lebenden Verbindungen und ihre Attribute
//!
//! Die Registry ist ein reiner Datencontainer ohne eigenes Lock. Sie lebt im
//! Kernzustand der [`Lobby`](crate::lobby::Lobby) und wird nur innerhalb von
//! dessen kritischem Abschnitt gelesen und veraendert. Pro Identitaet gibt es
//! hoechstens einen Eintrag.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use treffpunkt_core::{Attribute, ConnectionId, Identity, Suchfilter};

use crate::broadcast::ClientSender;
use crate::error::{SignalingError, SignalingResult};
use crate::matching::Kandidat;
use crate::session::SessionManager;

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

/// Registry-Eintrag einer lebenden Verbindung
#[derive(Debug, Clone)]
pub struct Verbindung {
    /// Identitaet (unveraenderlich fuer die Lebensdauer der Verbindung)
    pub identity: Identity,
    /// Transportverbindung die diese Identitaet aktuell haelt
    pub connection_id: ConnectionId,
    /// Send-Handle; gehoert exklusiv diesem Eintrag
    pub sender: ClientSender,
    /// Sucht der Client gerade einen Partner?
    pub sucht: bool,
    /// Beim Registrieren deklarierte Attribute
    pub attribute: Attribute,
    /// Filter der letzten Suche (wird beim Auto-Requeue wiederverwendet)
    pub filter: Suchfilter,
    /// Zeitpunkt der Registrierung
    pub verbunden_seit: DateTime<Utc>,
}

impl Verbindung {
    /// Erstellt einen neuen, nicht suchenden Eintrag
    pub fn neu(identity: Identity, attribute: Attribute, sender: ClientSender) -> Self {
        Self {
            identity,
            connection_id: sender.connection_id(),
            sender,
            sucht: false,
            attribute,
            filter: Suchfilter::default(),
            verbunden_seit: Utc::now(),
        }
    }

    /// Matching-Sicht auf diese Verbindung mit ihren aktuellen Filtern
    pub fn als_kandidat(&self) -> Kandidat {
        Kandidat::aus_profil(self.identity.clone(), &self.attribute, &self.filter)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Alle registrierten Verbindungen, indiziert nach Identitaet
#[derive(Debug, Default)]
pub struct Registry {
    verbindungen: HashMap<Identity, Verbindung>,
}

impl Registry {
    /// Erstellt eine leere Registry
    pub fn neu() -> Self {
        Self::default()
    }

    /// Fuegt einen Eintrag ein und gibt einen eventuell ersetzten zurueck
    ///
    /// Das Aufraeumen des ersetzten Eintrags (Session, Transport) ist Sache
    /// des Aufrufers.
    pub fn einfuegen(&mut self, verbindung: Verbindung) -> Option<Verbindung> {
        self.verbindungen
            .insert(verbindung.identity.clone(), verbindung)
    }

    /// Entfernt einen Eintrag; fuer unbekannte Identitaeten ein No-op
    pub fn entfernen(&mut self, identity: &Identity) -> Option<Verbindung> {
        self.verbindungen.remove(identity)
    }

    /// Setzt den Suchstatus
    ///
    /// Fuer unbekannte Identitaeten (Event kam nach dem Close an) wird nur
    /// geloggt.
    pub fn suchend_setzen(&mut self, identity: &Identity, sucht: bool) -> SignalingResult<()> {
        match self.verbindungen.get_mut(identity) {
            Some(verbindung) => {
                verbindung.sucht = sucht;
                Ok(())
            }
            None => {
                tracing::debug!(identity = %identity, sucht, "Suchstatus fuer unbekannte Identitaet");
                Err(SignalingError::UnbekannteIdentitaet(identity.clone()))
            }
        }
    }

    /// Lesender Zugriff auf einen Eintrag
    pub fn get(&self, identity: &Identity) -> Option<&Verbindung> {
        self.verbindungen.get(identity)
    }

    /// Schreibender Zugriff auf einen Eintrag
    pub fn get_mut(&mut self, identity: &Identity) -> Option<&mut Verbindung> {
        self.verbindungen.get_mut(identity)
    }

    /// Eintrag nur dann, wenn er noch zur angegebenen Verbindung gehoert
    pub fn aktuell(&self, identity: &Identity, connection_id: ConnectionId) -> Option<&Verbindung> {
        self.verbindungen
            .get(identity)
            .filter(|v| v.connection_id == connection_id)
    }

    /// Schnappschuss aller suchenden Verbindungen ohne Session (Kandidaten-Pool)
    pub fn alle_suchenden(&self, sessions: &SessionManager) -> Vec<Kandidat> {
        self.verbindungen
            .values()
            .filter(|v| v.sucht && !sessions.ist_gepaart(&v.identity))
            .map(Verbindung::als_kandidat)
            .collect()
    }

    /// Iteriert ueber alle Eintraege
    pub fn iter(&self) -> impl Iterator<Item = &Verbindung> {
        self.verbindungen.values()
    }

    /// Anzahl der registrierten Verbindungen
    pub fn anzahl(&self) -> usize {
        self.verbindungen.len()
    }

    /// Anzahl der suchenden Verbindungen
    pub fn suchende_anzahl(&self) -> usize {
        self.verbindungen.values().filter(|v| v.sucht).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
