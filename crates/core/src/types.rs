//! Gemeinsame Identifikationstypen fuer Treffpunkt
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximale Laenge einer Identitaet in Bytes
pub const MAX_IDENTITAET_LAENGE: usize = 128;

/// Stabile, opake Identitaet eines Clients (z.B. eine Wallet-Adresse)
///
/// Wird von der Transportschicht beim `register` mitgeliefert und vom
/// Server nicht weiter interpretiert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    /// Erstellt eine Identitaet aus einem beliebigen String
    pub fn new(wert: impl Into<String>) -> Self {
        Self(wert.into())
    }

    /// Gibt den inneren String zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leere Identitaeten werden beim Registrieren abgelehnt
    pub fn ist_leer(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Ueberlange Identitaeten werden ebenfalls abgelehnt
    pub fn ist_zu_lang(&self) -> bool {
        self.0.len() > MAX_IDENTITAET_LAENGE
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(wert: &str) -> Self {
        Self::new(wert)
    }
}

/// Eindeutige ID einer einzelnen Transportverbindung
///
/// Dieselbe Identitaet bekommt bei jeder Registrierung eine neue
/// ConnectionId. Damit laesst sich ein verspaetetes Close des alten
/// Sockets von der neuen Registrierung unterscheiden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Erstellt eine neue zufaellige ConnectionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// ID einer Session zwischen genau zwei Identitaeten
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Leitet die Session-ID aus beiden Identitaeten und dem Erstellzeitpunkt ab
    ///
    /// Die Identitaeten werden sortiert, damit die ID unabhaengig davon ist
    /// wer die Paarung ausgeloest hat. Der Nanosekunden-Zeitstempel macht
    /// wiederholte Paarungen derselben zwei Identitaeten unterscheidbar.
    pub fn ableiten(a: &Identity, b: &Identity, zeitpunkt: DateTime<Utc>) -> Self {
        let (erste, zweite) = if a <= b { (a, b) } else { (b, a) };
        let nanos = zeitpunkt
            .timestamp_nanos_opt()
            .unwrap_or_else(|| zeitpunkt.timestamp_micros().saturating_mul(1000));
        Self(format!("{}_{}_{}", erste, zweite, nanos))
    }

    /// Gibt den inneren String zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
