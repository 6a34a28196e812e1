//! Fehlertypen fuer den Signaling-Service

use thiserror::Error;
use treffpunkt_core::{Identity, SessionId};

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Protokollfehler (ungueltiges Frame, falscher Zustand)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Identitaet ist nicht (mehr) registriert
    #[error("Unbekannte Identitaet: {0}")]
    UnbekannteIdentitaet(Identity),

    /// Eine Seite ist bereits Mitglied einer Session
    #[error("{identity} ist bereits in Session {session_id}")]
    BereitsGepaart {
        identity: Identity,
        session_id: SessionId,
    },

    /// Eine Identitaet kann nicht mit sich selbst gepaart werden
    #[error("Paarung mit sich selbst: {0}")]
    SelbstPaarung(Identity),

    /// Server ist voll
    #[error("Server ist voll")]
    ServerVoll,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
