//! Session-Manager – Wer ist mit wem gepaart
//!
//! Haelt die autoritative Paarung: ein Session-Datensatz pro Paar und einen
//! Index Identitaet -> Session. Wie die Registry ohne eigenes Lock; alle
//! Operationen laufen im kritischen Abschnitt der Lobby.
//!
//! Invarianten:
//! - pro Identitaet hoechstens ein Index-Eintrag
//! - der Index-Eintrag zeigt auf eine Session, deren Mitglied die Identitaet ist
//! - eine Session existiert genau dann, wenn beide Mitglieder auf sie zeigen

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use treffpunkt_core::{Identity, SessionId};

use crate::error::{SignalingError, SignalingResult};

/// Aktive Paarung zweier Identitaeten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    /// Ungeordnetes Paar; Index 0 ist der Ausloeser der Paarung
    pub mitglieder: [Identity; 2],
    pub gestartet: DateTime<Utc>,
}

impl Session {
    /// Gibt das jeweils andere Mitglied zurueck
    pub fn partner_von(&self, identity: &Identity) -> Option<&Identity> {
        match &self.mitglieder {
            [a, b] if a == identity => Some(b),
            [a, b] if b == identity => Some(a),
            _ => None,
        }
    }

    /// Prueft die Mitgliedschaft
    pub fn enthaelt(&self, identity: &Identity) -> bool {
        self.mitglieder.contains(identity)
    }
}

/// Verwaltet alle aktiven Sessions
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
    index: HashMap<Identity, SessionId>,
}

impl SessionManager {
    /// Erstellt einen leeren Session-Manager
    pub fn neu() -> Self {
        Self::default()
    }

    /// Paart zwei Identitaeten
    ///
    /// Schlaegt fehl wenn eine Seite bereits gepaart ist. Der Aufrufer muss
    /// das als Signal zum erneuten Matching mit frischem Pool behandeln.
    pub fn paar_erstellen(&mut self, a: &Identity, b: &Identity) -> SignalingResult<Session> {
        if a == b {
            return Err(SignalingError::SelbstPaarung(a.clone()));
        }
        for identity in [a, b] {
            if let Some(session_id) = self.index.get(identity) {
                return Err(SignalingError::BereitsGepaart {
                    identity: identity.clone(),
                    session_id: session_id.clone(),
                });
            }
        }

        let gestartet = Utc::now();
        let session = Session {
            id: SessionId::ableiten(a, b, gestartet),
            mitglieder: [a.clone(), b.clone()],
            gestartet,
        };

        self.index.insert(a.clone(), session.id.clone());
        self.index.insert(b.clone(), session.id.clone());
        self.sessions.insert(session.id.clone(), session.clone());

        tracing::info!(session_id = %session.id, a = %a, b = %b, "Session erstellt");
        Ok(session)
    }

    /// Loest die Session einer Identitaet fuer beide Mitglieder auf
    ///
    /// Gibt den Partner zurueck, damit der Aufrufer ihn benachrichtigen kann.
    /// `None` wenn die Identitaet keine Session hatte.
    pub fn aufloesen(&mut self, identity: &Identity) -> Option<Identity> {
        let session_id = self.index.remove(identity)?;
        let session = match self.sessions.remove(&session_id) {
            Some(s) => s,
            None => {
                tracing::error!(identity = %identity, session_id = %session_id, "Index zeigt auf fehlende Session");
                return None;
            }
        };

        let partner = session.partner_von(identity).cloned();
        if let Some(ref partner) = partner {
            if self.index.get(partner) == Some(&session_id) {
                self.index.remove(partner);
            }
        }

        tracing::info!(
            session_id = %session_id,
            identity = %identity,
            dauer_sek = (Utc::now() - session.gestartet).num_seconds(),
            "Session aufgeloest"
        );
        partner
    }

    /// Partner einer Identitaet (fuer das Relay)
    pub fn partner_von(&self, identity: &Identity) -> Option<&Identity> {
        let session_id = self.index.get(identity)?;
        self.sessions.get(session_id)?.partner_von(identity)
    }

    /// Session einer Identitaet
    pub fn session_von(&self, identity: &Identity) -> Option<&Session> {
        self.sessions.get(self.index.get(identity)?)
    }

    /// Hat die Identitaet einen Index-Eintrag?
    pub fn ist_gepaart(&self, identity: &Identity) -> bool {
        self.index.contains_key(identity)
    }

    /// Anzahl aktiver Sessions
    pub fn anzahl(&self) -> usize {
        self.sessions.len()
    }

    /// Alle gepaarten Identitaeten
    pub fn gepaarte(&self) -> impl Iterator<Item = &Identity> {
        self.index.keys()
    }

    /// Prueft Index und Session-Datensaetze auf Konsistenz
    pub fn invarianten_pruefen(&self) -> Result<(), String> {
        for (identity, session_id) in &self.index {
            let session = self
                .sessions
                .get(session_id)
                .ok_or_else(|| format!("{identity} zeigt auf fehlende Session {session_id}"))?;
            let partner = session
                .partner_von(identity)
                .ok_or_else(|| format!("{identity} ist nicht Mitglied von {session_id}"))?;
            if self.index.get(partner) != Some(session_id) {
                return Err(format!(
                    "Partner {partner} von {identity} zeigt nicht auf {session_id}"
                ));
            }
        }
        for (session_id, session) in &self.sessions {
            for mitglied in &session.mitglieder {
                if self.index.get(mitglied) != Some(session_id) {
                    return Err(format!(
                        "Session {session_id} hat Mitglied {mitglied} ohne Index-Eintrag"
                    ));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
