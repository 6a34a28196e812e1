//! Lobby – Lebenszyklus-Steuerung fuer alle Verbindungen
//!
//! Jedes eingehende Ereignis landet hier. Registry, Session-Index und
//! Suchstatus liegen gemeinsam in einem `Kernzustand` hinter **einem**
//! Mutex; jede Operation ist genau ein kritischer Abschnitt.
//!
//! ## Zustaende pro Identitaet
//! ```text
//! Getrennt -> Bereit -> Suchend -> Gepaart -> (Bereit | Suchend)
//!                ^                     |
//!                +----- end_call ------+
//! ```
//!
//! ## Transportfehler
//! Sendeversuche auf geschlossene Queues werden gesammelt und noch im
//! selben kritischen Abschnitt als Disconnect der betroffenen Verbindung
//! abgearbeitet. Ein Fehler bei einem Empfaenger bricht also nie den
//! Broadcast an die anderen ab.
//!
//! Alle Sendeoperationen sind nicht-blockierend (siehe [`crate::broadcast`]),
//! deshalb wird unter dem Lock gesendet.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use treffpunkt_core::{
    Attribute, ConnectionId, Identity, SessionId, Suchfilter, MAX_IDENTITAET_LAENGE,
};
use treffpunkt_protocol::{OnlineUser, PeerInfo, RelayNutzlast, ServerMessage};

use crate::broadcast::{self, ClientSender, SendeErgebnis, Transportfehler};
use crate::error::{SignalingError, SignalingResult};
use crate::matching::{self, Kandidat};
use crate::registry::{Registry, Verbindung};
use crate::session::{Session, SessionManager};

// ---------------------------------------------------------------------------
// Oeffentliche Typen
// ---------------------------------------------------------------------------

/// Einstellungen der Lobby
#[derive(Debug, Clone)]
pub struct LobbyKonfig {
    /// Wie oft eine Suche nach einer abgelehnten Paarung neu versucht wird
    pub max_match_versuche: usize,
}

impl Default for LobbyKonfig {
    fn default() -> Self {
        Self {
            max_match_versuche: 8,
        }
    }
}

/// Absender eines Ereignisses
///
/// Die `connection_id` bindet das Ereignis an genau eine Transportverbindung.
/// Ereignisse einer inzwischen abgeloesten Verbindung sind No-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Absender {
    pub identity: Identity,
    pub connection_id: ConnectionId,
}

impl Absender {
    pub fn neu(identity: Identity, connection_id: ConnectionId) -> Self {
        Self {
            identity,
            connection_id,
        }
    }
}

/// Lebenszyklus-Zustand einer Identitaet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientZustand {
    /// Nicht registriert
    Getrennt,
    /// Registriert, sucht nicht
    Bereit,
    /// Im Kandidaten-Pool
    Suchend,
    /// In einer Session
    Gepaart {
        partner: Identity,
        session_id: SessionId,
    },
}

/// Schnappschuss des Kernzustands (Logging, Tests)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LobbySnapshot {
    /// Anzahl registrierter Verbindungen
    pub verbunden: usize,
    /// Suchende Identitaeten (sortiert)
    pub suchend: Vec<Identity>,
    /// Aktive Paare (sortiert)
    pub paare: Vec<(Identity, Identity)>,
}

/// Prueft eine Identitaet vor dem Registrieren
pub fn identitaet_pruefen(identity: &Identity) -> SignalingResult<()> {
    if identity.ist_leer() {
        return Err(SignalingError::protokoll("register ohne Identitaet"));
    }
    if identity.ist_zu_lang() {
        return Err(SignalingError::protokoll(format!(
            "Identitaet laenger als {MAX_IDENTITAET_LAENGE} Bytes"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Kernzustand
// ---------------------------------------------------------------------------

struct Kernzustand {
    registry: Registry,
    sessions: SessionManager,
    /// Verbindungen deren Transport beim Senden geschlossen war
    ausstehend: Vec<Transportfehler>,
    konfig: LobbyKonfig,
}

impl Kernzustand {
    fn neu(konfig: LobbyKonfig) -> Self {
        Self {
            registry: Registry::neu(),
            sessions: SessionManager::neu(),
            ausstehend: Vec::new(),
            konfig,
        }
    }

    /// Gehoert `absender` noch die aktuelle Verbindung seiner Identitaet?
    fn ist_aktuell(&self, absender: &Absender) -> bool {
        let aktuell = self
            .registry
            .aktuell(&absender.identity, absender.connection_id)
            .is_some();
        if !aktuell {
            tracing::debug!(
                identity = %absender.identity,
                connection = %absender.connection_id,
                "Ereignis einer abgeloesten oder getrennten Verbindung ignoriert"
            );
        }
        aktuell
    }

    // -----------------------------------------------------------------------
    // Senden
    // -----------------------------------------------------------------------

    fn senden(&mut self, identity: &Identity, nachricht: ServerMessage) -> SendeErgebnis {
        let Some(verbindung) = self.registry.get(identity) else {
            tracing::debug!(identity = %identity, "Senden an nicht registrierte Identitaet");
            return SendeErgebnis::Geschlossen;
        };
        let ergebnis = verbindung.sender.senden(nachricht);
        if ergebnis == SendeErgebnis::Geschlossen {
            self.ausstehend
                .push((identity.clone(), verbindung.connection_id));
        }
        ergebnis
    }

    fn online_liste_senden(&mut self) {
        let fehler = broadcast::online_liste_senden(&self.registry);
        self.ausstehend.extend(fehler);
    }

    fn population_senden(&mut self) {
        let fehler = broadcast::online_anzahl_senden(&self.registry);
        self.ausstehend.extend(fehler);
        self.online_liste_senden();
    }

    // -----------------------------------------------------------------------
    // Matching
    // -----------------------------------------------------------------------

    /// Sucht einen Partner fuer eine bereits als suchend markierte Identitaet
    ///
    /// Bei Erfolg werden beide Seiten benachrichtigt, sonst erhaelt der
    /// Suchende `searching`. Gibt `true` bei einer Paarung zurueck.
    fn partner_suchen(&mut self, identity: &Identity) -> bool {
        let mut abgelehnt: HashSet<Identity> = HashSet::new();

        for versuch in 1..=self.konfig.max_match_versuche {
            let suchender = match self.registry.get(identity) {
                Some(v) if v.sucht && !self.sessions.ist_gepaart(identity) => v.als_kandidat(),
                _ => return false,
            };

            let pool: Vec<Kandidat> = self
                .registry
                .alle_suchenden(&self.sessions)
                .into_iter()
                .filter(|k| !abgelehnt.contains(&k.identity))
                .collect();

            let Some(partner) = matching::finde_partner(&suchender, &pool, &mut rand::thread_rng())
            else {
                break;
            };

            match self.sessions.paar_erstellen(identity, &partner) {
                Ok(session) => {
                    self.paarung_melden(&session);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        identity = %identity,
                        partner = %partner,
                        versuch,
                        fehler = %e,
                        "Paarung abgelehnt – neuer Versuch mit frischem Pool"
                    );
                    abgelehnt.insert(partner);
                }
            }
        }

        tracing::debug!(
            identity = %identity,
            pool = self.registry.suchende_anzahl(),
            "Kein Partner gefunden"
        );
        self.senden(identity, ServerMessage::searching());
        self.online_liste_senden();
        false
    }

    /// Markiert beide Mitglieder als nicht suchend und sendet `matched`
    ///
    /// `mitglieder[0]` hat die Paarung ausgeloest und ist Initiator.
    fn paarung_melden(&mut self, session: &Session) {
        let [initiator, antwortender] = &session.mitglieder;

        for mitglied in &session.mitglieder {
            if let Err(e) = self.registry.suchend_setzen(mitglied, false) {
                tracing::error!(session_id = %session.id, fehler = %e, "Gepaartes Mitglied fehlt in der Registry");
            }
        }

        let info = |registry: &Registry, identity: &Identity| PeerInfo {
            identity: identity.clone(),
            attributes: registry
                .get(identity)
                .map(|v| v.attribute.clone())
                .unwrap_or_default(),
        };
        let fuer_initiator = info(&self.registry, antwortender);
        let fuer_antwortenden = info(&self.registry, initiator);

        self.senden(
            initiator,
            ServerMessage::Matched {
                is_initiator: true,
                session_id: session.id.clone(),
                peer: fuer_initiator,
            },
        );
        self.senden(
            antwortender,
            ServerMessage::Matched {
                is_initiator: false,
                session_id: session.id.clone(),
                peer: fuer_antwortenden,
            },
        );
        self.online_liste_senden();
    }

    // -----------------------------------------------------------------------
    // Session-Abbau
    // -----------------------------------------------------------------------

    /// Loest die Session von `identity` auf, benachrichtigt den Partner und
    /// stellt ihn wieder in die Suche
    ///
    /// Mit `sofort_suchen` bekommt der Partner direkt einen Matching-Versuch,
    /// sonst uebernimmt das der Aufrufer.
    fn session_abbauen(&mut self, identity: &Identity, sofort_suchen: bool) -> Option<Identity> {
        let partner = self.sessions.aufloesen(identity)?;

        match self.senden(&partner, ServerMessage::PeerDisconnected) {
            // Partner wird gleich selbst aufgeraeumt
            SendeErgebnis::Geschlossen => return Some(partner),
            SendeErgebnis::Verworfen => {
                // Ohne peer_disconnected wuerde der Partner das Session-Ende nie erfahren
                tracing::warn!(identity = %partner, "peer_disconnected nicht zustellbar – Transport wird geschlossen");
                if let Some(verbindung) = self.registry.get(&partner) {
                    verbindung.sender.schliessen();
                    self.ausstehend
                        .push((partner.clone(), verbindung.connection_id));
                }
                return Some(partner);
            }
            SendeErgebnis::Eingereiht | SendeErgebnis::TelemetrieVerdraengt => {}
        }

        if self.registry.suchend_setzen(&partner, true).is_ok() {
            tracing::debug!(identity = %partner, "Partner automatisch wieder in der Suche");
            if sofort_suchen {
                self.partner_suchen(&partner);
            }
        }
        Some(partner)
    }

    /// Entfernt eine Identitaet samt Session aus dem Kernzustand
    fn austragen(&mut self, identity: &Identity, transport_schliessen: bool) -> Option<Verbindung> {
        self.session_abbauen(identity, true);
        let verbindung = self.registry.entfernen(identity)?;
        if transport_schliessen {
            verbindung.sender.schliessen();
        }
        Some(verbindung)
    }

    // -----------------------------------------------------------------------
    // Ereignisse
    // -----------------------------------------------------------------------

    fn registrieren(&mut self, identity: Identity, attribute: Attribute, sender: ClientSender) {
        let connection_id = sender.connection_id();
        let attribute = attribute.begrenzt();

        match self.registry.get_mut(&identity) {
            Some(verbindung) if verbindung.connection_id == connection_id => {
                verbindung.attribute = attribute;
                tracing::debug!(identity = %identity, "Attribute aktualisiert");
                self.senden(&identity, ServerMessage::RegistrationConfirmed { identity: identity.clone() });
                self.online_liste_senden();
                return;
            }
            Some(alt) => {
                tracing::info!(
                    identity = %identity,
                    alt = %alt.connection_id,
                    neu = %connection_id,
                    "Identitaet von neuer Verbindung uebernommen"
                );
                self.austragen(&identity, true);
            }
            None => {}
        }

        self.registry
            .einfuegen(Verbindung::neu(identity.clone(), attribute, sender));
        tracing::info!(
            identity = %identity,
            connection = %connection_id,
            online = self.registry.anzahl(),
            "Client registriert"
        );

        self.senden(&identity, ServerMessage::RegistrationConfirmed { identity: identity.clone() });
        self.population_senden();
    }

    fn abmelden(&mut self, absender: &Absender, transport_schliessen: bool) -> bool {
        if !self.ist_aktuell(absender) {
            return false;
        }
        self.austragen(&absender.identity, transport_schliessen);
        tracing::info!(
            identity = %absender.identity,
            connection = %absender.connection_id,
            online = self.registry.anzahl(),
            "Client getrennt"
        );
        self.population_senden();
        true
    }

    fn suchen(&mut self, absender: &Absender, filter: Option<Suchfilter>) {
        if !self.ist_aktuell(absender) {
            return;
        }
        let identity = &absender.identity;
        if let Some(session) = self.sessions.session_von(identity) {
            tracing::debug!(identity = %identity, session_id = %session.id, "Suche ignoriert – bereits gepaart");
            return;
        }

        if let Some(verbindung) = self.registry.get_mut(identity) {
            if let Some(filter) = filter {
                verbindung.filter = filter;
            }
            verbindung.sucht = true;
        }
        tracing::debug!(identity = %identity, "Suche gestartet");
        self.partner_suchen(identity);
    }

    fn suche_stoppen(&mut self, absender: &Absender) {
        if !self.ist_aktuell(absender) {
            return;
        }
        let sucht = self
            .registry
            .get(&absender.identity)
            .is_some_and(|v| v.sucht);
        if !sucht {
            return;
        }
        if self.registry.suchend_setzen(&absender.identity, false).is_ok() {
            tracing::debug!(identity = %absender.identity, "Suche gestoppt");
            self.online_liste_senden();
        }
    }

    fn weiterleiten(&mut self, absender: &Absender, nutzlast: RelayNutzlast) {
        if !self.ist_aktuell(absender) {
            return;
        }
        let Some(partner) = self.sessions.partner_von(&absender.identity).cloned() else {
            tracing::debug!(identity = %absender.identity, art = nutzlast.art(), "Relay ohne Session verworfen");
            return;
        };

        let art = nutzlast.art();
        match self.senden(&partner, nutzlast.an_partner()) {
            SendeErgebnis::Verworfen => {
                tracing::warn!(von = %absender.identity, an = %partner, art, "Relay verworfen – Queue voll")
            }
            SendeErgebnis::Geschlossen => {
                tracing::debug!(von = %absender.identity, an = %partner, art, "Relay an geschlossenen Transport")
            }
            _ => tracing::trace!(von = %absender.identity, an = %partner, art, "Relay zugestellt"),
        }
    }

    fn naechster(&mut self, absender: &Absender) {
        if !self.ist_aktuell(absender) {
            return;
        }
        let partner = self.session_abbauen(&absender.identity, false);
        if let Some(partner) = &partner {
            tracing::info!(identity = %absender.identity, partner = %partner, "Naechster Partner angefordert");
        }
        self.suchen(absender, None);

        // Der fruehere Partner sucht erst nach dem Ausloeser
        if let Some(partner) = partner {
            self.partner_suchen(&partner);
        }
    }

    fn anruf_beenden(&mut self, absender: &Absender) {
        if !self.ist_aktuell(absender) {
            return;
        }
        match self.session_abbauen(&absender.identity, true) {
            Some(partner) => {
                tracing::info!(identity = %absender.identity, partner = %partner, "Anruf beendet");
                // Suchstatus ist beim Gepaarten bereits false
                self.online_liste_senden();
            }
            None => tracing::debug!(identity = %absender.identity, "end_call ohne Session"),
        }
    }

    /// Arbeitet gesammelte Transportfehler als Disconnects ab
    ///
    /// Terminiert, weil jede Verbindung hoechstens einmal entfernt wird.
    fn transportfehler_abarbeiten(&mut self) {
        while let Some((identity, connection_id)) = self.ausstehend.pop() {
            let absender = Absender::neu(identity, connection_id);
            if self.registry.aktuell(&absender.identity, connection_id).is_some() {
                tracing::debug!(identity = %absender.identity, "Transport geschlossen – Verbindung wird aufgeraeumt");
                self.abmelden(&absender, true);
            }
        }
    }

    fn invarianten_pruefen(&self) -> Result<(), String> {
        self.sessions.invarianten_pruefen()?;
        for identity in self.sessions.gepaarte() {
            let verbindung = self
                .registry
                .get(identity)
                .ok_or_else(|| format!("{identity} ist gepaart aber nicht registriert"))?;
            if verbindung.sucht {
                return Err(format!("{identity} ist gepaart und sucht gleichzeitig"));
            }
        }
        for verbindung in self.registry.iter() {
            if verbindung.sender.connection_id() != verbindung.connection_id {
                return Err(format!("{} haelt fremden Transport", verbindung.identity));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

/// Gemeinsamer Einstiegspunkt fuer alle Verbindungs-Tasks
///
/// Clone gibt eine Referenz auf denselben Kernzustand.
#[derive(Clone)]
pub struct Lobby {
    zustand: Arc<Mutex<Kernzustand>>,
}

impl Default for Lobby {
    fn default() -> Self {
        Self::neu()
    }
}

impl Lobby {
    /// Erstellt eine leere Lobby mit Standard-Einstellungen
    pub fn neu() -> Self {
        Self::mit_konfig(LobbyKonfig::default())
    }

    /// Erstellt eine leere Lobby
    pub fn mit_konfig(konfig: LobbyKonfig) -> Self {
        Self {
            zustand: Arc::new(Mutex::new(Kernzustand::neu(konfig))),
        }
    }

    /// Fuehrt eine Operation als einen kritischen Abschnitt aus
    fn ausfuehren<T>(&self, op: impl FnOnce(&mut Kernzustand) -> T) -> T {
        let mut zustand = self.zustand.lock();
        let ergebnis = op(&mut zustand);
        zustand.transportfehler_abarbeiten();
        ergebnis
    }

    /// Registriert eine Identitaet auf dem Transport von `sender`
    ///
    /// Eine bestehende Registrierung derselben Identitaet auf einem anderen
    /// Transport wird vollstaendig getrennt und ihr Transport geschlossen.
    pub fn registrieren(
        &self,
        identity: Identity,
        attribute: Attribute,
        sender: ClientSender,
    ) -> SignalingResult<Absender> {
        identitaet_pruefen(&identity)?;
        let absender = Absender::neu(identity.clone(), sender.connection_id());
        self.ausfuehren(|z| z.registrieren(identity, attribute, sender));
        Ok(absender)
    }

    /// Meldet eine Identitaet ab ohne den Transport zu schliessen
    ///
    /// Fuer Verbindungen die sich unter einer anderen Identitaet neu
    /// registrieren.
    pub fn abmelden(&self, absender: &Absender) -> bool {
        self.ausfuehren(|z| z.abmelden(absender, false))
    }

    /// Startet eine Suche mit neuen Filtern
    pub fn suchen(&self, absender: &Absender, filter: Suchfilter) {
        self.ausfuehren(|z| z.suchen(absender, Some(filter)));
    }

    /// Verlaesst den Kandidaten-Pool
    pub fn suche_stoppen(&self, absender: &Absender) {
        self.ausfuehren(|z| z.suche_stoppen(absender));
    }

    /// Leitet Chat oder Signaling an den Session-Partner weiter
    pub fn weiterleiten(&self, absender: &Absender, nutzlast: RelayNutzlast) {
        self.ausfuehren(|z| z.weiterleiten(absender, nutzlast));
    }

    /// Beendet die aktuelle Session und sucht mit den letzten Filtern neu
    pub fn naechster(&self, absender: &Absender) {
        self.ausfuehren(|z| z.naechster(absender));
    }

    /// Beendet die aktuelle Session ohne neue Suche
    pub fn anruf_beenden(&self, absender: &Absender) {
        self.ausfuehren(|z| z.anruf_beenden(absender));
    }

    /// Trennt eine Verbindung vollstaendig
    ///
    /// Idempotent: fuer bereits getrennte oder abgeloeste Verbindungen ein
    /// No-op ohne Benachrichtigungen. Gibt `true` zurueck wenn getrennt wurde.
    pub fn trennen(&self, absender: &Absender) -> bool {
        self.ausfuehren(|z| z.abmelden(absender, true))
    }

    /// Veroeffentlicht eine Ankuendigung an alle Verbindungen
    pub fn ankuendigen(&self, topic: impl Into<String>, payload: Value) {
        let nachricht = ServerMessage::Announcement {
            topic: topic.into(),
            payload,
        };
        self.ausfuehren(|z| {
            let fehler = broadcast::an_alle_senden(&z.registry, &nachricht);
            z.ausstehend.extend(fehler);
        });
    }

    /// Anzahl registrierter Verbindungen
    pub fn online_anzahl(&self) -> usize {
        self.zustand.lock().registry.anzahl()
    }

    /// Redigierte Online-Liste
    pub fn online_liste(&self) -> Vec<OnlineUser> {
        broadcast::online_liste(&self.zustand.lock().registry)
    }

    /// Lebenszyklus-Zustand einer Identitaet
    pub fn zustand_von(&self, identity: &Identity) -> ClientZustand {
        let zustand = self.zustand.lock();
        let Some(verbindung) = zustand.registry.get(identity) else {
            return ClientZustand::Getrennt;
        };
        if let Some(session) = zustand.sessions.session_von(identity) {
            if let Some(partner) = session.partner_von(identity) {
                return ClientZustand::Gepaart {
                    partner: partner.clone(),
                    session_id: session.id.clone(),
                };
            }
        }
        if verbindung.sucht {
            ClientZustand::Suchend
        } else {
            ClientZustand::Bereit
        }
    }

    /// Schnappschuss fuer Logging und Tests
    pub fn snapshot(&self) -> LobbySnapshot {
        let zustand = self.zustand.lock();

        let mut suchend: Vec<Identity> = zustand
            .registry
            .iter()
            .filter(|v| v.sucht)
            .map(|v| v.identity.clone())
            .collect();
        suchend.sort();

        let mut paare: Vec<(Identity, Identity)> = Vec::new();
        for identity in zustand.sessions.gepaarte() {
            if let Some(partner) = zustand.sessions.partner_von(identity) {
                if identity < partner {
                    paare.push((identity.clone(), partner.clone()));
                }
            }
        }
        paare.sort();

        LobbySnapshot {
            verbunden: zustand.registry.anzahl(),
            suchend,
            paare,
        }
    }

    /// Prueft alle Konsistenzbedingungen des Kernzustands
    pub fn invarianten_pruefen(&self) -> SignalingResult<()> {
        self.zustand
            .lock()
            .invarianten_pruefen()
            .map_err(SignalingError::intern)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
