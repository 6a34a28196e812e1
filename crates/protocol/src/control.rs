//! Control-Protokoll
//!
//! Definiert alle Nachrichten die ueber die Verbindung zwischen Client und
//! Server ausgetauscht werden.
//!
//! ## Design
//! - JSON-Objekte, unterschieden ueber das Feld `type`
//! - Tagged Enums fuer typsichere Nachrichtentypen
//! - Signaling-Nutzlasten (SDP, ICE) werden nicht interpretiert, sondern als
//!   JSON-Map unveraendert an den Partner weitergereicht
//! - Unbekannte Typen sind kein Fehler (Vorwaertskompatibilitaet)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use treffpunkt_core::{Attribute, Identity, SessionId, Suchfilter};

/// Frei formulierte Signaling-Nutzlast (wird unveraendert weitergeleitet)
pub type SignalDaten = Map<String, Value>;

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Alle Nachrichten die ein Client senden kann
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Register {
        identity: Identity,
        #[serde(default)]
        attributes: Attribute,
    },
    Search {
        #[serde(default)]
        filters: Suchfilter,
    },
    StopSearch,
    Message {
        text: String,
    },
    WebrtcOffer {
        #[serde(flatten)]
        payload: SignalDaten,
    },
    WebrtcAnswer {
        #[serde(flatten)]
        payload: SignalDaten,
    },
    WebrtcIceCandidate {
        #[serde(flatten)]
        payload: SignalDaten,
    },
    Next,
    EndCall,
    Disconnect,
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientMessage {
    /// Alle bekannten `type`-Werte eingehender Nachrichten
    pub const TYPEN: &'static [&'static str] = &[
        "register",
        "search",
        "stop_search",
        "message",
        "webrtc_offer",
        "webrtc_answer",
        "webrtc_ice_candidate",
        "next",
        "end_call",
        "disconnect",
        "ping",
    ];

    /// Wire-Name des Nachrichtentyps (fuer Logging)
    pub fn typ(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Search { .. } => "search",
            Self::StopSearch => "stop_search",
            Self::Message { .. } => "message",
            Self::WebrtcOffer { .. } => "webrtc_offer",
            Self::WebrtcAnswer { .. } => "webrtc_answer",
            Self::WebrtcIceCandidate { .. } => "webrtc_ice_candidate",
            Self::Next => "next",
            Self::EndCall => "end_call",
            Self::Disconnect => "disconnect",
            Self::Ping { .. } => "ping",
        }
    }

    /// Zerlegt Chat- und Signaling-Nachrichten in eine Relay-Nutzlast
    ///
    /// Gibt `None` fuer alle Nachrichten zurueck die nicht weitergeleitet werden.
    pub fn als_relay(self) -> Option<RelayNutzlast> {
        match self {
            Self::Message { text } => Some(RelayNutzlast::Chat { text }),
            Self::WebrtcOffer { payload } => Some(RelayNutzlast::Signal {
                art: SignalArt::Offer,
                payload,
            }),
            Self::WebrtcAnswer { payload } => Some(RelayNutzlast::Signal {
                art: SignalArt::Answer,
                payload,
            }),
            Self::WebrtcIceCandidate { payload } => Some(RelayNutzlast::Signal {
                art: SignalArt::IceCandidate,
                payload,
            }),
            _ => None,
        }
    }
}

/// Art einer WebRTC-Signaling-Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalArt {
    Offer,
    Answer,
    IceCandidate,
}

/// Nutzlast die zwischen den beiden Mitgliedern einer Session weitergeleitet wird
#[derive(Debug, Clone, PartialEq)]
pub enum RelayNutzlast {
    /// Chat-Text (kind=chat)
    Chat { text: String },
    /// WebRTC-Signaling (kind=signal)
    Signal { art: SignalArt, payload: SignalDaten },
}

impl RelayNutzlast {
    /// Art fuer Logging ("chat" oder "signal")
    pub fn art(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Signal { .. } => "signal",
        }
    }

    /// Baut die Nachricht die der Partner empfaengt
    pub fn an_partner(self) -> ServerMessage {
        match self {
            Self::Chat { text } => ServerMessage::ChatMessage { text },
            Self::Signal {
                art: SignalArt::Offer,
                payload,
            } => ServerMessage::WebrtcOffer { payload },
            Self::Signal {
                art: SignalArt::Answer,
                payload,
            } => ServerMessage::WebrtcAnswer { payload },
            Self::Signal {
                art: SignalArt::IceCandidate,
                payload,
            } => ServerMessage::WebrtcIceCandidate { payload },
        }
    }
}

// ---------------------------------------------------------------------------
// Eingang: Ergebnis des toleranten Parsens
// ---------------------------------------------------------------------------

/// Ergebnis beim Parsen eines eingehenden Frames
///
/// Fehlerhafte oder unbekannte Nachrichten trennen die Verbindung nicht,
/// deshalb sind sie hier regulaere Varianten und keine Fehler.
#[derive(Debug, Clone, PartialEq)]
pub enum Eingang {
    /// Gueltige, bekannte Nachricht
    Nachricht(ClientMessage),
    /// Gueltiges JSON-Objekt mit unbekanntem `type`
    Unbekannt { typ: String },
    /// Kein gueltiges JSON oder bekannter Typ mit ungueltigen Feldern
    Ungueltig { grund: String },
}

impl Eingang {
    /// Parst einen Frame-Payload tolerant
    pub fn parsen(payload: &[u8]) -> Self {
        let fehler = match serde_json::from_slice::<ClientMessage>(payload) {
            Ok(nachricht) => return Self::Nachricht(nachricht),
            Err(e) => e,
        };

        let typ = serde_json::from_slice::<Value>(payload)
            .ok()
            .and_then(|wert| wert.get("type").and_then(Value::as_str).map(str::to_owned));

        match typ {
            Some(typ) if !ClientMessage::TYPEN.contains(&typ.as_str()) => Self::Unbekannt { typ },
            _ => Self::Ungueltig {
                grund: fehler.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Informationen ueber den Partner einer frischen Session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub identity: Identity,
    #[serde(default)]
    pub attributes: Attribute,
}

/// Eintrag der Online-Liste (ohne Transport- oder Session-Details)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub identity: Identity,
    #[serde(default)]
    pub attributes: Attribute,
    pub is_searching: bool,
}

/// Alle Nachrichten die der Server senden kann
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegistrationConfirmed {
        identity: Identity,
    },
    #[serde(rename_all = "camelCase")]
    Matched {
        is_initiator: bool,
        session_id: SessionId,
        peer: PeerInfo,
    },
    Searching {
        message: String,
    },
    ChatMessage {
        text: String,
    },
    WebrtcOffer {
        #[serde(flatten)]
        payload: SignalDaten,
    },
    WebrtcAnswer {
        #[serde(flatten)]
        payload: SignalDaten,
    },
    WebrtcIceCandidate {
        #[serde(flatten)]
        payload: SignalDaten,
    },
    PeerDisconnected,
    OnlineCount {
        count: usize,
    },
    /// Die Liste wird einmal gebaut und von allen Empfaengern geteilt
    OnlineUsers {
        users: Arc<[OnlineUser]>,
    },
    Announcement {
        topic: String,
        payload: Value,
    },
    #[serde(rename_all = "camelCase")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
        server_timestamp: u64,
    },
}

impl ServerMessage {
    /// Standard-Bestaetigung fuer einen noch wartenden Suchenden
    pub fn searching() -> Self {
        Self::Searching {
            message: "Suche nach einem Partner laeuft".to_string(),
        }
    }

    /// Wert des `type`-Felds (fuer Logging)
    pub fn typ(&self) -> &'static str {
        match self {
            Self::RegistrationConfirmed { .. } => "registration_confirmed",
            Self::Matched { .. } => "matched",
            Self::Searching { .. } => "searching",
            Self::ChatMessage { .. } => "chat_message",
            Self::WebrtcOffer { .. } => "webrtc_offer",
            Self::WebrtcAnswer { .. } => "webrtc_answer",
            Self::WebrtcIceCandidate { .. } => "webrtc_ice_candidate",
            Self::PeerDisconnected => "peer_disconnected",
            Self::OnlineCount { .. } => "online_count",
            Self::OnlineUsers { .. } => "online_users",
            Self::Announcement { .. } => "announcement",
            Self::Pong { .. } => "pong",
        }
    }

    /// Populations-Telemetrie darf bei voller Queue verworfen werden,
    /// Session-Verkehr und Zustandsmeldungen nicht.
    pub fn ist_telemetrie(&self) -> bool {
        matches!(
            self,
            Self::OnlineCount { .. } | Self::OnlineUsers { .. } | Self::Announcement { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_mit_attributen() {
        let eingang = Eingang::parsen(
            br#"{"type":"register","identity":"0xabc","attributes":{"gender":"female","city":"NYC"}}"#,
        );
        match eingang {
            Eingang::Nachricht(ClientMessage::Register { identity, attributes }) => {
                assert_eq!(identity.as_str(), "0xabc");
                assert_eq!(attributes.gender.as_deref(), Some("female"));
                assert_eq!(attributes.city.as_deref(), Some("NYC"));
            }
            andere => panic!("Register erwartet, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn search_ohne_filter() {
        let eingang = Eingang::parsen(br#"{"type":"search"}"#);
        assert_eq!(
            eingang,
            Eingang::Nachricht(ClientMessage::Search {
                filters: Suchfilter::default()
            })
        );
    }

    #[test]
    fn unbekannter_typ_ist_kein_fehler() {
        let eingang = Eingang::parsen(br#"{"type":"token_trade","amount":5}"#);
        assert_eq!(
            eingang,
            Eingang::Unbekannt {
                typ: "token_trade".to_string()
            }
        );
    }

    #[test]
    fn kaputtes_json_ist_ungueltig() {
        assert!(matches!(Eingang::parsen(b"{nicht json"), Eingang::Ungueltig { .. }));
        assert!(matches!(Eingang::parsen(b"[1,2,3]"), Eingang::Ungueltig { .. }));
    }

    #[test]
    fn bekannter_typ_mit_falschen_feldern_ist_ungueltig() {
        // `text` fehlt
        assert!(matches!(
            Eingang::parsen(br#"{"type":"message"}"#),
            Eingang::Ungueltig { .. }
        ));
    }

    #[test]
    fn signaling_nutzlast_bleibt_unveraendert() {
        let roh = br#"{"type":"webrtc_offer","sdp":{"type":"offer","sdp":"v=0"},"extra":7}"#;
        let nachricht = match Eingang::parsen(roh) {
            Eingang::Nachricht(n) => n,
            andere => panic!("Offer erwartet, erhalten: {:?}", andere),
        };
        let relay = nachricht.als_relay().expect("Offer ist weiterleitbar");
        assert_eq!(relay.art(), "signal");

        let ausgehend = serde_json::to_value(relay.an_partner()).unwrap();
        assert_eq!(
            ausgehend,
            json!({"type":"webrtc_offer","sdp":{"type":"offer","sdp":"v=0"},"extra":7})
        );
    }

    #[test]
    fn matched_feldnamen() {
        let nachricht = ServerMessage::Matched {
            is_initiator: true,
            session_id: SessionId("a_b_1".into()),
            peer: PeerInfo {
                identity: Identity::from("b"),
                attributes: Attribute::default(),
            },
        };
        let wert = serde_json::to_value(&nachricht).unwrap();
        assert_eq!(wert["type"], "matched");
        assert_eq!(wert["isInitiator"], true);
        assert_eq!(wert["sessionId"], "a_b_1");
        assert_eq!(wert["peer"]["identity"], "b");
    }

    #[test]
    fn online_users_feldnamen() {
        let nachricht = ServerMessage::OnlineUsers {
            users: vec![OnlineUser {
                identity: Identity::from("a"),
                attributes: Attribute::default(),
                is_searching: true,
            }]
            .into(),
        };
        let wert = serde_json::to_value(&nachricht).unwrap();
        assert_eq!(wert["type"], nachricht.typ());
        assert_eq!(wert["users"][0]["isSearching"], true);
    }

    #[test]
    fn telemetrie_klassifizierung() {
        assert!(ServerMessage::OnlineCount { count: 3 }.ist_telemetrie());
        assert!(ServerMessage::OnlineUsers {
            users: Arc::from(Vec::new())
        }
        .ist_telemetrie());
        assert!(!ServerMessage::PeerDisconnected.ist_telemetrie());
        assert!(!ServerMessage::ChatMessage { text: "hi".into() }.ist_telemetrie());
    }

    #[test]
    fn nicht_weiterleitbare_nachrichten() {
        assert!(ClientMessage::Next.als_relay().is_none());
        assert!(ClientMessage::StopSearch.als_relay().is_none());
    }

    #[test]
    fn alle_typen_sind_bekannt() {
        let beispiele = [
            ClientMessage::StopSearch,
            ClientMessage::Next,
            ClientMessage::EndCall,
            ClientMessage::Disconnect,
            ClientMessage::Ping { timestamp: None },
            ClientMessage::Message { text: "x".into() },
        ];
        for nachricht in beispiele {
            assert!(ClientMessage::TYPEN.contains(&nachricht.typ()));
        }
    }
}
