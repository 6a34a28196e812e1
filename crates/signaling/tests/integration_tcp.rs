//! End-to-End-Tests ueber echte TCP-Verbindungen

use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use treffpunkt_core::Identity;
use treffpunkt_protocol::wire::{read_frame, write_frame, write_raw_frame, DEFAULT_MAX_FRAME_SIZE};
use treffpunkt_protocol::{ClientMessage, ServerMessage};
use treffpunkt_signaling::{SignalingConfig, SignalingServer, SignalingState};

struct TestServer {
    adresse: SocketAddr,
    state: Arc<SignalingState>,
    _shutdown: watch::Sender<bool>,
}

async fn server_starten(config: SignalingConfig) -> TestServer {
    let state = SignalingState::neu(config);
    let server = SignalingServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
        .await
        .expect("Binden fehlgeschlagen");
    let adresse = server.lokale_adresse().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.starten(shutdown_rx));
    TestServer {
        adresse,
        state,
        _shutdown: shutdown_tx,
    }
}

async fn senden(stream: &mut TcpStream, nachricht: ClientMessage) {
    write_frame(stream, &nachricht, DEFAULT_MAX_FRAME_SIZE)
        .await
        .expect("Senden fehlgeschlagen");
}

/// Liest die naechste Nachricht die keine Telemetrie ist
async fn naechste_meldung(stream: &mut TcpStream) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let nachricht: ServerMessage = read_frame(stream, DEFAULT_MAX_FRAME_SIZE)
                .await
                .expect("Lesen fehlgeschlagen");
            if !nachricht.ist_telemetrie() {
                return nachricht;
            }
        }
    })
    .await
    .expect("Timeout beim Warten auf Nachricht")
}

async fn registrieren(adresse: SocketAddr, name: &str) -> TcpStream {
    let mut stream = TcpStream::connect(adresse).await.unwrap();
    senden(
        &mut stream,
        ClientMessage::Register {
            identity: Identity::from(name),
            attributes: Default::default(),
        },
    )
    .await;
    assert_eq!(
        naechste_meldung(&mut stream).await,
        ServerMessage::RegistrationConfirmed {
            identity: Identity::from(name)
        }
    );
    stream
}

fn search() -> ClientMessage {
    ClientMessage::Search {
        filters: Default::default(),
    }
}

#[tokio::test]
async fn matching_und_signaling_ueber_tcp() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut a = registrieren(server.adresse, "a").await;
    let mut b = registrieren(server.adresse, "b").await;

    senden(&mut a, search()).await;
    assert_eq!(naechste_meldung(&mut a).await, ServerMessage::searching());
    senden(&mut b, search()).await;

    let initiator_b = match naechste_meldung(&mut b).await {
        ServerMessage::Matched { is_initiator, .. } => is_initiator,
        andere => panic!("matched erwartet: {andere:?}"),
    };
    let initiator_a = match naechste_meldung(&mut a).await {
        ServerMessage::Matched { is_initiator, .. } => is_initiator,
        andere => panic!("matched erwartet: {andere:?}"),
    };
    assert!(initiator_b ^ initiator_a, "genau ein Initiator");

    // Offer wird unveraendert weitergereicht
    let roh = json!({"type": "webrtc_offer", "sdp": {"type": "offer", "sdp": "v=0"}});
    write_raw_frame(&mut b, roh.to_string().as_bytes()).await.unwrap();
    let empfangen = naechste_meldung(&mut a).await;
    assert_eq!(serde_json::to_value(&empfangen).unwrap(), roh);

    senden(&mut a, ClientMessage::Message { text: "hallo".into() }).await;
    assert_eq!(
        naechste_meldung(&mut b).await,
        ServerMessage::ChatMessage {
            text: "hallo".into()
        }
    );
}

#[tokio::test]
async fn socket_close_benachrichtigt_partner() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut a = registrieren(server.adresse, "a").await;
    let mut b = registrieren(server.adresse, "b").await;
    senden(&mut a, search()).await;
    naechste_meldung(&mut a).await;
    senden(&mut b, search()).await;
    naechste_meldung(&mut b).await;

    drop(a);

    assert_eq!(naechste_meldung(&mut b).await, ServerMessage::PeerDisconnected);
    assert_eq!(naechste_meldung(&mut b).await, ServerMessage::searching());
    assert_eq!(server.state.lobby.online_anzahl(), 1);
    server.state.lobby.invarianten_pruefen().unwrap();
}

/// Registriert `a` und `b` und paart sie
async fn paar_aufbauen(adresse: SocketAddr) -> (TcpStream, TcpStream) {
    let mut a = registrieren(adresse, "a").await;
    let mut b = registrieren(adresse, "b").await;
    senden(&mut a, search()).await;
    naechste_meldung(&mut a).await;
    senden(&mut b, search()).await;
    naechste_meldung(&mut b).await;
    naechste_meldung(&mut a).await;
    (a, b)
}

#[tokio::test]
async fn zu_grosse_weiterleitung_trennt_partner_nicht() {
    let max = 1024;
    let server = server_starten(SignalingConfig {
        max_frame_groesse: max,
        ..Default::default()
    })
    .await;
    let (mut a, mut b) = paar_aufbauen(server.adresse).await;

    // Eingehend genau am Limit, als chat_message beim Partner darueber
    let text = "x".repeat(max - r#"{"type":"message","text":""}"#.len());
    senden(&mut a, ClientMessage::Message { text }).await;
    senden(&mut a, ClientMessage::Message { text: "hallo".into() }).await;

    assert_eq!(
        naechste_meldung(&mut b).await,
        ServerMessage::ChatMessage {
            text: "hallo".into()
        }
    );
    assert_eq!(server.state.lobby.snapshot().paare.len(), 1);
}

#[tokio::test]
async fn stille_session_bleibt_bestehen() {
    let server = server_starten(SignalingConfig::default()).await;
    let (_a, _b) = paar_aufbauen(server.adresse).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let snapshot = server.state.lobby.snapshot();
    assert_eq!(snapshot.verbunden, 2);
    assert_eq!(snapshot.paare.len(), 1);
}

#[tokio::test]
async fn ping_kaputte_und_unbekannte_frames() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut a = registrieren(server.adresse, "a").await;

    write_raw_frame(&mut a, b"{kein json").await.unwrap();
    write_raw_frame(&mut a, br#"{"type":"token_kaufen","menge":3}"#)
        .await
        .unwrap();
    senden(&mut a, ClientMessage::Ping { timestamp: Some(7) }).await;

    match naechste_meldung(&mut a).await {
        ServerMessage::Pong { timestamp, .. } => assert_eq!(timestamp, Some(7)),
        andere => panic!("pong erwartet: {andere:?}"),
    }
    assert_eq!(server.state.lobby.online_anzahl(), 1, "Verbindung bleibt offen");
}

#[tokio::test]
async fn neue_verbindung_uebernimmt_identitaet() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut alt = registrieren(server.adresse, "a").await;
    let _neu = registrieren(server.adresse, "a").await;

    // Alter Socket wird vom Server geschlossen
    let ergebnis = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if read_frame::<_, ServerMessage>(&mut alt, DEFAULT_MAX_FRAME_SIZE)
                .await
                .is_err()
            {
                break;
            }
        }
    })
    .await;
    assert!(ergebnis.is_ok(), "alter Socket muss geschlossen werden");
    assert_eq!(server.state.lobby.online_anzahl(), 1);
}

#[tokio::test]
async fn server_voll_lehnt_verbindung_ab() {
    let server = server_starten(SignalingConfig {
        max_clients: 1,
        ..Default::default()
    })
    .await;
    let _erster = registrieren(server.adresse, "a").await;

    let mut zweiter = TcpStream::connect(server.adresse).await.unwrap();
    let ergebnis = tokio::time::timeout(
        Duration::from_secs(5),
        read_frame::<_, ServerMessage>(&mut zweiter, DEFAULT_MAX_FRAME_SIZE),
    )
    .await
    .expect("Server muss die Verbindung schliessen");
    assert!(ergebnis.is_err());
    assert_eq!(server.state.aktive_verbindungen(), 1);
}

#[tokio::test]
async fn inaktive_verbindung_wird_getrennt() {
    let server = server_starten(SignalingConfig {
        verbindungs_timeout_sek: 1,
        ..Default::default()
    })
    .await;
    let mut a = registrieren(server.adresse, "a").await;

    let ergebnis = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if read_frame::<_, ServerMessage>(&mut a, DEFAULT_MAX_FRAME_SIZE)
                .await
                .is_err()
            {
                break;
            }
        }
    })
    .await;
    assert!(ergebnis.is_ok(), "Timeout muss die Verbindung beenden");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.state.lobby.online_anzahl(), 0);
}
