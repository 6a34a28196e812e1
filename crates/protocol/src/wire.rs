//! Wire-Format fuer TCP-Verbindungen
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 256 KB).
//!
//! Ein zu grosser eingehender Frame ist fatal (der Stream laesst sich nicht
//! mehr synchronisieren). Ein Frame mit ungueltigem JSON dagegen wird als
//! [`Eingang::Ungueltig`] geliefert und die Verbindung bleibt offen.
//!
//! Eine zu grosse ausgehende Nachricht wird vor dem Schreiben erkannt
//! ([`ist_zu_gross`]); der Stream bleibt dabei synchron.

use bytes::{Buf, BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::control::{Eingang, ServerMessage};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (256 KB, reicht fuer SDP-Blobs)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer die Serverseite einer Verbindung
///
/// Dekodiert eingehende Frames tolerant zu [`Eingang`] und kodiert
/// ausgehende [`ServerMessage`]s.
///
/// # Beispiel
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use treffpunkt_protocol::wire::FrameCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, FrameCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_zu_gross(length: usize, max_frame_size: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
            length, max_frame_size
        ),
    )
}

/// Ausgehende Nachricht passt nicht in einen Frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NachrichtZuGross {
    pub laenge: usize,
    pub maximum: usize,
}

impl fmt::Display for NachrichtZuGross {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
            self.laenge, self.maximum
        )
    }
}

impl std::error::Error for NachrichtZuGross {}

/// Wurde das Kodieren nur wegen der Frame-Groesse abgelehnt?
///
/// In diesem Fall wurde nichts geschrieben und die Verbindung ist weiter nutzbar.
pub fn ist_zu_gross(fehler: &io::Error) -> bool {
    fehler
        .get_ref()
        .is_some_and(|inner| inner.is::<NachrichtZuGross>())
}

fn serialisieren<T: Serialize>(message: &T, max_frame_size: usize) -> io::Result<Vec<u8>> {
    let json = serde_json::to_vec(message).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("JSON-Serialisierung fehlgeschlagen: {}", e),
        )
    })?;

    if json.len() > max_frame_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            NachrichtZuGross {
                laenge: json.len(),
                maximum: max_frame_size,
            },
        ));
    }
    Ok(json)
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = Eingang;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen (big-endian u32) ohne den Buffer zu veraendern
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(frame_zu_gross(length, self.max_frame_size));
        }

        // Pruefen ob der vollstaendige Frame bereits im Buffer ist
        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        Ok(Some(Eingang::parsen(&payload)))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<ServerMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serialisieren(&item, self.max_frame_size)?;

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen fuer direktes async Lesen/Schreiben (Client-Seite, Tests)
// ---------------------------------------------------------------------------

/// Liest einen einzelnen Frame aus einem `AsyncRead`
///
/// # Fehler
/// - `UnexpectedEof` wenn die Verbindung vor Abschluss des Frames getrennt wird
/// - `InvalidData` bei ungueltigem JSON oder zu grossem Frame
pub async fn read_frame<R, T>(reader: &mut R, max_frame_size: usize) -> io::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; LENGTH_FIELD_SIZE];
    reader.read_exact(&mut len_buf).await?;
    let length = u32::from_be_bytes(len_buf) as usize;

    if length > max_frame_size {
        return Err(frame_zu_gross(length, max_frame_size));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    serde_json::from_slice(&payload).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("JSON-Deserialisierung fehlgeschlagen: {}", e),
        )
    })
}

/// Schreibt einen einzelnen Frame in einen `AsyncWrite`
///
/// # Fehler
/// - `InvalidData` wenn die Nachricht nicht serialisiert werden kann oder zu gross ist
/// - IO-Fehler beim Schreiben
pub async fn write_frame<W, T>(writer: &mut W, message: &T, max_frame_size: usize) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serialisieren(message, max_frame_size)?;
    write_raw_frame(writer, &json).await
}

/// Schreibt beliebige Bytes als Frame (z.B. um fehlerhafte Clients zu simulieren)
pub async fn write_raw_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len_bytes = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len_bytes).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ClientMessage;

    fn frame(json: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(json.len() as u32);
        buf.put_slice(json);
        buf
    }

    #[test]
    fn frame_codec_dekodiert_bekannte_nachricht() {
        let mut codec = FrameCodec::new();
        let mut buf = frame(br#"{"type":"next"}"#);

        let eingang = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert_eq!(eingang, Eingang::Nachricht(ClientMessage::Next));
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_ungueltiges_json_ist_kein_io_fehler() {
        let mut codec = FrameCodec::new();
        let mut buf = frame(b"{kaputt");

        let eingang = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert!(matches!(eingang, Eingang::Ungueltig { .. }));
    }

    #[test]
    fn frame_codec_unvollstaendiger_frame() {
        let mut codec = FrameCodec::new();
        let buf = frame(br#"{"type":"stop_search"}"#);

        let half = buf.len() / 2;
        let mut partial = BytesMut::from(&buf[..half]);

        let result = codec.decode(&mut partial).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn frame_codec_zu_wenig_bytes_fuer_laengenfeld() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn frame_codec_ablehnung_zu_grosser_frame() {
        let mut codec = FrameCodec::with_max_size(100);

        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(&[b'x'; 200]);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn frame_codec_ablehnung_beim_encode_zu_grosse_nachricht() {
        let mut codec = FrameCodec::with_max_size(10);
        let mut buf = BytesMut::new();
        let fehler = codec
            .encode(ServerMessage::searching(), &mut buf)
            .unwrap_err();
        assert!(ist_zu_gross(&fehler));
        assert!(buf.is_empty(), "abgelehnte Nachricht darf nichts schreiben");
    }

    #[test]
    fn weitergeleiteter_chat_kann_das_limit_ueberschreiten() {
        // "message" wird beim Partner zu "chat_message"
        let max = 64;
        let text = "x".repeat(max - r#"{"type":"message","text":""}"#.len());
        let eingehend = serde_json::to_vec(&ClientMessage::Message { text: text.clone() }).unwrap();
        assert_eq!(eingehend.len(), max);

        let mut codec = FrameCodec::with_max_size(max);
        let mut buf = BytesMut::new();
        let fehler = codec
            .encode(ServerMessage::ChatMessage { text }, &mut buf)
            .unwrap_err();
        assert!(ist_zu_gross(&fehler));

        // Der Codec bleibt benutzbar
        codec
            .encode(ServerMessage::PeerDisconnected, &mut buf)
            .unwrap();
        assert!(!buf.is_empty());
    }

    #[test]
    fn io_fehler_ist_nicht_zu_gross() {
        let fehler = io::Error::new(io::ErrorKind::BrokenPipe, "weg");
        assert!(!ist_zu_gross(&fehler));
    }

    #[test]
    fn frame_codec_mehrere_nachrichten_im_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = frame(br#"{"type":"search"}"#);
        buf.extend_from_slice(&frame(br#"{"type":"whatever"}"#));
        buf.extend_from_slice(&frame(br#"{"type":"disconnect"}"#));

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Eingang::Nachricht(ClientMessage::Search { .. }))
        ));
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Eingang::Unbekannt { .. })
        ));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Eingang::Nachricht(ClientMessage::Disconnect))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_default_max_size() {
        assert_eq!(FrameCodec::new().max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }

    #[tokio::test]
    async fn server_nachricht_kodieren_und_clientseitig_lesen() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(ServerMessage::OnlineCount { count: 4 }, &mut buf)
            .unwrap();

        let mut cursor = io::Cursor::new(buf.to_vec());
        let gelesen: ServerMessage = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        assert_eq!(gelesen, ServerMessage::OnlineCount { count: 4 });
    }

    #[tokio::test]
    async fn async_read_frame_ablehnung_zu_grosser_frame() {
        let mut buffer: Vec<u8> = Vec::new();
        buffer.extend_from_slice(&(2u32 * 1024 * 1024).to_be_bytes());

        let mut cursor = io::Cursor::new(buffer);
        let result: io::Result<ServerMessage> =
            read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn async_write_frame_ablehnung_zu_grosse_nachricht() {
        let mut buffer: Vec<u8> = Vec::new();
        let result = write_frame(&mut buffer, &ClientMessage::Next, 5).await;
        assert!(result.is_err());
    }
}
