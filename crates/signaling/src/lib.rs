//! treffpunkt-signaling – Matching-, Session- und Relay-Kern
//!
//! Dieser Crate paart anonyme, gleichzeitig verbundene Clients nach
//! Kompatibilitaet und leitet Chat- und WebRTC-Signaling-Verkehr
//! ausschliesslich zwischen den beiden Mitgliedern einer Session weiter.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |  Framed<TcpStream, FrameCodec>  <-  Ausgangs-Queue
//!     v
//! MessageDispatcher
//!     |
//!     v
//! Lobby (ein Mutex um den Kernzustand)
//!     +-- Registry        (lebende Verbindungen, Suchstatus, Attribute)
//!     +-- SessionManager  (Paarungen, Session-Index)
//!     +-- Matching        (Bewertung, zufaelliger Tie-Break)
//!     +-- Broadcast       (Relay, Online-Anzahl, Online-Liste)
//! ```

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod lobby;
pub mod matching;
pub mod registry;
pub mod server_state;
pub mod session;
pub mod tcp;

// Bequeme Re-Exporte
pub use broadcast::{ausgangskanal, AusgangsEmpfaenger, ClientSender, SendeErgebnis};
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use lobby::{Absender, ClientZustand, Lobby, LobbyKonfig, LobbySnapshot};
pub use server_state::{SignalingConfig, SignalingState};
pub use tcp::SignalingServer;
