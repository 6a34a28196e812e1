//! treffpunkt-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen die zwischen Client und
//! Server ausgetauscht werden, sowie das Frame-Format auf der Leitung.

pub mod control;
pub mod wire;

pub use control::{ClientMessage, Eingang, OnlineUser, PeerInfo, RelayNutzlast, ServerMessage, SignalArt};
pub use wire::FrameCodec;
