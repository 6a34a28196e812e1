//! treffpunkt-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von Protokoll
//! und Signaling gemeinsam genutzt werden: Identitaeten, Verbindungs- und
//! Session-IDs sowie die deklarierten Attribute und Suchfilter eines Clients.

pub mod profil;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use profil::{Attribute, Standort, Suchfilter, MAX_ATTRIBUT_LAENGE};
pub use types::{ConnectionId, Identity, SessionId, MAX_IDENTITAET_LAENGE};
