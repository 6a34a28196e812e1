//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};
use treffpunkt_signaling::SignalingConfig;

/// Umgebungsvariable mit dem Pfad zur Konfigurationsdatei
pub const CONFIG_UMGEBUNGSVARIABLE: &str = "TREFFPUNKT_CONFIG";

/// Pfad wenn weder Argument noch Umgebungsvariable gesetzt sind
pub const STANDARD_PFAD: &str = "config.toml";

/// Bestimmt den Konfigurationspfad: Kommandozeile vor Umgebung vor Standard
pub fn pfad_bestimmen(argument: Option<String>, umgebung: Option<String>) -> String {
    argument
        .or(umgebung)
        .filter(|pfad| !pfad.trim().is_empty())
        .unwrap_or_else(|| STANDARD_PFAD.to_string())
}

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Matching- und Verbindungs-Einstellungen
    pub signaling: SignalingEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_clients: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Treffpunkt".into(),
            max_clients: 1024,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den TCP-Listener
    pub bind_adresse: String,
    /// Port fuer den TCP-Listener
    pub tcp_port: u16,
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_groesse: usize,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 7420,
            max_frame_groesse: 256 * 1024,
        }
    }
}

/// Matching- und Verbindungs-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    /// Kapazitaet der Ausgangs-Queue pro Verbindung
    pub queue_groesse: usize,
    /// Inaktivitaets-Timeout in Sekunden (0 = aus)
    pub verbindungs_timeout_sek: u64,
    /// Neue Matching-Versuche nach abgelehnter Paarung
    pub max_match_versuche: usize,
    /// Intervall fuer den Statistik-Log in Sekunden (0 = aus)
    pub statistik_intervall_sek: u64,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        Self {
            queue_groesse: 64,
            verbindungs_timeout_sek: 0,
            max_match_versuche: 8,
            statistik_intervall_sek: 60,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die vollstaendige Bind-Adresse fuer TCP zurueck
    pub fn tcp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port)
    }

    /// Uebersetzt die Datei-Konfiguration in die des Signaling-Service
    pub fn in_signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            server_name: self.server.name.clone(),
            max_clients: self.server.max_clients,
            max_frame_groesse: self.netzwerk.max_frame_groesse,
            queue_groesse: self.signaling.queue_groesse,
            verbindungs_timeout_sek: self.signaling.verbindungs_timeout_sek,
            max_match_versuche: self.signaling.max_match_versuche,
        }
    }
}
