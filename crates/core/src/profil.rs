//! Deklarierte Attribute und Suchfilter eines Clients
//!
//! Alle Felder sind frei formuliert und optional. Ein fehlendes Feld,
//! ein leerer String oder der Wert `"any"` bedeuten "keine Praeferenz".
//! Vergleiche erfolgen immer auf normalisierten Werten (getrimmt,
//! kleingeschrieben).

use serde::{Deserialize, Serialize};

/// Platzhalterwert fuer "keine Praeferenz"
pub const BELIEBIG: &str = "any";

/// Maximale Laenge eines Attributfelds in Zeichen
///
/// Attribute landen in jeder Online-Liste, laengere Werte werden gekuerzt.
pub const MAX_ATTRIBUT_LAENGE: usize = 64;

/// Normalisiert einen optionalen Praeferenzwert
///
/// Gibt `None` zurueck wenn keine Praeferenz deklariert ist.
pub fn praeferenz(wert: Option<&str>) -> Option<String> {
    let wert = wert?.trim().to_lowercase();
    if wert.is_empty() || wert == BELIEBIG {
        None
    } else {
        Some(wert)
    }
}

/// Vom Client beim Registrieren deklarierte Attribute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

impl Attribute {
    /// Kuerzt alle Felder auf [`MAX_ATTRIBUT_LAENGE`] Zeichen
    pub fn begrenzt(self) -> Self {
        fn kuerzen(feld: Option<String>) -> Option<String> {
            feld.map(|wert| match wert.char_indices().nth(MAX_ATTRIBUT_LAENGE) {
                Some((ende, _)) => wert[..ende].to_string(),
                None => wert,
            })
        }
        Self {
            gender: kuerzen(self.gender),
            country: kuerzen(self.country),
            city: kuerzen(self.city),
            area: kuerzen(self.area),
        }
    }

    /// Eigenes Geschlecht (normalisiert), `None` wenn nicht deklariert
    pub fn geschlecht(&self) -> Option<String> {
        praeferenz(self.gender.as_deref())
    }

    /// Eigener Standort, `None` wenn kein Standortfeld deklariert ist
    pub fn standort(&self) -> Option<Standort> {
        Standort {
            country: self.country.clone(),
            city: self.city.clone(),
            area: self.area.clone(),
        }
        .normalisiert()
    }
}

/// Standortangabe (Land, Stadt, Gebiet)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

impl Standort {
    /// Normalisiert alle Felder; `None` wenn danach kein Feld uebrig bleibt
    pub fn normalisiert(&self) -> Option<Standort> {
        let standort = Standort {
            country: praeferenz(self.country.as_deref()),
            city: praeferenz(self.city.as_deref()),
            area: praeferenz(self.area.as_deref()),
        };
        if standort.country.is_none() && standort.city.is_none() && standort.area.is_none() {
            None
        } else {
            Some(standort)
        }
    }
}

/// Filter die ein Client beim `search` mitschickt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suchfilter {
    /// Gewuenschtes Geschlecht des Partners
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Bevorzugter Standort; ueberschreibt den deklarierten eigenen Standort
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Standort>,
}

impl Suchfilter {
    /// Gewuenschtes Geschlecht (normalisiert), `None` bei "any"
    pub fn gewuenschtes_geschlecht(&self) -> Option<String> {
        praeferenz(self.gender.as_deref())
    }

    /// Effektive Standort-Praeferenz: Filter vor eigenen Attributen
    pub fn standort_praeferenz(&self, attribute: &Attribute) -> Option<Standort> {
        self.location
            .as_ref()
            .and_then(Standort::normalisiert)
            .or_else(|| attribute.standort())
    }
}
