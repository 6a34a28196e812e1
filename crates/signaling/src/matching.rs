//! Matching-Engine – Bewertet Kandidaten und waehlt einen Partner
//!
//! ## Bewertung
//! ```text
//! Geschlecht inkompatibel          -> ausgeschlossen
//! Geschlecht kompatibel            -> +10
//! beide Wuensche konkret erfuellt  -> +5
//! gleicher Standort (beide deklariert) -> +20
//! mindestens eine Seite ohne Standort  -> +2
//! ```
//!
//! Kompatibel ist ein Paar, sobald eine Seite keinen Geschlechtswunsch hat.
//! Haben beide einen Wunsch, muss jeder zum deklarierten Geschlecht der
//! Gegenseite passen; ein nicht deklariertes Geschlecht passt zu jedem Wunsch.
//!
//! Aus der Gruppe mit der hoechsten Punktzahl wird **gleichverteilt zufaellig**
//! gewaehlt. Ein deterministischer Tie-Break wuerde zwei wartende Clients nach
//! jedem "next" immer wieder zusammenbringen.

use rand::seq::SliceRandom;
use rand::Rng;
use treffpunkt_core::{Attribute, Identity, Standort, Suchfilter};

/// Punkte fuer kompatible Geschlechts-Praeferenzen
pub const PUNKTE_GESCHLECHT: u32 = 10;
/// Zusatzpunkte wenn beide Seiten einen konkreten Wunsch haben, den die
/// Gegenseite mit ihrem deklarierten Geschlecht erfuellt
pub const PUNKTE_GESCHLECHT_KONKRET: u32 = 5;
/// Punkte fuer exakt gleichen Standort
pub const PUNKTE_STANDORT: u32 = 20;
/// Punkte wenn mindestens eine Seite keinen Standort deklariert
pub const PUNKTE_STANDORT_OFFEN: u32 = 2;

/// Matching-Sicht auf eine Verbindung (normalisiert, nur lesend)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kandidat {
    pub identity: Identity,
    /// Eigenes Geschlecht
    pub geschlecht: Option<String>,
    /// Gewuenschtes Geschlecht des Partners
    pub wunsch_geschlecht: Option<String>,
    /// Effektive Standort-Praeferenz
    pub standort: Option<Standort>,
}

impl Kandidat {
    /// Baut die Matching-Sicht aus Attributen und Suchfiltern
    pub fn aus_profil(identity: Identity, attribute: &Attribute, filter: &Suchfilter) -> Self {
        Self {
            identity,
            geschlecht: attribute.geschlecht(),
            wunsch_geschlecht: filter.gewuenschtes_geschlecht(),
            standort: filter.standort_praeferenz(attribute),
        }
    }

    /// Widerspricht `anderer` dem Geschlechtswunsch dieses Kandidaten nicht?
    fn akzeptiert(&self, anderer: &Kandidat) -> bool {
        match (&self.wunsch_geschlecht, &anderer.geschlecht) {
            (Some(wunsch), Some(geschlecht)) => wunsch == geschlecht,
            _ => true,
        }
    }

    /// Erfuellt `anderer` den Wunsch mit einem deklarierten Geschlecht?
    fn konkret_erfuellt(&self, anderer: &Kandidat) -> bool {
        self.wunsch_geschlecht.is_some() && self.wunsch_geschlecht == anderer.geschlecht
    }
}

/// Geschlechts-Kompatibilitaet eines Paars
fn geschlecht_kompatibel(a: &Kandidat, b: &Kandidat) -> bool {
    if a.wunsch_geschlecht.is_none() || b.wunsch_geschlecht.is_none() {
        return true;
    }
    a.akzeptiert(b) && b.akzeptiert(a)
}

/// Bewertet ein Paar; `None` bedeutet ausgeschlossen
///
/// Die Bewertung ist symmetrisch.
pub fn bewerten(a: &Kandidat, b: &Kandidat) -> Option<u32> {
    if !geschlecht_kompatibel(a, b) {
        return None;
    }

    let mut punkte = PUNKTE_GESCHLECHT;
    if a.konkret_erfuellt(b) && b.konkret_erfuellt(a) {
        punkte += PUNKTE_GESCHLECHT_KONKRET;
    }

    punkte += match (&a.standort, &b.standort) {
        (Some(x), Some(y)) if x == y => PUNKTE_STANDORT,
        (Some(_), Some(_)) => 0,
        _ => PUNKTE_STANDORT_OFFEN,
    };

    Some(punkte)
}

/// Waehlt einen Partner fuer `suchender` aus dem Kandidaten-Pool
///
/// Der Suchende selbst wird ignoriert falls er im Pool enthalten ist.
/// Gibt `None` zurueck wenn kein Kandidat in Frage kommt.
pub fn finde_partner<R>(suchender: &Kandidat, kandidaten: &[Kandidat], rng: &mut R) -> Option<Identity>
where
    R: Rng + ?Sized,
{
    let bewertet: Vec<(&Kandidat, u32)> = kandidaten
        .iter()
        .filter(|k| k.identity != suchender.identity)
        .filter_map(|k| bewerten(suchender, k).map(|punkte| (k, punkte)))
        .collect();

    let beste = bewertet.iter().map(|(_, punkte)| *punkte).max()?;
    let spitzengruppe: Vec<&Kandidat> = bewertet
        .iter()
        .filter(|(_, punkte)| *punkte == beste)
        .map(|(k, _)| *k)
        .collect();

    let gewaehlt = spitzengruppe.choose(rng)?;
    tracing::trace!(
        suchender = %suchender.identity,
        partner = %gewaehlt.identity,
        punkte = beste,
        gleichstand = spitzengruppe.len(),
        "Partner gewaehlt"
    );
    Some(gewaehlt.identity.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn kandidat(name: &str, geschlecht: Option<&str>, wunsch: Option<&str>, stadt: Option<&str>) -> Kandidat {
        let attribute = Attribute {
            gender: geschlecht.map(str::to_owned),
            city: stadt.map(str::to_owned),
            ..Default::default()
        };
        let filter = Suchfilter {
            gender: wunsch.map(str::to_owned),
            ..Default::default()
        };
        Kandidat::aus_profil(Identity::from(name), &attribute, &filter)
    }

    #[test]
    fn ohne_praeferenzen_passt_jeder() {
        let a = kandidat("a", None, None, None);
        let b = kandidat("b", None, Some("any"), None);
        assert_eq!(bewerten(&a, &b), Some(PUNKTE_GESCHLECHT + PUNKTE_STANDORT_OFFEN));
    }

    #[test]
    fn eine_seite_ohne_wunsch_ist_kompatibel() {
        let a = kandidat("a", Some("female"), Some("male"), None);
        let unbekannt = kandidat("u", None, None, None);
        let frau = kandidat("f", Some("female"), None, None);
        let beliebig = kandidat("b", Some("female"), Some("any"), None);
        let mann_sucht_mann = kandidat("m", Some("male"), Some("male"), None);

        assert_eq!(bewerten(&a, &unbekannt), Some(PUNKTE_GESCHLECHT + PUNKTE_STANDORT_OFFEN));
        assert!(bewerten(&a, &frau).is_some());
        assert!(bewerten(&beliebig, &mann_sucht_mann).is_some());
    }

    #[test]
    fn widersprechende_wuensche_schliessen_aus() {
        let a = kandidat("a", Some("female"), Some("male"), None);
        let frau_sucht_frau = kandidat("f", Some("female"), Some("female"), None);
        let mann_sucht_mann = kandidat("m", Some("male"), Some("male"), None);

        assert_eq!(bewerten(&a, &frau_sucht_frau), None);
        assert_eq!(bewerten(&a, &mann_sucht_mann), None);
        assert_eq!(bewerten(&mann_sucht_mann, &a), None);
    }

    #[test]
    fn undeklariertes_geschlecht_passt_zu_jedem_wunsch() {
        let a = kandidat("a", Some("female"), Some("male"), None);
        let b = kandidat("b", None, Some("female"), None);
        assert_eq!(bewerten(&a, &b), Some(PUNKTE_GESCHLECHT + PUNKTE_STANDORT_OFFEN));
    }

    #[test]
    fn beidseitig_konkreter_wunsch_gibt_bonus() {
        let a = kandidat("a", Some("female"), Some("male"), None);
        let b = kandidat("b", Some("male"), Some("female"), None);
        let c = kandidat("c", Some("male"), None, None);

        let mit_bonus = bewerten(&a, &b).unwrap();
        let ohne_bonus = bewerten(&a, &c).unwrap();
        assert_eq!(mit_bonus - ohne_bonus, PUNKTE_GESCHLECHT_KONKRET);
    }

    #[test]
    fn gleicher_standort_schlaegt_offenen_standort() {
        let a = kandidat("a", None, None, Some("NYC"));
        let gleich = kandidat("b", None, None, Some("nyc"));
        let offen = kandidat("c", None, None, None);
        let anders = kandidat("d", None, None, Some("LA"));

        assert_eq!(bewerten(&a, &gleich), Some(PUNKTE_GESCHLECHT + PUNKTE_STANDORT));
        assert_eq!(bewerten(&a, &offen), Some(PUNKTE_GESCHLECHT + PUNKTE_STANDORT_OFFEN));
        assert_eq!(bewerten(&a, &anders), Some(PUNKTE_GESCHLECHT));
    }

    #[test]
    fn bewertung_ist_symmetrisch() {
        let a = kandidat("a", Some("female"), Some("male"), Some("nyc"));
        let b = kandidat("b", Some("male"), Some("female"), Some("nyc"));
        assert_eq!(bewerten(&a, &b), bewerten(&b, &a));
    }

    #[test]
    fn leerer_pool_liefert_none() {
        let a = kandidat("a", None, None, None);
        assert_eq!(finde_partner(&a, &[], &mut rand::thread_rng()), None);
    }

    #[test]
    fn suchender_wird_nicht_mit_sich_selbst_gepaart() {
        let a = kandidat("a", None, None, None);
        assert_eq!(finde_partner(&a, &[a.clone()], &mut rand::thread_rng()), None);
    }

    #[test]
    fn filter_schliesst_alle_aus() {
        let a = kandidat("a", Some("female"), Some("male"), Some("nyc"));
        let pool = vec![
            kandidat("b", Some("female"), Some("male"), Some("nyc")),
            kandidat("c", Some("male"), Some("male"), None),
        ];
        assert_eq!(finde_partner(&a, &pool, &mut rand::thread_rng()), None);
    }

    #[test]
    fn hoechste_punktzahl_gewinnt() {
        let a = kandidat("a", None, None, Some("nyc"));
        let pool = vec![
            kandidat("la", None, None, Some("la")),
            kandidat("offen", None, None, None),
            kandidat("nyc", None, None, Some("nyc")),
        ];
        for _ in 0..50 {
            assert_eq!(
                finde_partner(&a, &pool, &mut rand::thread_rng()),
                Some(Identity::from("nyc"))
            );
        }
    }

    #[test]
    fn gleichstand_wird_zufaellig_aufgeloest() {
        let a = kandidat("a", None, None, None);
        let pool = vec![
            kandidat("b", None, None, None),
            kandidat("c", None, None, None),
            kandidat("d", None, None, None),
        ];

        let mut haeufigkeit: HashMap<Identity, u32> = HashMap::new();
        let mut rng = rand::thread_rng();
        for _ in 0..3000 {
            let partner = finde_partner(&a, &pool, &mut rng).unwrap();
            *haeufigkeit.entry(partner).or_default() += 1;
        }

        assert_eq!(haeufigkeit.len(), 3, "jeder Kandidat muss vorkommen");
        for (identity, anzahl) in &haeufigkeit {
            assert!(
                (700..=1300).contains(anzahl),
                "{identity} wurde {anzahl} mal gewaehlt, erwartet ~1000"
            );
        }
    }
}
