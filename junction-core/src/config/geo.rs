//! `continents` and `regions` lookup tables: `name -> [ISO 3166-1 alpha-2
//! country code, ...]`, consulted only when resolving a route's
//! `geoTarget` map (spec.md §3, §6). The actual mapping a production
//! deployment uses is operational data, not specified by spec.md beyond
//! "string -> list of country codes"; the tables below are a small,
//! illustrative set covering the common continent/region names a
//! `geoTarget` map is likely to name, not an authoritative ISO dataset.

use std::collections::HashMap;
use std::sync::OnceLock;

static CONTINENTS: OnceLock<HashMap<&'static str, Vec<&'static str>>> = OnceLock::new();
static REGIONS: OnceLock<HashMap<&'static str, Vec<&'static str>>> = OnceLock::new();

fn continents() -> &'static HashMap<&'static str, Vec<&'static str>> {
    CONTINENTS.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "north_america",
            vec!["US", "CA", "MX", "GT", "PA", "CR"],
        );
        m.insert(
            "south_america",
            vec!["BR", "AR", "CL", "CO", "PE", "UY"],
        );
        m.insert(
            "europe",
            vec!["GB", "DE", "FR", "ES", "IT", "NL", "SE", "PL", "IE"],
        );
        m.insert(
            "asia",
            vec!["CN", "JP", "KR", "IN", "SG", "ID", "TH", "VN"],
        );
        m.insert("africa", vec!["ZA", "NG", "EG", "KE", "MA"]);
        m.insert("oceania", vec!["AU", "NZ", "FJ"]);
        m
    })
}

fn regions() -> &'static HashMap<&'static str, Vec<&'static str>> {
    REGIONS.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert("eu", vec!["GB", "DE", "FR", "ES", "IT", "NL", "SE", "PL", "IE"]);
        m.insert("apac", vec!["CN", "JP", "KR", "IN", "SG", "ID", "TH", "VN", "AU", "NZ"]);
        m.insert("latam", vec!["BR", "AR", "CL", "CO", "PE", "MX"]);
        m.insert("nafta", vec!["US", "CA", "MX"]);
        m
    })
}

/// Return the named region's key iff `country_code` (already upper-cased)
/// is a member.
pub fn region_for(country_code: &str) -> Option<&'static str> {
    regions()
        .iter()
        .find(|(_, codes)| codes.iter().any(|c| *c == country_code))
        .map(|(name, _)| *name)
}

/// Return the named continent's key iff `country_code` is a member.
pub fn continent_for(country_code: &str) -> Option<&'static str> {
    continents()
        .iter()
        .find(|(_, codes)| codes.iter().any(|c| *c == country_code))
        .map(|(name, _)| *name)
}

/// The full `country -> region` reverse index, for embedding into the
/// client-side `geoTarget` redirector page (spec.md §4.5) so the browser
/// can resolve an arbitrary cookie-supplied country code without another
/// round trip.
pub fn country_to_region() -> HashMap<&'static str, &'static str> {
    let mut out = HashMap::new();
    for (region, codes) in regions() {
        for code in codes {
            out.insert(*code, *region);
        }
    }
    out
}

/// The full `country -> continent` reverse index; see [`country_to_region`].
pub fn country_to_continent() -> HashMap<&'static str, &'static str> {
    let mut out = HashMap::new();
    for (continent, codes) in continents() {
        for code in codes {
            out.insert(*code, *continent);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_country_resolves_region_and_continent() {
        assert_eq!(region_for("DE"), Some("eu"));
        assert_eq!(continent_for("DE"), Some("europe"));
    }

    #[test]
    fn unknown_country_resolves_nothing() {
        assert_eq!(region_for("ZZ"), None);
        assert_eq!(continent_for("ZZ"), None);
    }

    #[test]
    fn reverse_indices_agree_with_the_forward_lookups() {
        let by_region = country_to_region();
        let by_continent = country_to_continent();
        assert_eq!(by_region.get("DE"), Some(&"eu"));
        assert_eq!(by_continent.get("DE"), Some(&"europe"));
    }
}
