use std::fmt;

use chrono::{Datelike, Utc};
use serde::Serialize;

use crate::dates::{DateRange, UNKNOWN_YEAR};

/// Years after publication after which a work is public domain in the US.
pub const US_PUBLICATION_TERM: i32 = 95;

struct CountryRow {
    alpha3: &'static str,
    alpha2: &'static str,
    names: &'static [&'static str],
    pma: Option<i32>,
    eu: bool,
}

const COUNTRIES: &[CountryRow] = &[
    CountryRow { alpha3: "USA", alpha2: "US", names: &["United States", "United States of America"], pma: None, eu: false },
    CountryRow { alpha3: "AUT", alpha2: "AT", names: &["Austria"], pma: Some(70), eu: true },
    CountryRow { alpha3: "BEL", alpha2: "BE", names: &["Belgium"], pma: Some(70), eu: true },
    CountryRow { alpha3: "DEU", alpha2: "DE", names: &["Germany"], pma: Some(70), eu: true },
    CountryRow { alpha3: "DNK", alpha2: "DK", names: &["Denmark"], pma: Some(70), eu: true },
    CountryRow { alpha3: "ESP", alpha2: "ES", names: &["Spain"], pma: Some(70), eu: true },
    CountryRow { alpha3: "FIN", alpha2: "FI", names: &["Finland"], pma: Some(70), eu: true },
    CountryRow { alpha3: "FRA", alpha2: "FR", names: &["France"], pma: Some(70), eu: true },
    CountryRow { alpha3: "GBR", alpha2: "GB", names: &["United Kingdom", "UK", "Great Britain"], pma: Some(70), eu: false },
    CountryRow { alpha3: "IRL", alpha2: "IE", names: &["Ireland"], pma: Some(70), eu: true },
    CountryRow { alpha3: "ITA", alpha2: "IT", names: &["Italy"], pma: Some(70), eu: true },
    CountryRow { alpha3: "NLD", alpha2: "NL", names: &["Netherlands", "The Netherlands"], pma: Some(70), eu: true },
    CountryRow { alpha3: "POL", alpha2: "PL", names: &["Poland"], pma: Some(70), eu: true },
    CountryRow { alpha3: "PRT", alpha2: "PT", names: &["Portugal"], pma: Some(70), eu: true },
    CountryRow { alpha3: "SWE", alpha2: "SE", names: &["Sweden"], pma: Some(70), eu: true },
    CountryRow { alpha3: "CHE", alpha2: "CH", names: &["Switzerland"], pma: Some(70), eu: false },
    CountryRow { alpha3: "CAN", alpha2: "CA", names: &["Canada"], pma: Some(50), eu: false },
    CountryRow { alpha3: "CHN", alpha2: "CN", names: &["China"], pma: Some(50), eu: false },
];

/// ISO 3166 alpha-3 code, uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CountryCode(String);

impl CountryCode {
    pub fn usa() -> Self {
        Self("USA".to_string())
    }

    /// Accepts alpha-3, alpha-2 or the English name of a known country; any other
    /// three-letter code is kept as-is so unsupported countries stay representable.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Some(row) = COUNTRIES.iter().find(|row| {
            trimmed.eq_ignore_ascii_case(row.alpha3)
                || trimmed.eq_ignore_ascii_case(row.alpha2)
                || row.names.iter().any(|name| trimmed.eq_ignore_ascii_case(name))
        }) {
            return Some(Self(row.alpha3.to_string()));
        }
        if trimmed.len() == 3 && trimmed.bytes().all(|byte| byte.is_ascii_alphabetic()) {
            return Some(Self(trimmed.to_ascii_uppercase()));
        }
        None
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_usa(&self) -> bool {
        self.0 == "USA"
    }

    fn row(&self) -> Option<&'static CountryRow> {
        COUNTRIES.iter().find(|row| row.alpha3 == self.0)
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Copyright term after the author's death, or `None` when the country is unsupported.
pub fn pma_duration(country: &CountryCode) -> Option<i32> {
    country.row().and_then(|row| row.pma)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseTag {
    PdOldAutoExpired { death_year: i32 },
    PdUsExpired { country: CountryCode },
    PdFrance,
    PdAnon70Eu,
    Composite(Vec<LicenseTag>),
}

impl LicenseTag {
    pub fn wikitext(&self) -> String {
        match self {
            Self::PdOldAutoExpired { death_year } => {
                format!("{{{{PD-old-auto-expired|deathyear={death_year}}}}}")
            }
            Self::PdUsExpired { country } => format!("{{{{PD-US-expired|country={country}}}}}"),
            Self::PdFrance => "{{PD-France}}".to_string(),
            Self::PdAnon70Eu => "{{PD-anon-70-EU}}".to_string(),
            Self::Composite(tags) => tags
                .iter()
                .map(Self::wikitext)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Template names this tag places on a page.
    pub fn template_names(&self) -> Vec<&'static str> {
        match self {
            Self::PdOldAutoExpired { .. } => vec!["PD-old-auto-expired"],
            Self::PdUsExpired { .. } => vec!["PD-US-expired"],
            Self::PdFrance => vec!["PD-France"],
            Self::PdAnon70Eu => vec!["PD-anon-70-EU"],
            Self::Composite(tags) => tags.iter().flat_map(Self::template_names).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeniedReason {
    NoDeathYear,
    AuthorDiedTooRecently,
    UnsupportedCountry,
    PublishedTooRecently,
    UnknownPublicationDate,
}

impl DeniedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoDeathYear => "no author death year",
            Self::AuthorDiedTooRecently => "author died too recently",
            Self::UnsupportedCountry => "unsupported country",
            Self::PublishedTooRecently => "published too recently",
            Self::UnknownPublicationDate => "unknown publication date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseReason {
    Granted,
    Denied(DeniedReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseDecision {
    pub tag: Option<LicenseTag>,
    pub reason: LicenseReason,
}

impl LicenseDecision {
    fn granted(tag: LicenseTag) -> Self {
        Self {
            tag: Some(tag),
            reason: LicenseReason::Granted,
        }
    }

    fn denied(reason: DeniedReason) -> Self {
        Self {
            tag: None,
            reason: LicenseReason::Denied(reason),
        }
    }

    pub fn is_granted(&self) -> bool {
        self.tag.is_some()
    }

    pub fn denied_reason(&self) -> Option<DeniedReason> {
        match self.reason {
            LicenseReason::Denied(reason) => Some(reason),
            LicenseReason::Granted => None,
        }
    }
}

/// Public-domain decision table. Pure; every input is resolved by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicenseInference {
    current_year: i32,
}

impl Default for LicenseInference {
    fn default() -> Self {
        Self::new(Utc::now().year())
    }
}

impl LicenseInference {
    pub fn new(current_year: i32) -> Self {
        Self { current_year }
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    pub fn infer(
        &self,
        publication: &DateRange,
        author_death_year: Option<i32>,
        country: &CountryCode,
    ) -> LicenseDecision {
        let pma = pma_duration(country);
        let eligible = country.is_usa()
            || matches!(
                (author_death_year, pma),
                (Some(death_year), Some(term))
                    if self.current_year.checked_sub(death_year).is_some_and(|elapsed| elapsed > term)
            );
        if !eligible {
            let reason = match (author_death_year, pma) {
                (None, _) => DeniedReason::NoDeathYear,
                (Some(_), None) => DeniedReason::UnsupportedCountry,
                (Some(_), Some(_)) => DeniedReason::AuthorDiedTooRecently,
            };
            return LicenseDecision::denied(reason);
        }
        self.expired_tag(publication, author_death_year, country)
    }

    /// Fallback for anonymous or unknown authors: publication date and country only.
    pub fn infer_anonymous(&self, publication: &DateRange, country: &CountryCode) -> LicenseDecision {
        if !country.is_usa() && pma_duration(country).is_none() {
            return LicenseDecision::denied(DeniedReason::UnsupportedCountry);
        }
        self.expired_tag(publication, None, country)
    }

    fn expired_tag(
        &self,
        publication: &DateRange,
        author_death_year: Option<i32>,
        country: &CountryCode,
    ) -> LicenseDecision {
        if publication.latest_year == UNKNOWN_YEAR {
            return LicenseDecision::denied(DeniedReason::UnknownPublicationDate);
        }
        if publication.latest_year >= self.current_year.saturating_sub(US_PUBLICATION_TERM) {
            return LicenseDecision::denied(DeniedReason::PublishedTooRecently);
        }
        if let Some(death_year) = author_death_year {
            return LicenseDecision::granted(LicenseTag::PdOldAutoExpired { death_year });
        }
        if country.is_usa() {
            return LicenseDecision::granted(LicenseTag::PdUsExpired {
                country: country.clone(),
            });
        }
        match country_composite(country) {
            Some(tag) => LicenseDecision::granted(tag),
            None => LicenseDecision::denied(DeniedReason::UnsupportedCountry),
        }
    }
}

fn country_composite(country: &CountryCode) -> Option<LicenseTag> {
    let row = country.row()?;
    let local = match row.alpha3 {
        "FRA" => LicenseTag::PdFrance,
        _ if row.eu && row.pma == Some(70) => LicenseTag::PdAnon70Eu,
        _ => return None,
    };
    Some(LicenseTag::Composite(vec![
        LicenseTag::PdUsExpired {
            country: country.clone(),
        },
        local,
    ]))
}

#[cfg(test)]
mod tests {
    use super::{
        CountryCode, DeniedReason, LicenseInference, LicenseTag, pma_duration,
    };
    use crate::dates::DateRange;

    fn published(latest: i32) -> DateRange {
        DateRange {
            earliest_year: None,
            latest_year: latest,
            precise_year: None,
        }
    }

    fn country(raw: &str) -> CountryCode {
        CountryCode::parse(raw).expect("country")
    }

    #[test]
    fn extreme_death_years_are_denied_without_overflow() {
        let inference = LicenseInference::new(2026);
        let decision = inference.infer(&published(1800), Some(i32::MIN), &country("DEU"));
        assert_eq!(
            decision.denied_reason(),
            Some(DeniedReason::AuthorDiedTooRecently)
        );
        let decision = inference.infer(&published(1800), Some(i32::MAX), &country("DEU"));
        assert_eq!(
            decision.denied_reason(),
            Some(DeniedReason::AuthorDiedTooRecently)
        );
    }

    #[test]
    fn golden_cases() {
        let inference = LicenseInference::new(2026);

        let decision = inference.infer(&published(1900), Some(1930), &country("USA"));
        assert_eq!(
            decision.tag,
            Some(LicenseTag::PdOldAutoExpired { death_year: 1930 })
        );

        let decision = inference.infer(&published(2010), Some(1930), &country("USA"));
        assert_eq!(decision.tag, None);
        assert_eq!(
            decision.denied_reason(),
            Some(DeniedReason::PublishedTooRecently)
        );

        let decision = inference.infer(&published(1900), None, &country("FRA"));
        assert_eq!(decision.tag, None);
        assert_eq!(decision.denied_reason(), Some(DeniedReason::NoDeathYear));
    }

    #[test]
    fn pma_table_decides_eligibility() {
        let inference = LicenseInference::new(2026);
        let france = country("France");

        assert!(inference.infer(&published(1900), Some(1950), &france).is_granted());
        assert_eq!(
            inference
                .infer(&published(1900), Some(1960), &france)
                .denied_reason(),
            Some(DeniedReason::AuthorDiedTooRecently)
        );
        assert!(inference.infer(&published(1900), Some(1970), &country("CA")).is_granted());
        assert_eq!(
            inference
                .infer(&published(1900), Some(1900), &country("JPN"))
                .denied_reason(),
            Some(DeniedReason::UnsupportedCountry)
        );
    }

    #[test]
    fn the_publication_threshold_is_strict() {
        let inference = LicenseInference::new(2026);
        let usa = CountryCode::usa();
        assert!(inference.infer(&published(1930), Some(1900), &usa).is_granted());
        assert!(!inference.infer(&published(1931), Some(1900), &usa).is_granted());
        assert_eq!(
            inference
                .infer(&DateRange::unknown(), Some(1900), &usa)
                .denied_reason(),
            Some(DeniedReason::UnknownPublicationDate)
        );
    }

    #[test]
    fn anonymous_fallback_uses_country_tags() {
        let inference = LicenseInference::new(2026);

        let usa = inference.infer_anonymous(&published(1900), &country("US"));
        assert_eq!(
            usa.tag.map(|tag| tag.wikitext()),
            Some("{{PD-US-expired|country=USA}}".to_string())
        );

        let france = inference.infer_anonymous(&published(1900), &country("fr"));
        assert_eq!(
            france.tag.map(|tag| tag.wikitext()),
            Some("{{PD-US-expired|country=FRA}}\n{{PD-France}}".to_string())
        );

        let germany = inference.infer_anonymous(&published(1900), &country("Germany"));
        assert_eq!(
            germany.tag.expect("granted").template_names(),
            vec!["PD-US-expired", "PD-anon-70-EU"]
        );

        assert_eq!(
            inference
                .infer_anonymous(&published(1900), &country("CAN"))
                .denied_reason(),
            Some(DeniedReason::UnsupportedCountry)
        );
    }

    #[test]
    fn death_year_tag_renders_as_a_template() {
        assert_eq!(
            LicenseTag::PdOldAutoExpired { death_year: 1930 }.wikitext(),
            "{{PD-old-auto-expired|deathyear=1930}}"
        );
    }

    #[test]
    fn country_codes_normalize_to_alpha3() {
        assert_eq!(country("gb").as_str(), "GBR");
        assert_eq!(country("United Kingdom").as_str(), "GBR");
        assert_eq!(country("jpn").as_str(), "JPN");
        assert!(CountryCode::parse("Atlantis").is_none());
        assert_eq!(pma_duration(&country("CHN")), Some(50));
        assert_eq!(pma_duration(&country("USA")), None);
    }
}
