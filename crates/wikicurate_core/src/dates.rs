use serde::Serialize;

/// Sentinel for a latest year nobody knows.
pub const UNKNOWN_YEAR: i32 = 9999;

const MAX_NESTING: usize = 8;

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("jan", 1),
    ("february", 2),
    ("feb", 2),
    ("march", 3),
    ("mar", 3),
    ("april", 4),
    ("apr", 4),
    ("may", 5),
    ("june", 6),
    ("jun", 6),
    ("july", 7),
    ("jul", 7),
    ("august", 8),
    ("aug", 8),
    ("september", 9),
    ("sept", 9),
    ("sep", 9),
    ("october", 10),
    ("oct", 10),
    ("november", 11),
    ("nov", 11),
    ("december", 12),
    ("dec", 12),
];

const CIRCA_PREFIXES: &[&str] = &["circa", "ca.", "ca", "c."];
const BEFORE_PREFIXES: &[&str] = &["voor/before", "before", "voor"];

/// The years a date could fall in. `latest_year == UNKNOWN_YEAR` with no earliest year
/// is the unknown date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub earliest_year: Option<i32>,
    pub latest_year: i32,
    pub precise_year: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePrecision {
    Year,
    Decade,
    Century,
    Range,
    Unknown,
}

impl Default for DateRange {
    fn default() -> Self {
        Self::unknown()
    }
}

impl DateRange {
    pub const fn unknown() -> Self {
        Self {
            earliest_year: None,
            latest_year: UNKNOWN_YEAR,
            precise_year: None,
        }
    }

    pub const fn exact(year: i32) -> Self {
        Self {
            earliest_year: Some(year),
            latest_year: year,
            precise_year: Some(year),
        }
    }

    pub fn span(earliest: i32, latest: i32) -> Self {
        Self {
            earliest_year: Some(earliest.min(latest)),
            latest_year: earliest.max(latest),
            precise_year: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.earliest_year.is_none() && self.latest_year == UNKNOWN_YEAR
    }

    /// Smallest range covering both. Precision survives only when both sides agree.
    pub fn combine(&self, other: &Self) -> Self {
        let earliest_year = match (self.earliest_year, other.earliest_year) {
            (Some(left), Some(right)) => Some(left.min(right)),
            _ => None,
        };
        let precise_year = if self.precise_year == other.precise_year {
            self.precise_year
        } else {
            None
        };
        Self {
            earliest_year,
            latest_year: self.latest_year.max(other.latest_year),
            precise_year,
        }
    }

    pub fn circa(self) -> Self {
        Self {
            precise_year: None,
            ..self
        }
    }

    pub fn before(self) -> Self {
        Self {
            earliest_year: None,
            latest_year: self.latest_year,
            precise_year: None,
        }
    }

    pub fn precision(&self) -> DatePrecision {
        if self.is_unknown() {
            return DatePrecision::Unknown;
        }
        let Some(earliest) = self.earliest_year else {
            return DatePrecision::Range;
        };
        if self.precise_year.is_some() || earliest == self.latest_year {
            DatePrecision::Year
        } else if earliest % 10 == 0 && self.latest_year == earliest + 9 {
            DatePrecision::Decade
        } else if earliest % 100 == 1 && self.latest_year == earliest + 99 {
            DatePrecision::Century
        } else {
            DatePrecision::Range
        }
    }
}

/// Normalize an archival date string. Never fails: anything unrecognized is
/// `DateRange::unknown()`.
pub fn parse(raw: &str) -> DateRange {
    parse_nested(raw, 0)
}

fn parse_nested(raw: &str, depth: usize) -> DateRange {
    if depth > MAX_NESTING {
        return DateRange::unknown();
    }
    let text = raw.trim().trim_end_matches('.').trim();
    if text.is_empty() {
        return DateRange::unknown();
    }

    if let Some(rest) = text.strip_suffix('~').or_else(|| text.strip_suffix('?')) {
        return parse_nested(rest, depth + 1).circa();
    }
    if let Some(rest) = strip_word_prefix(text, CIRCA_PREFIXES) {
        return parse_nested(rest, depth + 1).circa();
    }
    if let Some(rest) = strip_word_prefix(text, BEFORE_PREFIXES) {
        return parse_nested(rest, depth + 1).before();
    }
    if let Some((first, second)) = split_between(text) {
        return parse_nested(first, depth + 1).combine(&parse_nested(second, depth + 1));
    }
    if let Some((first, second)) = split_year_pair(text) {
        return DateRange::exact(first).combine(&DateRange::exact(second));
    }

    if let Some(year) = parse_iso_date(text) {
        return DateRange::exact(year);
    }
    if let Some((first, second)) = text.split_once('/') {
        let first = parse_nested(first, depth + 1);
        let second = parse_nested(second, depth + 1);
        if !first.is_unknown() && !second.is_unknown() {
            return first.combine(&second);
        }
        return DateRange::unknown();
    }
    if let Some(range) = parse_decade(text) {
        return range;
    }
    if let Some(range) = parse_century(text) {
        return range;
    }
    if let Some(range) = parse_template(text, depth) {
        return range;
    }

    parse_single_date(text).unwrap_or_else(DateRange::unknown)
}

fn strip_word_prefix<'a>(text: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    for prefix in prefixes {
        let Some(head) = text.get(..prefix.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(prefix) {
            continue;
        }
        let rest = &text[prefix.len()..];
        let boundary = rest
            .chars()
            .next()
            .is_some_and(|ch| !ch.is_alphabetic());
        if boundary && !rest.trim().is_empty() {
            return Some(rest.trim_start());
        }
    }
    None
}

fn split_between(text: &str) -> Option<(&str, &str)> {
    let head = text.get(..8)?;
    if !head.eq_ignore_ascii_case("between ") {
        return None;
    }
    let rest = &text[8..];
    let lowered = rest.to_ascii_lowercase();
    let at = lowered.find(" and ")?;
    Some((&rest[..at], &rest[at + 5..]))
}

fn split_year_pair(text: &str) -> Option<(i32, i32)> {
    let (first, second) = text.split_once(['-', '–'])?;
    let first = first.trim();
    let second = second.trim();
    if first.len() != 4 || second.len() != 4 {
        return None;
    }
    Some((parse_year(first)?, parse_year(second)?))
}

fn parse_iso_date(text: &str) -> Option<i32> {
    let mut parts = text.split('-');
    let year = parts.next()?;
    let month = parts.next()?;
    let day = parts.next();
    if parts.next().is_some() || year.len() != 4 {
        return None;
    }
    if !(1..=12).contains(&parse_small(month)?) {
        return None;
    }
    if let Some(day) = day
        && !(1..=31).contains(&parse_small(day)?)
    {
        return None;
    }
    parse_year(year)
}

fn parse_decade(text: &str) -> Option<DateRange> {
    let digits = text
        .strip_suffix("'s")
        .or_else(|| text.strip_suffix('s'))?;
    decade_of(digits)
}

fn decade_of(digits: &str) -> Option<DateRange> {
    let year = parse_year(digits.trim())?;
    if year % 10 != 0 {
        return None;
    }
    Some(DateRange::span(year, year + 9))
}

fn parse_century(text: &str) -> Option<DateRange> {
    let lowered = text.to_ascii_lowercase();
    let ordinal = lowered
        .strip_suffix("century")?
        .trim_end()
        .trim_end_matches('-')
        .trim_end();
    let number = ordinal
        .strip_suffix("st")
        .or_else(|| ordinal.strip_suffix("nd"))
        .or_else(|| ordinal.strip_suffix("rd"))
        .or_else(|| ordinal.strip_suffix("th"))?;
    century_of(number)
}

fn century_of(number: &str) -> Option<DateRange> {
    let century = parse_small(number)?;
    if !(1..=30).contains(&century) {
        return None;
    }
    let century = century as i32;
    Some(DateRange::span((century - 1) * 100 + 1, century * 100))
}

/// `{{circa|X}}`, `{{date|Y|M|D}}` and `{{other date|kind|X|Y}}`.
fn parse_template(text: &str, depth: usize) -> Option<DateRange> {
    let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
    let mut parts = inner.split('|').map(str::trim);
    let name = parts.next()?.replace('_', " ");
    let arguments = parts
        .filter(|part| !part.contains('='))
        .collect::<Vec<_>>();

    if name.eq_ignore_ascii_case("circa") {
        let value = arguments.first()?;
        return Some(parse_nested(value, depth + 1).circa());
    }
    if name.eq_ignore_ascii_case("date") {
        return Some(
            arguments
                .first()
                .and_then(|year| parse_year(year))
                .map(DateRange::exact)
                .unwrap_or_else(DateRange::unknown),
        );
    }
    if !name.eq_ignore_ascii_case("other date") {
        return None;
    }

    let kind = arguments.first()?.to_ascii_lowercase();
    let first = arguments.get(1).copied().unwrap_or_default();
    let range = match kind.as_str() {
        "between" | "-" => {
            let second = arguments.get(2).copied().unwrap_or_default();
            parse_nested(first, depth + 1).combine(&parse_nested(second, depth + 1))
        }
        "circa" | "~" | "ca" => parse_nested(first, depth + 1).circa(),
        "before" | "<" => parse_nested(first, depth + 1).before(),
        "decade" => decade_of(first.trim_end_matches('s')).unwrap_or_else(DateRange::unknown),
        "century" => century_of(first).unwrap_or_else(DateRange::unknown),
        _ => DateRange::unknown(),
    };
    Some(range)
}

fn parse_single_date(text: &str) -> Option<DateRange> {
    let tokens = text
        .split([' ', ',', '.'])
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>();

    let year = match tokens.as_slice() {
        [year] => parse_year(year)?,
        [month, year] => {
            month_number(month)?;
            parse_year(year)?
        }
        [first, second, year] => {
            let day_first = parse_day(first).is_some() && month_number(second).is_some();
            let month_first = month_number(first).is_some() && parse_day(second).is_some();
            if !day_first && !month_first {
                return None;
            }
            parse_year(year)?
        }
        _ => return None,
    };
    Some(DateRange::exact(year))
}

fn month_number(token: &str) -> Option<u32> {
    MONTHS
        .iter()
        .find(|(name, _)| token.eq_ignore_ascii_case(name))
        .map(|(_, number)| *number)
}

fn parse_day(token: &str) -> Option<u32> {
    let day = parse_small(token)?;
    (1..=31).contains(&day).then_some(day)
}

fn parse_year(token: &str) -> Option<i32> {
    if !(3..=4).contains(&token.len()) || !token.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let year = token.parse::<i32>().ok()?;
    (year > 0 && year < UNKNOWN_YEAR).then_some(year)
}

fn parse_small(token: &str) -> Option<u32> {
    if token.is_empty() || token.len() > 2 || !token.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::{DatePrecision, DateRange, UNKNOWN_YEAR, parse};

    fn range(earliest: Option<i32>, latest: i32, precise: Option<i32>) -> DateRange {
        DateRange {
            earliest_year: earliest,
            latest_year: latest,
            precise_year: precise,
        }
    }

    #[test]
    fn archival_golden_cases() {
        assert_eq!(parse("circa 1920"), range(Some(1920), 1920, None));
        assert_eq!(
            parse("between 1890 and 1895"),
            range(Some(1890), 1895, None)
        );
        assert_eq!(parse("March 3, 1992"), DateRange::exact(1992));
        assert_eq!(parse("Sept. 1900"), DateRange::exact(1900));
        assert_eq!(parse("").latest_year, UNKNOWN_YEAR);
        assert!(parse("").is_unknown());
    }

    #[test]
    fn circa_markers_always_drop_precision() {
        assert_eq!(parse("1920?"), range(Some(1920), 1920, None));
        assert_eq!(parse("1920~"), range(Some(1920), 1920, None));
        assert_eq!(parse("ca. 1920"), range(Some(1920), 1920, None));
        assert_eq!(parse("c.1920"), range(Some(1920), 1920, None));
        assert_eq!(parse("Circa May 1920."), range(Some(1920), 1920, None));
    }

    #[test]
    fn before_keeps_only_the_latest_year() {
        assert_eq!(parse("before 1900"), range(None, 1900, None));
        assert_eq!(parse("voor/before 1900"), range(None, 1900, None));
        assert_eq!(parse("Voor 1900"), range(None, 1900, None));
    }

    #[test]
    fn year_pairs_combine() {
        assert_eq!(parse("1890-1895"), range(Some(1890), 1895, None));
        assert_eq!(parse("1890–1895"), range(Some(1890), 1895, None));
        assert_eq!(parse("1895-1890"), range(Some(1890), 1895, None));
        assert_eq!(parse("1900/1910"), range(Some(1900), 1910, None));
        assert_eq!(parse("between 1900 and 1900"), DateRange::exact(1900));
    }

    #[test]
    fn combining_with_an_unknown_side_loses_the_earliest_year() {
        let combined = DateRange::exact(1900).combine(&DateRange::unknown());
        assert_eq!(combined, range(None, UNKNOWN_YEAR, None));
    }

    #[test]
    fn iso_decade_and_century_forms() {
        assert_eq!(parse("1900-05-12"), DateRange::exact(1900));
        assert_eq!(parse("1900-05"), DateRange::exact(1900));
        assert_eq!(parse("1920s"), range(Some(1920), 1929, None));
        assert_eq!(parse("1920's"), range(Some(1920), 1929, None));
        assert_eq!(parse("19th century"), range(Some(1801), 1900, None));
        assert_eq!(parse("1st century"), range(Some(1), 100, None));
        assert!(parse("1925s").is_unknown());
    }

    #[test]
    fn month_table_covers_the_irregular_spellings() {
        assert_eq!(parse("MAY. 1901"), DateRange::exact(1901));
        assert_eq!(parse("sep 1901"), DateRange::exact(1901));
        assert_eq!(parse("3 May 1901"), DateRange::exact(1901));
        assert!(parse("Smarch 1901").is_unknown());
        assert!(parse("May 40 1901").is_unknown());
    }

    #[test]
    fn template_idioms() {
        assert_eq!(parse("{{circa|1900}}"), range(Some(1900), 1900, None));
        assert_eq!(parse("{{date|1901|5|3}}"), DateRange::exact(1901));
        assert_eq!(
            parse("{{other date|between|1900|1910}}"),
            range(Some(1900), 1910, None)
        );
        assert_eq!(parse("{{Other date|~|1900}}"), range(Some(1900), 1900, None));
        assert_eq!(parse("{{other date|<|1900}}"), range(None, 1900, None));
        assert_eq!(
            parse("{{other date|decade|1920}}"),
            range(Some(1920), 1929, None)
        );
        assert_eq!(
            parse("{{other date|century|19}}"),
            range(Some(1801), 1900, None)
        );
        assert!(parse("{{other date|season|1900}}").is_unknown());
    }

    #[test]
    fn garbage_is_unknown() {
        assert!(parse("unknown").is_unknown());
        assert!(parse("n.d.").is_unknown());
        assert!(parse("12").is_unknown());
        assert!(parse("between 1900").is_unknown());
    }

    #[test]
    fn precision_follows_the_range_shape() {
        assert_eq!(parse("1900").precision(), DatePrecision::Year);
        assert_eq!(parse("circa 1900").precision(), DatePrecision::Year);
        assert_eq!(parse("1920s").precision(), DatePrecision::Decade);
        assert_eq!(parse("19th century").precision(), DatePrecision::Century);
        assert_eq!(parse("1890-1895").precision(), DatePrecision::Range);
        assert_eq!(parse("before 1900").precision(), DatePrecision::Range);
        assert_eq!(parse("").precision(), DatePrecision::Unknown);
    }
}
