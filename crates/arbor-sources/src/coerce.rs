//! Cell coercion for source values.
//!
//! Parsers return `Ok(None)` for null cells and `Err(reason)` for cells that hold
//! something unparseable; callers turn the latter into a [`crate::ParseWarning`].

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Spellings treated as an absent value.
pub const NULL_TOKENS: [&str; 8] = ["", "nan", "NaN", "null", "NULL", "None", "NA", "N/A"];

const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d %b %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Trimmed cell text, or `None` for a null token.
pub fn clean(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if NULL_TOKENS.contains(&trimmed) {
        None
    } else {
        Some(trimmed)
    }
}

pub fn parse_f64(raw: &str) -> Result<Option<f64>, String> {
    let Some(text) = clean(raw) else {
        return Ok(None);
    };
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        Ok(_) => Err("is not a finite number".to_string()),
        Err(_) => Err("is not a number".to_string()),
    }
}

/// 2^63, the first whole float past `i64::MAX`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Integers, including float spellings of whole numbers such as `12.0`.
pub fn parse_i64(raw: &str) -> Result<Option<i64>, String> {
    let Some(text) = clean(raw) else {
        return Ok(None);
    };
    if let Ok(value) = text.parse::<i64>() {
        return Ok(Some(value));
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value.fract() == 0.0 => {
            if (-I64_BOUND..I64_BOUND).contains(&value) {
                Ok(Some(value as i64))
            } else {
                Err("is out of range for an integer".to_string())
            }
        }
        _ => Err("is not an integer".to_string()),
    }
}

fn parse_datetime_prefix(text: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Tries each date pattern in order; the first that parses wins.
pub fn parse_date(raw: &str) -> Result<Option<NaiveDate>, String> {
    let Some(text) = clean(raw) else {
        return Ok(None);
    };
    if let Some(datetime) = parse_datetime_prefix(text) {
        return Ok(Some(datetime.date()));
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .map(Some)
        .ok_or_else(|| "is not a recognized date".to_string())
}

/// Timestamps for climate readings. A bare date means midnight.
pub fn parse_timestamp(raw: &str) -> Result<Option<NaiveDateTime>, String> {
    let Some(text) = clean(raw) else {
        return Ok(None);
    };
    if let Some(datetime) = parse_datetime_prefix(text) {
        return Ok(Some(datetime));
    }
    match parse_date(text) {
        Ok(Some(date)) => Ok(Some(date.and_time(NaiveTime::MIN))),
        Ok(None) => Ok(None),
        Err(_) => Err("is not a recognized timestamp".to_string()),
    }
}

/// GBIF taxon key, or `None` when the source has no usable identifier.
pub fn normalize_gbif_id(raw: &str) -> Option<String> {
    let text = clean(raw)?;
    if text == "0" || text.eq_ignore_ascii_case("No identificado") {
        return None;
    }
    if let Some(idx) = text.find("gbif.org/species/") {
        let digits: String = text[idx + "gbif.org/species/".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        return (!digits.is_empty()).then_some(digits);
    }
    if let Some(whole) = text.strip_suffix(".0") {
        if !whole.is_empty() && whole.chars().all(|c| c.is_ascii_digit()) {
            return (whole != "0").then(|| whole.to_string());
        }
    }
    Some(text.to_string())
}

/// Standing flag from the `general_state` column. Unknown spellings count as standing.
pub fn parse_standing(raw: &str) -> bool {
    !matches!(
        clean(raw),
        Some("N" | "n" | "No" | "no" | "NO" | "false" | "False" | "FALSE" | "0")
    )
}

/// Species epithet with a leading `<genus> ` removed.
pub fn strip_genus_prefix(specie: &str, genus: &str) -> String {
    let specie = specie.trim();
    let genus = genus.trim();
    if genus.is_empty() {
        return specie.to_string();
    }
    match specie.strip_prefix(genus) {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start().to_string(),
        _ => specie.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn null_tokens_are_absent() {
        for token in NULL_TOKENS {
            assert_eq!(parse_f64(token), Ok(None));
            assert_eq!(parse_date(token), Ok(None));
        }
        assert_eq!(clean("  Plaza "), Some("Plaza"));
    }

    #[test]
    fn numbers_accept_float_spellings_of_integers() {
        assert_eq!(parse_i64("42"), Ok(Some(42)));
        assert_eq!(parse_i64("42.0"), Ok(Some(42)));
        assert!(parse_i64("42.5").is_err());
        assert_eq!(parse_f64("-75.23"), Ok(Some(-75.23)));
        assert!(parse_f64("north").is_err());
    }

    #[test]
    fn non_finite_and_oversized_numbers_are_rejected() {
        assert_eq!(parse_f64("inf"), Err("is not a finite number".to_string()));
        assert!(parse_f64("-Infinity").is_err());
        assert_eq!(parse_i64("1e20"), Err("is out of range for an integer".to_string()));
        assert_eq!(parse_i64("-1e20"), Err("is out of range for an integer".to_string()));
        assert_eq!(parse_i64("1e3"), Ok(Some(1000)));
        assert_eq!(parse_i64("9223372036854775807"), Ok(Some(i64::MAX)));
    }

    #[test]
    fn dates_try_each_pattern_in_order() {
        assert_eq!(parse_date("2022-03-04"), Ok(Some(date(2022, 3, 4))));
        assert_eq!(parse_date("04/03/2022"), Ok(Some(date(2022, 3, 4))));
        assert_eq!(parse_date("04-03-2022"), Ok(Some(date(2022, 3, 4))));
        assert_eq!(parse_date("2022/03/04"), Ok(Some(date(2022, 3, 4))));
        assert_eq!(parse_date("12/25/2022"), Ok(Some(date(2022, 12, 25))));
        assert_eq!(parse_date("04 Mar 2022"), Ok(Some(date(2022, 3, 4))));
        assert_eq!(parse_date("04 March 2022"), Ok(Some(date(2022, 3, 4))));
        assert!(parse_date("sometime in spring").is_err());
    }

    #[test]
    fn datetimes_are_truncated_to_dates() {
        assert_eq!(parse_date("2021-07-01 13:45:00"), Ok(Some(date(2021, 7, 1))));
        assert_eq!(parse_date("2021-07-01T13:45:00"), Ok(Some(date(2021, 7, 1))));
        let stamp = parse_timestamp("2021-07-01").expect("parse").expect("value");
        assert_eq!(stamp.date(), date(2021, 7, 1));
        assert_eq!(stamp.time(), NaiveTime::MIN);
    }

    #[test]
    fn gbif_ids_are_normalized() {
        assert_eq!(normalize_gbif_id("0"), None);
        assert_eq!(normalize_gbif_id(""), None);
        assert_eq!(normalize_gbif_id("No identificado"), None);
        assert_eq!(
            normalize_gbif_id("https://www.gbif.org/species/2684241"),
            Some("2684241".to_string())
        );
        assert_eq!(normalize_gbif_id("2684241.0"), Some("2684241".to_string()));
        assert_eq!(normalize_gbif_id("0.0"), None);
        assert_eq!(normalize_gbif_id("5289"), Some("5289".to_string()));
    }

    #[test]
    fn standing_defaults_to_true() {
        assert!(parse_standing("Sí"));
        assert!(parse_standing("1"));
        assert!(!parse_standing("No"));
        assert!(!parse_standing("0"));
        assert!(parse_standing(""));
        assert!(parse_standing("quizás"));
    }

    #[test]
    fn genus_prefix_is_stripped_from_epithets() {
        assert_eq!(strip_genus_prefix("Tabebuia rosea", "Tabebuia"), "rosea");
        assert_eq!(strip_genus_prefix("rosea", "Tabebuia"), "rosea");
        assert_eq!(strip_genus_prefix("Tabebuiarosea", "Tabebuia"), "Tabebuiarosea");
    }
}
