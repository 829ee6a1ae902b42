//! Date extraction from free text.
//!
//! Grammars run over the whole text one after another. A date is kept on
//! its first sighting, so results follow grammar order and then position
//! within a grammar. Dates are deduplicated by calendar day. Impossible dates such as
//! 31.02.2024 are dropped silently.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};

/// Russian month names, genitive ("15 марта 2025").
const MONTHS_FULL: &str =
    "января|февраля|марта|апреля|мая|июня|июля|августа|сентября|октября|ноября|декабря";

/// Three-letter abbreviations ("15 мар. 2025").
const MONTHS_SHORT: &str = "янв|фев|мар|апр|май|июн|июл|авг|сен|окт|ноя|дек";

/// How the three capture groups of a grammar map to a date.
#[derive(Debug, Clone, Copy)]
enum Layout {
    /// day, month, 4-digit year
    DayMonthYear,
    /// 4-digit year, month, day
    YearMonthDay,
    /// day, month name, 4-digit year
    DayNameYear,
    /// day, month, 2- or 4-digit year
    DayMonthShortYear,
}

struct Grammar {
    regex: Regex,
    layout: Layout,
}

static GRAMMARS: LazyLock<Vec<Grammar>> = LazyLock::new(|| {
    let grammar = |pattern: &str, layout| Grammar {
        regex: Regex::new(pattern).unwrap(),
        layout,
    };
    vec![
        grammar(
            r"\b([0-9]{1,2})\.([0-9]{1,2})\.([0-9]{4})\b",
            Layout::DayMonthYear,
        ),
        grammar(
            r"\b([0-9]{1,2})/([0-9]{1,2})/([0-9]{4})\b",
            Layout::DayMonthYear,
        ),
        grammar(
            r"\b([0-9]{4})-([0-9]{1,2})-([0-9]{1,2})\b",
            Layout::YearMonthDay,
        ),
        grammar(
            &format!(r"(?i)\b([0-9]{{1,2}})\s+({MONTHS_FULL})\s+([0-9]{{4}})\b"),
            Layout::DayNameYear,
        ),
        grammar(
            &format!(r"(?i)\b([0-9]{{1,2}})\s+({MONTHS_SHORT})\.?\s+([0-9]{{4}})\b"),
            Layout::DayNameYear,
        ),
        grammar(
            r"\b([0-9]{1,2})[./]([0-9]{1,2})[./]([0-9]{4}|[0-9]{2})\b",
            Layout::DayMonthShortYear,
        ),
    ]
});

/// A date found in text together with the substring it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDate {
    pub date: NaiveDate,
    pub text: String,
}

/// Every distinct date in `text`, in order of first sighting.
pub fn find_dates(text: &str) -> Vec<ExtractedDate> {
    let mut found: Vec<ExtractedDate> = Vec::new();

    for grammar in GRAMMARS.iter() {
        for caps in grammar.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let Some(date) = resolve(&caps, grammar.layout) else {
                continue;
            };
            if !found.iter().any(|f| f.date == date) {
                found.push(ExtractedDate {
                    date,
                    text: whole.as_str().to_string(),
                });
            }
        }
    }
    found
}

/// Distinct dates in `text` as `YYYY-MM-DD`, in order of first sighting.
pub fn extract_dates(text: &str) -> Vec<String> {
    find_dates(text)
        .into_iter()
        .map(|d| d.date.format("%Y-%m-%d").to_string())
        .collect()
}

fn resolve(caps: &Captures<'_>, layout: Layout) -> Option<NaiveDate> {
    let num = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();

    let (year, month, day) = match layout {
        Layout::DayMonthYear => (num(3)?, num(2)?, num(1)?),
        Layout::YearMonthDay => (num(1)?, num(2)?, num(3)?),
        Layout::DayNameYear => (num(3)?, month_number(caps.get(2)?.as_str())?, num(1)?),
        Layout::DayMonthShortYear => {
            let raw = caps.get(3)?.as_str();
            let year = raw.parse::<u32>().ok()?;
            let year = if raw.len() == 2 { expand_year(year) } else { year };
            (year, num(2)?, num(1)?)
        }
    };

    if year == 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)
}

/// Two-digit years: below 50 are 20xx, the rest 19xx.
pub fn expand_year(yy: u32) -> u32 {
    if yy < 50 { 2000 + yy } else { 1900 + yy }
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    let month = match name.as_str() {
        "января" | "янв" => 1,
        "февраля" | "фев" => 2,
        "марта" | "мар" => 3,
        "апреля" | "апр" => 4,
        "мая" | "май" => 5,
        "июня" | "июн" => 6,
        "июля" | "июл" => 7,
        "августа" | "авг" => 8,
        "сентября" | "сен" => 9,
        "октября" | "окт" => 10,
        "ноября" | "ноя" => 11,
        "декабря" | "дек" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_grammars() {
        assert_eq!(extract_dates("due 15.03.2025"), vec!["2025-03-15"]);
        assert_eq!(extract_dates("due 5/3/2025"), vec!["2025-03-05"]);
        assert_eq!(extract_dates("due 2025-4-1"), vec!["2025-04-01"]);
    }

    #[test]
    fn month_name_grammars() {
        assert_eq!(extract_dates("встреча 1 января 2025"), vec!["2025-01-01"]);
        assert_eq!(extract_dates("до 15 Марта 2025 года"), vec!["2025-03-15"]);
        assert_eq!(extract_dates("9 мая 2025"), vec!["2025-05-09"]);
        assert_eq!(extract_dates("3 дек. 2024"), vec!["2024-12-03"]);
        assert_eq!(extract_dates("3 май 2024"), vec!["2024-05-03"]);
        assert_eq!(extract_dates("12 ОКТ 2024"), vec!["2024-10-12"]);
    }

    #[test]
    fn two_digit_years_split_at_fifty() {
        assert_eq!(extract_dates("01.02.15"), vec!["2015-02-01"]);
        assert_eq!(extract_dates("01/02/72"), vec!["1972-02-01"]);
        assert_eq!(extract_dates("01.02.49"), vec!["2049-02-01"]);
        assert_eq!(extract_dates("01.02.50"), vec!["1950-02-01"]);
        assert_eq!(expand_year(0), 2000);
        assert_eq!(expand_year(99), 1999);
    }

    #[test]
    fn three_digit_year_not_a_date() {
        assert!(extract_dates("01.02.202").is_empty());
    }

    #[test]
    fn invalid_dates_dropped() {
        assert!(extract_dates("31.02.2024").is_empty());
        assert!(extract_dates("31 апреля 2024").is_empty());
        assert!(extract_dates("2024-13-01").is_empty());
        assert!(extract_dates("00.00.0000").is_empty());
        assert_eq!(extract_dates("29.02.2024"), vec!["2024-02-29"]);
    }

    #[test]
    fn same_date_in_different_grammars_deduplicated() {
        let text = "15.03.2025 aka 2025-03-15 aka 15 марта 2025 aka 15/03/25";
        assert_eq!(extract_dates(text), vec!["2025-03-15"]);
    }

    #[test]
    fn order_follows_grammar_then_position() {
        assert_eq!(
            extract_dates("see 2025-04-01 and 15.03.2025"),
            vec!["2025-03-15", "2025-04-01"]
        );
        let text = "2 мая 2025, then 2025-04-01, 20.03.2025 and 10/03/2025";
        assert_eq!(
            extract_dates(text),
            vec!["2025-03-20", "2025-03-10", "2025-04-01", "2025-05-02"]
        );
    }

    #[test]
    fn text_comes_from_earliest_grammar() {
        let found = find_dates("2025-03-15 or 15.03.2025");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "15.03.2025");
    }

    #[test]
    fn keeps_first_original_text() {
        let found = find_dates("Оплата до 15.03.2025, см. также 2025-04-01");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text, "15.03.2025");
        assert_eq!(found[1].text, "2025-04-01");
    }

    #[test]
    fn no_dates_in_plain_text() {
        assert!(extract_dates("").is_empty());
        assert!(extract_dates("version 1.2.3, call 555-1234").is_empty());
    }

    #[test]
    fn digits_glued_to_words_ignored() {
        assert!(extract_dates("id123.04.2025x").is_empty());
    }
}
