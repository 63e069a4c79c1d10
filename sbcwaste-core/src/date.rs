//! Conversion of the council's long-form dates into `YYYY-MM-DD`.

use chrono::{Month, NaiveDate, Weekday};

/// Format of the day/month/year tail, e.g. `7 May 2024`.
const DAY_MONTH_YEAR: &str = "%d %B %Y";
/// Canonical output format.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unrecognised collection date: {input:?}")]
/// A date string did not match `<Weekday>, <day> <Month> <year>`.
pub struct ParseDateError {
    /// The rejected text.
    pub input: String,
}

/// Parse `"Tuesday, 7 May 2024"` into `"2024-05-07"`.
///
/// Weekday and month must be spelled out in full, in any case. The weekday is
/// not checked against the date itself.
///
/// # Errors
///
/// Returns [`ParseDateError`] for any other shape of input.
pub fn parse_date(text: &str) -> Result<String, ParseDateError> {
    parse_naive(text)
        .map(|date| date.format(CANONICAL_FORMAT).to_string())
        .ok_or_else(|| ParseDateError {
            input: text.to_owned(),
        })
}

fn parse_naive(text: &str) -> Option<NaiveDate> {
    let (weekday, rest) = text.split_once(", ")?;
    if !is_full_weekday(weekday) {
        return None;
    }
    let month = rest.split(' ').nth(1)?;
    if !is_full_month(month) {
        return None;
    }
    NaiveDate::parse_from_str(rest, DAY_MONTH_YEAR).ok()
}

/// Full English weekday name, case-insensitive. Abbreviations are rejected.
fn is_full_weekday(name: &str) -> bool {
    name.parse::<Weekday>()
        .is_ok_and(|day| full_weekday_name(day).eq_ignore_ascii_case(name))
}

/// Full English month name, case-insensitive. Abbreviations are rejected.
fn is_full_month(name: &str) -> bool {
    name.parse::<Month>()
        .is_ok_and(|month| month.name().eq_ignore_ascii_case(name))
}

fn full_weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
