//! Scalar cell values and canonical coercion.
//!
//! Every cell in a dataset is a [`Scalar`]: null, boolean, integer, float,
//! string, or date (canonically epoch milliseconds). Coercion into numbers,
//! text, and dates happens here and nowhere else, and is idempotent: feeding
//! a coerced value back through the same coercion yields the same result.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CellError, CellResult};

/// A single cell value in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Epoch milliseconds, UTC.
    Date(i64),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Null, or a string that is empty after trimming.
    pub fn is_missing(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::Str(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Int(_) | Scalar::Float(_))
    }

    pub fn as_display(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Scalar::Str(s) => s.clone(),
            Scalar::Date(ms) => format_epoch_ms(*ms),
        }
    }

    /// Total order used for sort keys: null lowest, then booleans, numbers,
    /// dates, strings. Integers and floats compare by numeric value.
    pub fn cmp_sort(&self, other: &Scalar) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Scalar::Null, Scalar::Null) => Ordering::Equal,
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Float(b)) => (*a as f64).total_cmp(b),
            (Scalar::Float(a), Scalar::Int(b)) => a.total_cmp(&(*b as f64)),
            (Scalar::Float(a), Scalar::Float(b)) => a.total_cmp(b),
            (Scalar::Date(a), Scalar::Date(b)) => a.cmp(b),
            (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Bool(_) => 1,
            Scalar::Int(_) | Scalar::Float(_) => 2,
            Scalar::Date(_) => 3,
            Scalar::Str(_) => 4,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Characters stripped before numeric parsing: separators, currency symbols,
/// percent signs.
const NUMERIC_NOISE: &[char] = &[',', '$', '€', '£', '¥', '₹', '%'];

/// Coerces any scalar into a finite number.
///
/// Null and empty strings become 0; booleans map to 0/1; dates yield their
/// epoch milliseconds; strings are parsed after stripping currency symbols,
/// thousands separators, percent signs, and whitespace, falling back to 0.
pub fn to_number(value: &Scalar) -> f64 {
    let n = match value {
        Scalar::Null => 0.0,
        Scalar::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Scalar::Int(i) => *i as f64,
        Scalar::Float(f) => {
            if f.is_nan() {
                0.0
            } else {
                *f
            }
        }
        Scalar::Str(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !NUMERIC_NOISE.contains(c) && !c.is_whitespace())
                .collect();
            cleaned.parse::<f64>().unwrap_or(0.0)
        }
        Scalar::Date(ms) => *ms as f64,
    };
    if n.is_finite() { n } else { 0.0 }
}

/// Coerces any scalar into its natural textual form. Null becomes the empty
/// string; dates format as `YYYY-MM-DD` (midnight) or `YYYY-MM-DD HH:MM:SS`.
pub fn to_text(value: &Scalar) -> String {
    value.as_display()
}

/// Coerces a scalar into canonical epoch milliseconds.
///
/// Numbers are epoch values (milliseconds when the magnitude is at least
/// 10^11, seconds below that). Strings go through the date grammar in
/// [`parse_date_text`]. Anything else is a [`CellError::BadDate`].
pub fn to_epoch_ms(value: &Scalar) -> CellResult<i64> {
    match value {
        Scalar::Date(ms) => Ok(*ms),
        Scalar::Int(i) => Ok(epoch_from_number(*i as f64)),
        Scalar::Float(f) if f.is_finite() => Ok(epoch_from_number(*f)),
        Scalar::Str(s) => {
            parse_date_text(s).ok_or_else(|| CellError::BadDate(s.trim().to_string()))
        }
        other => Err(CellError::BadDate(other.as_display())),
    }
}

fn epoch_from_number(n: f64) -> i64 {
    if n.abs() >= 1e11 {
        n as i64
    } else {
        (n * 1000.0) as i64
    }
}

/// Formats epoch milliseconds as `YYYY-MM-DD` when the time component is
/// midnight, otherwise `YYYY-MM-DD HH:MM:SS`.
pub fn format_epoch_ms(ms: i64) -> String {
    let dt = epoch_ms_to_datetime(ms);
    if dt.time() == chrono::NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

pub fn epoch_ms_to_datetime(ms: i64) -> NaiveDateTime {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

pub fn datetime_to_epoch_ms(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_millis()
}

/// Parses date-ish text into epoch milliseconds.
///
/// Accepted shapes, each optionally suffixed with ` HH:MM[:SS]`:
/// `YYYY-MM-DD` (also with a `T` separator), `DD-MM-YYYY`, `MM/DD/YYYY`.
/// Two-digit years are offset by +2000. Anything else falls back to a
/// generic chrono format sweep.
pub fn parse_date_text(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (date_part, time_part) = split_date_time(trimmed);
    if let Some(date) = parse_date_component(date_part) {
        let time = match time_part {
            Some(t) => parse_time_component(t)?,
            None => chrono::NaiveTime::MIN,
        };
        return Some(datetime_to_epoch_ms(date.and_time(time)));
    }

    generic_date_fallback(trimmed)
}

fn split_date_time(value: &str) -> (&str, Option<&str>) {
    match value.find(['T', ' ']) {
        Some(idx) => {
            let (date, rest) = value.split_at(idx);
            let rest = &rest[1..];
            if rest.is_empty() {
                (date, None)
            } else {
                (date, Some(rest))
            }
        }
        None => (value, None),
    }
}

fn parse_time_component(value: &str) -> Option<chrono::NaiveTime> {
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(parsed) = chrono::NaiveTime::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    None
}

fn parse_date_component(value: &str) -> Option<NaiveDate> {
    let dash: Vec<&str> = value.split('-').collect();
    if dash.len() == 3 {
        // A leading 4-digit field reads year-first, otherwise day-first.
        if dash[0].len() == 4 {
            return build_date(dash[0], dash[1], dash[2]);
        }
        return build_date(dash[2], dash[1], dash[0]);
    }
    let slash: Vec<&str> = value.split('/').collect();
    if slash.len() == 3 {
        if slash[0].len() == 4 {
            return build_date(slash[0], slash[1], slash[2]);
        }
        // Slash-separated dates read month-first.
        return build_date(slash[2], slash[0], slash[1]);
    }
    None
}

fn build_date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let mut year: i32 = year.parse().ok()?;
    if year < 100 {
        year += 2000;
    }
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn generic_date_fallback(value: &str) -> Option<i64> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y%m%d %H:%M:%S",
        "%d %b %Y %H:%M:%S",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(datetime_to_epoch_ms(parsed));
        }
    }
    const DATE_FORMATS: &[&str] = &["%Y%m%d", "%d %b %Y", "%b %d, %Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Some(datetime_to_epoch_ms(parsed.and_time(chrono::NaiveTime::MIN)));
        }
    }
    None
}

/// Infers a scalar from a raw CSV cell. Empty cells become null; integer and
/// float literals parse to numbers; `true`/`false` to booleans; everything
/// else stays a string. Date recognition is deferred to the transformation
/// and sort-key layers so raw text survives untouched.
pub fn parse_cell(raw: &str) -> Scalar {
    if raw.is_empty() {
        return Scalar::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Scalar::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Scalar::Float(f);
        }
    }
    match raw {
        "true" | "TRUE" | "True" => Scalar::Bool(true),
        "false" | "FALSE" | "False" => Scalar::Bool(false),
        _ => Scalar::Str(raw.to_string()),
    }
}
