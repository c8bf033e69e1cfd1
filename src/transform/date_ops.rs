use std::str::FromStr;

use chrono::{Offset, TimeZone};
use chrono_tz::Tz;

use crate::{
    data::{Scalar, datetime_to_epoch_ms, epoch_ms_to_datetime, to_epoch_ms},
    error::{CellError, CellResult},
};

/// Named output formats understood by `format_date`. Anything else falls
/// back to ISO-8601.
const OUTPUT_FORMATS: &[(&str, &str)] = &[
    ("YYYY-MM-DD", "%Y-%m-%d"),
    ("MM/DD/YYYY", "%m/%d/%Y"),
    ("DD/MM/YYYY", "%d/%m/%Y"),
    ("YYYY-MM-DD HH:mm:ss", "%Y-%m-%d %H:%M:%S"),
    ("DD-MM-YYYY HH:mm", "%d-%m-%Y %H:%M"),
    ("MM-DD-YYYY HH:mm", "%m-%d-%Y %H:%M"),
];

/// Input formats accepted by `cast_to_date` when the caller pins one instead
/// of using auto detection.
const INPUT_FORMATS: &[(&str, &str)] = &[
    ("YYYY-MM-DD", "%Y-%m-%d"),
    ("DD-MM-YYYY", "%d-%m-%Y"),
    ("MM/DD/YYYY", "%m/%d/%Y"),
    ("DD/MM/YYYY", "%d/%m/%Y"),
    ("YYYY-MM-DD HH:mm:ss", "%Y-%m-%d %H:%M:%S"),
];

pub fn known_input_format(name: &str) -> bool {
    name.eq_ignore_ascii_case("auto") || INPUT_FORMATS.iter().any(|(n, _)| *n == name)
}

/// Casts a scalar to a canonical date.
///
/// With `input_format = "auto"` the full grammar from
/// [`crate::data::parse_date_text`] applies. A pinned format parses with that pattern only; `strict` then
/// also requires the reformatted date to reproduce the original text, which
/// rejects under-padded or rolled-over components.
pub fn cast_to_date(value: &Scalar, input_format: &str, strict: bool) -> CellResult<Scalar> {
    if value.is_missing() {
        return Err(CellError::BadDate(String::new()));
    }
    if input_format.eq_ignore_ascii_case("auto") {
        return to_epoch_ms(value).map(Scalar::Date);
    }
    let pattern = INPUT_FORMATS
        .iter()
        .find(|(name, _)| *name == input_format)
        .map(|(_, pattern)| *pattern)
        .ok_or_else(|| CellError::TypeError(format!("unknown date format '{input_format}'")))?;
    let text = value.as_display();
    let trimmed = text.trim();
    let ms = parse_with_pattern(trimmed, pattern)
        .ok_or_else(|| CellError::BadDate(trimmed.to_string()))?;

    if strict {
        let rendered = epoch_ms_to_datetime(ms).format(pattern).to_string();
        if rendered != trimmed {
            return Err(CellError::BadDate(trimmed.to_string()));
        }
    }

    Ok(Scalar::Date(ms))
}

fn parse_with_pattern(text: &str, pattern: &str) -> Option<i64> {
    if pattern.contains("%H") {
        chrono::NaiveDateTime::parse_from_str(text, pattern)
            .ok()
            .map(datetime_to_epoch_ms)
    } else {
        chrono::NaiveDate::parse_from_str(text, pattern)
            .ok()
            .map(|d| datetime_to_epoch_ms(d.and_time(chrono::NaiveTime::MIN)))
    }
}

/// Formats a date scalar per a named output format, ISO-8601 otherwise.
pub fn format_date(value: &Scalar, output_format: &str) -> CellResult<Scalar> {
    let ms = to_epoch_ms(value)?;
    let dt = epoch_ms_to_datetime(ms);
    let formatted = match OUTPUT_FORMATS
        .iter()
        .find(|(name, _)| *name == output_format)
    {
        Some((_, pattern)) => dt.format(pattern).to_string(),
        None => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
    };
    Ok(Scalar::Str(formatted))
}

/// Converts between named timezones.
///
/// The default preserves the absolute instant, which leaves the canonical
/// epoch value untouched once both zone names validate. With
/// `shift_wall_clock` the offset difference at that instant is applied
/// instead, for sources that recorded naive local times.
pub fn convert_timezone(
    value: &Scalar,
    from: &str,
    to: &str,
    shift_wall_clock: bool,
) -> CellResult<Scalar> {
    let from_tz = resolve_zone(from)?;
    let to_tz = resolve_zone(to)?;
    let ms = to_epoch_ms(value)?;
    if !shift_wall_clock || from == to {
        return Ok(Scalar::Date(ms));
    }
    let instant = chrono::Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        CellError::BadDate(format!("epoch {ms} out of range"))
    })?;
    let from_offset = from_tz
        .offset_from_utc_datetime(&instant.naive_utc())
        .fix()
        .local_minus_utc() as i64;
    let to_offset = to_tz
        .offset_from_utc_datetime(&instant.naive_utc())
        .fix()
        .local_minus_utc() as i64;
    Ok(Scalar::Date(ms + (to_offset - from_offset) * 1000))
}

pub fn resolve_zone(name: &str) -> CellResult<Tz> {
    Tz::from_str(name)
        .map_err(|_| CellError::TypeError(format!("unsupported timezone '{name}'")))
}
