//! Date, time, timezone and age values

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc};

const DAYS_PER_YEAR: u32 = 365;
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

/// Parses a DA value (`YYYYMMDD`), ignoring stray separators such as `.` or `-`
pub(crate) fn parse_date(text: &str) -> Result<NaiveDate, String> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 8 {
        return Err(format!("expected YYYYMMDD, got {text:?}"));
    }
    let year = digits[0..4].parse().map_err(|_| format!("bad year in {text:?}"))?;
    let month = digits[4..6].parse().map_err(|_| format!("bad month in {text:?}"))?;
    let day = digits[6..8].parse().map_err(|_| format!("bad day in {text:?}"))?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| format!("no such date {text:?}"))
}

/// Parses a TM value (`HH[MM[SS[.F{1,6}]]]`), ignoring `:` separators
pub(crate) fn parse_time(text: &str) -> Result<NaiveTime, String> {
    let (whole, fraction) = match text.trim().split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text.trim(), ""),
    };
    let whole: String = whole.chars().filter(|c| *c != ':').collect();
    if !whole.chars().all(|c| c.is_ascii_digit()) || !matches!(whole.len(), 2 | 4 | 6) {
        return Err(format!("expected HHMMSS, got {text:?}"));
    }
    let field = |range: std::ops::Range<usize>| -> u32 {
        whole.get(range).and_then(|s| s.parse().ok()).unwrap_or(0)
    };
    let (hour, minute, second) = (field(0..2), field(2..4), field(4..6));

    let fraction = fraction.trim();
    if fraction.len() > 6 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("bad fractional seconds in {text:?}"));
    }
    let micros = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<6}")
            .parse()
            .map_err(|_| format!("bad fractional seconds in {text:?}"))?
    };

    NaiveTime::from_hms_micro_opt(hour, minute, second, micros)
        .ok_or_else(|| format!("no such time {text:?}"))
}

/// Parses a timezone offset (`+HHMM` / `-HHMM`) into minutes east of UTC
pub(crate) fn parse_offset_minutes(text: &str) -> Result<i32, String> {
    let text = text.trim();
    let (sign, digits) = match text.as_bytes().first() {
        Some(b'+') => (1, &text[1..]),
        Some(b'-') => (-1, &text[1..]),
        _ => return Err(format!("expected ±HHMM, got {text:?}")),
    };
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("expected ±HHMM, got {text:?}"));
    }
    let hours: i32 = digits[0..2].parse().map_err(|_| format!("bad hours in {text:?}"))?;
    let minutes: i32 = digits[2..4].parse().map_err(|_| format!("bad minutes in {text:?}"))?;
    let total = hours * 60 + minutes;
    if minutes >= 60 || total > MAX_OFFSET_MINUTES {
        return Err(format!("offset out of range: {text:?}"));
    }
    Ok(sign * total)
}

/// Combines a date, an optional time and an offset into an absolute instant
pub(crate) fn to_instant(
    date: NaiveDate,
    time: Option<NaiveTime>,
    offset_minutes: i32,
) -> Result<DateTime<Utc>, String> {
    let offset = FixedOffset::east_opt(offset_minutes * 60)
        .ok_or_else(|| format!("offset out of range: {offset_minutes} minutes"))?;
    let time = match time {
        Some(time) => time,
        None => NaiveTime::from_hms_opt(0, 0, 0).ok_or("invalid midnight")?,
    };
    date.and_time(time)
        .and_local_timezone(offset)
        .single()
        .map(|instant| instant.with_timezone(&Utc))
        .ok_or_else(|| format!("ambiguous local time on {date}"))
}

/// Parses an AS value (`nnnD`, `nnnW`, `nnnM`, `nnnY`) into whole years
pub(crate) fn parse_age(text: &str) -> Result<u32, String> {
    let text = text.trim();
    if !text.is_ascii() {
        return Err(format!("expected nnn[DWMY], got {text:?}"));
    }
    let (count, unit) = text.split_at(text.len().saturating_sub(1));
    if count.is_empty() || count.len() > 3 || !count.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("expected nnn[DWMY], got {text:?}"));
    }
    let count: u32 = count.parse().map_err(|_| format!("bad age {text:?}"))?;
    match unit {
        "D" => Ok(count / DAYS_PER_YEAR),
        "W" => Ok(count * 7 / DAYS_PER_YEAR),
        "M" => Ok(count / 12),
        "Y" => Ok(count),
        _ => Err(format!("unknown age unit in {text:?}")),
    }
}

/// Whole years elapsed between `birth` and `reference`
pub(crate) fn age_between(birth: NaiveDate, reference: NaiveDate) -> u32 {
    let mut years = reference.year() - birth.year();
    if (reference.month(), reference.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).unwrap_or(0)
}
