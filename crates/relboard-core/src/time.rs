//! Time ranges and date math
//!
//! Dashboards carry their time range as the raw expressions the user picked
//! (`now-15m`, `now/d`, an ISO timestamp, ...). Expressions are resolved
//! against an explicit `now` so that resolution stays deterministic.

use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    Quick,
    Relative,
    Absolute,
}

impl TimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeMode::Quick => "quick",
            TimeMode::Relative => "relative",
            TimeMode::Absolute => "absolute",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "quick" => Some(TimeMode::Quick),
            "relative" => Some(TimeMode::Relative),
            "absolute" => Some(TimeMode::Absolute),
            _ => None,
        }
    }
}

/// Time range as picked in the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TimeMode>,
    pub from: String,
    pub to: String,
}

impl TimeRange {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            mode: None,
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn with_mode(mut self, mode: TimeMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Resolve both ends. `to` rounds up so `now/d` covers the whole day.
    pub fn bounds(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let from = parse_date_math(&self.from, now, false)?;
        let to = parse_date_math(&self.to, now, true)?;
        if from > to {
            return Err(CoreError::invalid_time(
                &format!("{} .. {}", self.from, self.to),
                "range start is after range end",
            ));
        }
        Ok((from, to))
    }

    /// Range query on `field` covering this time range, in epoch millis.
    pub fn to_query(&self, field: &str, now: DateTime<Utc>) -> Result<Value> {
        let (from, to) = self.bounds(now)?;
        Ok(range_query(field, from, to))
    }
}

/// Range query over `[from, to]` on `field`.
pub fn range_query(field: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Value {
    json!({
        "range": {
            field: {
                "gte": from.timestamp_millis(),
                "lte": to.timestamp_millis(),
                "format": "epoch_millis"
            }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl TimeUnit {
    fn from_char(c: char) -> std::result::Result<Self, String> {
        match c {
            'y' => Ok(TimeUnit::Year),
            'M' => Ok(TimeUnit::Month),
            'w' => Ok(TimeUnit::Week),
            'd' => Ok(TimeUnit::Day),
            'h' | 'H' => Ok(TimeUnit::Hour),
            'm' => Ok(TimeUnit::Minute),
            's' => Ok(TimeUnit::Second),
            other => Err(format!("unknown time unit '{}'", other)),
        }
    }
}

/// Parse a date math expression such as `now-7d/d`, `2024-01-01||+1M` or an
/// absolute timestamp (RFC 3339, `YYYY-MM-DD` or epoch millis).
///
/// `round_up` makes rounding (`/unit`) land on the last millisecond of the
/// unit instead of its first.
pub fn parse_date_math(input: &str, now: DateTime<Utc>, round_up: bool) -> Result<DateTime<Utc>> {
    let text = input.trim();
    if text.is_empty() {
        return Err(CoreError::invalid_time(input, "empty expression"));
    }

    let (anchor, math) = if let Some(rest) = text.strip_prefix("now") {
        (now, rest)
    } else if let Some((anchor, rest)) = text.split_once("||") {
        let anchor = parse_absolute(anchor)
            .ok_or_else(|| CoreError::invalid_time(input, "unparseable anchor date"))?;
        (anchor, rest)
    } else {
        return parse_absolute(text)
            .ok_or_else(|| CoreError::invalid_time(input, "not a date or date math expression"));
    };

    apply_math(anchor, math, round_up).map_err(|reason| CoreError::invalid_time(input, reason))
}

fn parse_absolute(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        return text
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn apply_math(
    mut at: DateTime<Utc>,
    math: &str,
    round_up: bool,
) -> std::result::Result<DateTime<Utc>, String> {
    let mut chars = math.chars().peekable();
    while let Some(op) = chars.next() {
        match op {
            '/' => {
                let unit = chars.next().ok_or("missing rounding unit")?;
                let unit = TimeUnit::from_char(unit)?;
                at = if round_up {
                    ceil(at, unit)
                } else {
                    floor(at, unit)
                }
                .ok_or("rounding out of range")?;
            }
            '+' | '-' => {
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    digits.push(c);
                    chars.next();
                }
                let amount: i64 = if digits.is_empty() {
                    1
                } else {
                    digits
                        .parse()
                        .map_err(|e| format!("bad amount '{}': {}", digits, e))?
                };
                let unit = chars.next().ok_or("missing unit after amount")?;
                let unit = TimeUnit::from_char(unit)?;
                let amount = if op == '-' { -amount } else { amount };
                at = shift(at, unit, amount).ok_or("date arithmetic out of range")?;
            }
            other => return Err(format!("unexpected '{}'", other)),
        }
    }
    Ok(at)
}

pub(crate) fn shift(at: DateTime<Utc>, unit: TimeUnit, amount: i64) -> Option<DateTime<Utc>> {
    let months = match unit {
        TimeUnit::Year => Some(amount.checked_mul(12)?),
        TimeUnit::Month => Some(amount),
        _ => None,
    };
    if let Some(months) = months {
        let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
        return if months >= 0 {
            at.checked_add_months(magnitude)
        } else {
            at.checked_sub_months(magnitude)
        };
    }

    let delta = match unit {
        TimeUnit::Week => TimeDelta::try_weeks(amount)?,
        TimeUnit::Day => TimeDelta::try_days(amount)?,
        TimeUnit::Hour => TimeDelta::try_hours(amount)?,
        TimeUnit::Minute => TimeDelta::try_minutes(amount)?,
        TimeUnit::Second => TimeDelta::try_seconds(amount)?,
        TimeUnit::Year | TimeUnit::Month => return None,
    };
    at.checked_add_signed(delta)
}

pub(crate) fn floor(at: DateTime<Utc>, unit: TimeUnit) -> Option<DateTime<Utc>> {
    let date = at.date_naive();
    let naive = match unit {
        TimeUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0)?,
        TimeUnit::Month => {
            NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_hms_opt(0, 0, 0)?
        }
        TimeUnit::Week => {
            let back = u64::from(date.weekday().num_days_from_monday());
            date.checked_sub_days(Days::new(back))?
                .and_hms_opt(0, 0, 0)?
        }
        TimeUnit::Day => date.and_hms_opt(0, 0, 0)?,
        TimeUnit::Hour => date.and_hms_opt(at.hour(), 0, 0)?,
        TimeUnit::Minute => date.and_hms_opt(at.hour(), at.minute(), 0)?,
        TimeUnit::Second => date.and_hms_opt(at.hour(), at.minute(), at.second())?,
    };
    Some(naive.and_utc())
}

fn ceil(at: DateTime<Utc>, unit: TimeUnit) -> Option<DateTime<Utc>> {
    let start = floor(at, unit)?;
    let next = shift(start, unit, 1)?;
    next.checked_sub_signed(TimeDelta::try_milliseconds(1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).unwrap()
    }

    #[test]
    fn test_now_and_offsets() {
        assert_eq!(parse_date_math("now", now(), false).unwrap(), now());
        assert_eq!(
            parse_date_math("now-15m", now(), false).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 14, 14, 54, 26).unwrap()
        );
        assert_eq!(
            parse_date_math("now+1M", now(), false).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 14, 15, 9, 26).unwrap()
        );
        assert_eq!(
            parse_date_math("now-5y", now(), false).unwrap(),
            Utc.with_ymd_and_hms(2019, 3, 14, 15, 9, 26).unwrap()
        );
    }

    #[test]
    fn test_rounding() {
        assert_eq!(
            parse_date_math("now/d", now(), false).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap()
        );
        let end_of_day = parse_date_math("now/d", now(), true).unwrap();
        assert_eq!(
            end_of_day.timestamp_millis(),
            Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0)
                .unwrap()
                .timestamp_millis()
                - 1
        );
        // 2024-03-14 is a Thursday
        assert_eq!(
            parse_date_math("now/w", now(), false).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date_math("now-1M/M", now(), false).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_absolute_forms() {
        let expected = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            parse_date_math("2023-06-01T12:00:00.000Z", now(), false).unwrap(),
            expected
        );
        assert_eq!(
            parse_date_math(&expected.timestamp_millis().to_string(), now(), false).unwrap(),
            expected
        );
        assert_eq!(
            parse_date_math("2023-06-01||+12h", now(), false).unwrap(),
            expected
        );
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(parse_date_math("", now(), false).is_err());
        assert!(parse_date_math("yesterday", now(), false).is_err());
        assert!(parse_date_math("now-3q", now(), false).is_err());
        assert!(parse_date_math("now/", now(), false).is_err());
    }

    #[test]
    fn test_range_query() {
        let range = TimeRange::new("now-1h", "now");
        let query = range.to_query("@timestamp", now()).unwrap();
        let bounds = &query["range"]["@timestamp"];
        assert_eq!(
            bounds["lte"].as_i64().unwrap() - bounds["gte"].as_i64().unwrap(),
            3_600_000
        );
        assert_eq!(bounds["format"], "epoch_millis");

        let inverted = TimeRange::new("now", "now-1d");
        assert!(inverted.bounds(now()).is_err());
    }
}
