//! Deterministic date/time resolution against a reference clock.
//!
//! All values are naive local wall-clock times. Patterns are compiled once
//! and are case-insensitive, so they run on the raw utterance.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

static RELATIVE_OFFSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bin\s+(\d+|an?|one|two|three|four|five|six|seven|eight|nine|ten|fifteen|twenty|thirty|half\s+an?)\s+(minutes?|mins?|hours?|hrs?|days?|weeks?)\b",
    )
    .unwrap()
});
static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").unwrap());
static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}}))?"
    ))
    .unwrap()
});
static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\b(?:,?\s+(\d{{4}}))?"
    ))
    .unwrap()
});
static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2}|\d{4}))?\b").unwrap());
static RELATIVE_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(the\s+day\s+after\s+tomorrow|day\s+after\s+tomorrow|tomorrow|today|tonight|next\s+week)\b")
        .unwrap()
});
static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:(next|this|on)\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)s?\b",
    )
    .unwrap()
});
static TIME_12H: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:at\s+)?(\d{1,2})(?::([0-5]\d))?\s*(a\.m\.?|p\.m\.?|am\b|pm\b)").unwrap()
});
static TIME_24H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:at\s+)?([01]?\d|2[0-3]):([0-5]\d)\b").unwrap());
static NAMED_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:at\s+)?(noon|midday|midnight)\b").unwrap());
static AT_HOUR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bat\s+(\d{1,2})(?:\s+o'?clock)?(?:\s|$|[.,!?])").unwrap());
static DAY_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:this\s+|in\s+the\s+)?(morning|afternoon|evening|tonight|night)\b")
        .unwrap()
});

/// Every pattern that denotes a point in time, for stripping titles.
static TEMPORAL: Lazy<Vec<&'static Regex>> = Lazy::new(|| {
    vec![
        &*RELATIVE_OFFSET,
        &*ISO_DATE,
        &*MONTH_DAY,
        &*DAY_MONTH,
        &*NUMERIC_DATE,
        &*RELATIVE_DAY,
        &*WEEKDAY,
        &*TIME_12H,
        &*TIME_24H,
        &*NAMED_TIME,
        &*AT_HOUR,
        &*DAY_PART,
    ]
});

/// A resolved calendar day with an optional clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

impl Moment {
    pub fn datetime(&self) -> Option<NaiveDateTime> {
        self.time.map(|time| self.date.and_time(time))
    }
}

/// Resolves the first date and time expressions found in `text`.
///
/// - A relative offset ("in 20 minutes") wins outright.
/// - A time without a date lands today, or tomorrow if that time has passed.
/// - A month/day without a year lands in the next occurrence.
pub fn parse_moment(text: &str, now: NaiveDateTime) -> Option<Moment> {
    if let Some(resolved) = relative_offset(text, now) {
        return Some(Moment {
            date: resolved.date(),
            time: Some(resolved.time()),
        });
    }

    let today = now.date();
    let date = explicit_date(text, today)
        .or_else(|| relative_day(text, today))
        .or_else(|| weekday(text, today));
    let time = clock_time(text);

    match (date, time) {
        (None, None) => None,
        (Some(date), time) => Some(Moment { date, time }),
        (None, Some(time)) => {
            let date = if today.and_time(time) <= now {
                today.succ_opt().unwrap_or(today)
            } else {
                today
            };
            Some(Moment {
                date,
                time: Some(time),
            })
        }
    }
}

pub fn parse_datetime(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    parse_moment(text, now).and_then(|moment| moment.datetime())
}

/// `text` with every temporal expression removed and whitespace collapsed.
pub fn strip_temporal(text: &str) -> String {
    let mut stripped = text.to_owned();
    for pattern in TEMPORAL.iter() {
        stripped = pattern.replace_all(&stripped, " ").into_owned();
    }
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" ,", ",")
}

fn relative_offset(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let captures = RELATIVE_OFFSET.captures(text)?;
    let amount = captures.get(1)?.as_str().to_lowercase();
    let unit = captures.get(2)?.as_str().to_lowercase();

    let unit_minutes: i64 = if unit.starts_with("min") {
        1
    } else if unit.starts_with('h') {
        60
    } else if unit.starts_with('d') {
        24 * 60
    } else {
        7 * 24 * 60
    };
    let minutes = if amount.starts_with("half") {
        unit_minutes / 2
    } else {
        number_word(&amount)?.checked_mul(unit_minutes)?
    };
    let resolved = now.checked_add_signed(Duration::try_minutes(minutes)?)?;
    resolved.with_second(0)?.with_nanosecond(0)
}

fn number_word(word: &str) -> Option<i64> {
    let value = match word {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "fifteen" => 15,
        "twenty" => 20,
        "thirty" => 30,
        digits => digits.parse().ok()?,
    };
    Some(value)
}

fn explicit_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(captures) = ISO_DATE.captures(text) {
        let date = NaiveDate::from_ymd_opt(
            int(&captures, 1)?,
            u32::try_from(int(&captures, 2)?).ok()?,
            u32::try_from(int(&captures, 3)?).ok()?,
        );
        if date.is_some() {
            return date;
        }
    }

    if let Some(captures) = MONTH_DAY.captures(text) {
        let month = month_number(captures.get(1)?.as_str())?;
        let day = u32::try_from(int(&captures, 2)?).ok()?;
        if let Some(date) = calendar_date(today, month, day, int(&captures, 3)) {
            return Some(date);
        }
    }

    if let Some(captures) = DAY_MONTH.captures(text) {
        let day = u32::try_from(int(&captures, 1)?).ok()?;
        let month = month_number(captures.get(2)?.as_str())?;
        if let Some(date) = calendar_date(today, month, day, int(&captures, 3)) {
            return Some(date);
        }
    }

    let captures = NUMERIC_DATE.captures(text)?;
    let month = u32::try_from(int(&captures, 1)?).ok()?;
    let day = u32::try_from(int(&captures, 2)?).ok()?;
    let year = int(&captures, 3).map(|year| if year < 100 { year + 2000 } else { year });
    calendar_date(today, month, day, year)
}

/// Month/day in `year`, or the next occurrence on or after `today`.
fn calendar_date(today: NaiveDate, month: u32, day: u32, year: Option<i32>) -> Option<NaiveDate> {
    if let Some(year) = year {
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    match this_year {
        Some(date) if date >= today => Some(date),
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
    }
}

fn relative_day(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let captures = RELATIVE_DAY.captures(text)?;
    let phrase = captures.get(1)?.as_str().to_lowercase();
    let days = if phrase.contains("after") {
        2
    } else if phrase == "tomorrow" {
        1
    } else if phrase.starts_with("next") {
        7
    } else {
        0
    };
    today.checked_add_signed(Duration::days(days))
}

/// The coming occurrence of a weekday, never today.
fn weekday(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let captures = WEEKDAY.captures(text)?;
    let target = match captures.get(2)?.as_str().to_lowercase().as_str() {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        _ => Weekday::Sun,
    };
    let current = i64::from(today.weekday().num_days_from_monday());
    let wanted = i64::from(target.num_days_from_monday());
    let mut ahead = (wanted - current).rem_euclid(7);
    if ahead == 0 {
        ahead = 7;
    }
    today.checked_add_signed(Duration::days(ahead))
}

fn clock_time(text: &str) -> Option<NaiveTime> {
    if let Some(captures) = TIME_12H.captures(text) {
        let hour = u32::try_from(int(&captures, 1)?).ok()?;
        let minute = captures
            .get(2)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0);
        let is_pm = captures
            .get(3)
            .is_some_and(|m| m.as_str().to_lowercase().starts_with('p'));
        if (1..=12).contains(&hour) {
            let hour = match (hour, is_pm) {
                (12, false) => 0,
                (12, true) => 12,
                (hour, true) => hour + 12,
                (hour, false) => hour,
            };
            return NaiveTime::from_hms_opt(hour, minute, 0);
        }
    }

    if let Some(captures) = TIME_24H.captures(text) {
        let hour = u32::try_from(int(&captures, 1)?).ok()?;
        let minute = u32::try_from(int(&captures, 2)?).ok()?;
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    if let Some(captures) = NAMED_TIME.captures(text) {
        let hour = if captures.get(1)?.as_str().eq_ignore_ascii_case("midnight") {
            0
        } else {
            12
        };
        return NaiveTime::from_hms_opt(hour, 0, 0);
    }

    if let Some(captures) = AT_HOUR.captures(text) {
        let hour = u32::try_from(int(&captures, 1)?).ok()?;
        // a bare "at 3" means the afternoon, "at 9" the morning
        let hour = match hour {
            1..=7 => hour + 12,
            8..=23 => hour,
            _ => return None,
        };
        return NaiveTime::from_hms_opt(hour, 0, 0);
    }

    let captures = DAY_PART.captures(text)?;
    let hour = match captures.get(1)?.as_str().to_lowercase().as_str() {
        "morning" => 9,
        "afternoon" => 14,
        "evening" => 18,
        _ => 20,
    };
    NaiveTime::from_hms_opt(hour, 0, 0)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn int(captures: &Captures<'_>, index: usize) -> Option<i32> {
    captures.get(index)?.as_str().parse().ok()
}
