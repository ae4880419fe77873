//! Best-effort parsing of free-text session times.
//!
//! Session times arrive as whatever a person typed into an email or form:
//! `"3:00PM-4:00PM"`, `"3pm to 4pm"`, `"15:00-16:00"`, `"9 to 11"`, a bare
//! `"2pm"`, or a placeholder dash. These functions turn that text into a
//! concrete [`Interval`] on a date.
//!
//! # Design Principle
//!
//! Unlike the matcher and reconciler, nothing here fails. Parsed times feed
//! display and candidate generation, so unparseable input degrades to a
//! fixed fallback interval and the result carries a [`Fallback`] flag that
//! callers may surface or ignore.
//!
//! # Meridiem heuristic
//!
//! A token without am/pm is resolved as follows, unless the caller supplies
//! an explicit default:
//!
//! - hours 7–11 ⇒ am
//! - hours 1–6 ⇒ pm
//! - 12 ⇒ pm (noon), 0 ⇒ 12am
//! - 13–23 ⇒ read as 24-hour clock
//!
//! # Functions
//!
//! - [`normalize_token`] — canonical `h:mmam`/`h:mmpm` token
//! - [`split_range`] — split range text on `-`, `to`, `–` or `—`
//! - [`parse_to_interval`] — date text + range text → [`ParsedInterval`]
//! - [`split_descriptor`] — `"18 March 2025 9:00AM - 10:00AM"` → date + range

use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::Interval;

// ── Tokens ──────────────────────────────────────────────────────────────────

/// Morning or afternoon half of a 12-hour clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Meridiem {
    Am,
    Pm,
}

impl Meridiem {
    fn as_str(self) -> &'static str {
        match self {
            Meridiem::Am => "am",
            Meridiem::Pm => "pm",
        }
    }

    /// Default meridiem for a bare 12-hour clock hour (1–12).
    fn for_bare_hour(hour: u32) -> Meridiem {
        match hour {
            7..=11 => Meridiem::Am,
            _ => Meridiem::Pm,
        }
    }
}

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?:[:.](\d{2}))?(?::\d{2})?\s*(a\.?m\.?|p\.?m\.?)?$")
        .expect("static token pattern")
});

/// A time token split into its components, before meridiem resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawToken {
    hour: u32,
    minute: u32,
    meridiem: Option<Meridiem>,
}

fn scan_token(token: &str) -> Option<RawToken> {
    let lower = token.trim().to_lowercase();
    let caps = TOKEN_RE.captures(&lower)?;
    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps
        .get(2)
        .map(|m| m.as_str().parse())
        .transpose()
        .ok()?
        .unwrap_or(0);
    let meridiem = caps.get(3).map(|m| {
        if m.as_str().starts_with('a') {
            Meridiem::Am
        } else {
            Meridiem::Pm
        }
    });
    if minute > 59 || hour > 23 || (meridiem.is_some() && !(1..=12).contains(&hour)) {
        return None;
    }
    Some(RawToken {
        hour,
        minute,
        meridiem,
    })
}

impl RawToken {
    /// Resolve to a wall-clock time, using `default` when no meridiem was
    /// written and the hour is ambiguous.
    fn resolve(self, default: Option<Meridiem>) -> NaiveTime {
        let hour24 = match (self.hour, self.meridiem) {
            (12, Some(Meridiem::Am)) => 0,
            (12, Some(Meridiem::Pm)) => 12,
            (h, Some(Meridiem::Am)) => h,
            (h, Some(Meridiem::Pm)) => h + 12,
            (0, None) => 0,
            (h, None) if h >= 13 => h,
            (h, None) => match default.unwrap_or_else(|| Meridiem::for_bare_hour(h)) {
                Meridiem::Am if h == 12 => 0,
                Meridiem::Am => h,
                Meridiem::Pm if h == 12 => 12,
                Meridiem::Pm => h + 12,
            },
        };
        // hour24 < 24 and minute < 60 are guaranteed by scan_token
        NaiveTime::from_hms_opt(hour24, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

/// Render a wall-clock time as a canonical 12-hour token, e.g. `"3:00pm"`.
pub fn canonical_token(time: NaiveTime) -> String {
    let (is_pm, hour12) = time.hour12();
    let meridiem = if is_pm { Meridiem::Pm } else { Meridiem::Am };
    format!("{}:{:02}{}", hour12, time.minute(), meridiem.as_str())
}

/// Normalize a single time token to canonical 12-hour form.
///
/// Appends a meridiem when the token has none: `default_meridiem` if given,
/// otherwise the 7–11 ⇒ am / 1–6 ⇒ pm heuristic. Tokens already carrying a
/// meridiem, and 24-hour tokens (13–23), are canonicalised as written.
///
/// Returns `None` for text that is not a time at all.
///
/// # Examples
///
/// ```
/// use timetable_engine::timeparse::{normalize_token, Meridiem};
///
/// assert_eq!(normalize_token("9", None).as_deref(), Some("9:00am"));
/// assert_eq!(normalize_token("3", None).as_deref(), Some("3:00pm"));
/// assert_eq!(normalize_token("9", Some(Meridiem::Pm)).as_deref(), Some("9:00pm"));
/// assert_eq!(normalize_token("15:30", None).as_deref(), Some("3:30pm"));
/// assert_eq!(normalize_token("3:00PM", None).as_deref(), Some("3:00pm"));
/// ```
pub fn normalize_token(token: &str, default_meridiem: Option<Meridiem>) -> Option<String> {
    parse_token(token, default_meridiem).map(canonical_token)
}

/// Parse a single time token to a wall-clock time (see [`normalize_token`]).
pub fn parse_token(token: &str, default_meridiem: Option<Meridiem>) -> Option<NaiveTime> {
    scan_token(token).map(|raw| raw.resolve(default_meridiem))
}

// ── Ranges ──────────────────────────────────────────────────────────────────

static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:-|–|—|\bto\b)\s*").expect("static separator pattern"));

/// The two sides of a time range; `end` is absent for a bare single time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeParts<'a> {
    pub start: &'a str,
    pub end: Option<&'a str>,
}

/// Split range text on the first `-`, `to`, en dash or em dash.
///
/// Returns `None` for empty text or a lone placeholder dash. Text without a
/// separator is a single start time (`end: None`); the caller synthesizes an
/// end one hour later.
///
/// # Examples
///
/// ```
/// use timetable_engine::timeparse::split_range;
///
/// let parts = split_range("3pm to 4pm").unwrap();
/// assert_eq!((parts.start, parts.end), ("3pm", Some("4pm")));
///
/// let parts = split_range("2pm").unwrap();
/// assert_eq!((parts.start, parts.end), ("2pm", None));
///
/// assert!(split_range(" – ").is_none());
/// ```
pub fn split_range(text: &str) -> Option<RangeParts<'_>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match SEPARATOR_RE.find(text) {
        Some(sep) => {
            let start = text[..sep.start()].trim();
            let end = text[sep.end()..].trim();
            if start.is_empty() {
                return None;
            }
            Some(RangeParts {
                start,
                end: (!end.is_empty()).then_some(end),
            })
        }
        None => Some(RangeParts {
            start: text,
            end: None,
        }),
    }
}

/// Parse range text into start and end wall-clock times, without a date.
///
/// When only the end token carries a meridiem, it is tried for the start
/// first and kept only if that puts the start before the end.
pub fn parse_range(text: &str) -> Option<(NaiveTime, NaiveTime)> {
    let parts = split_range(text)?;
    let start_raw = scan_token(parts.start)?;
    let Some(end_text) = parts.end else {
        let start = start_raw.resolve(None);
        return Some((start, start + Duration::hours(1)));
    };
    let end_raw = scan_token(end_text)?;
    let end = end_raw.resolve(None);

    let start = match (start_raw.meridiem, end_raw.meridiem) {
        (None, Some(inherited)) => {
            let candidate = start_raw.resolve(Some(inherited));
            if candidate < end {
                candidate
            } else {
                start_raw.resolve(None)
            }
        }
        _ => start_raw.resolve(None),
    };
    Some((start, end))
}

// ── Dates ───────────────────────────────────────────────────────────────────

const DATE_LAYOUTS: &[&str] = &[
    "%d %B %Y",     // 18 March 2025
    "%d %b %Y",     // 18 Mar 2025
    "%A, %d %B %Y", // Tuesday, 18 March 2025
    "%A %d %B %Y",  // Tuesday 18 March 2025
    "%Y-%m-%d",     // 2025-03-18
    "%d/%m/%Y",     // 18/03/2025
    "%B %d, %Y",    // March 18, 2025
];

/// Parse a calendar date in any accepted layout.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDate::parse_from_str(text, layout).ok())
        .or_else(|| {
            // ISO datetime: keep the date part
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

static DESCRIPTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[a-z]+,?\s+)?(\d{1,2}\s+[a-z]+\s+\d{4}|\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})[\s,]+(?:at\s+)?(.+?)\s*$",
    )
    .expect("static descriptor pattern")
});

/// Split a session descriptor such as `"18 March 2025 9:00AM - 10:00AM"`
/// into its date text and range text.
pub fn split_descriptor(text: &str) -> Option<(&str, &str)> {
    let caps = DESCRIPTOR_RE.captures(text)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

// ── Intervals ───────────────────────────────────────────────────────────────

/// Why a parse fell back to the default interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Range text was empty or a placeholder dash.
    Empty,
    /// Date text matched no accepted layout.
    UnparseableDate,
    /// Range text was present but not a time.
    UnparseableTime,
    /// End did not come after start.
    Inverted,
}

/// Default interval used when parsing falls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackTimes {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for FallbackTimes {
    fn default() -> Self {
        FallbackTimes {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// Result of [`parse_to_interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParsedInterval {
    pub interval: Interval,
    /// Set when any part of the input was defaulted.
    pub fallback: Option<Fallback>,
}

impl ParsedInterval {
    pub fn used_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Combine date text and range text into an interval. Never fails.
///
/// Uses the default 09:00–10:00 fallback; see [`parse_to_interval_with`].
///
/// # Examples
///
/// ```
/// use timetable_engine::timeparse::{parse_to_interval, Fallback};
///
/// let parsed = parse_to_interval("18 March 2025", "9 to 11");
/// assert!(!parsed.used_fallback());
/// assert_eq!(parsed.interval.to_string(), "18 March 2025 9:00AM - 11:00AM");
///
/// let parsed = parse_to_interval("18 March 2025", "-");
/// assert_eq!(parsed.fallback, Some(Fallback::Empty));
/// assert_eq!(parsed.interval.to_string(), "18 March 2025 9:00AM - 10:00AM");
/// ```
pub fn parse_to_interval(date_text: &str, range_text: &str) -> ParsedInterval {
    parse_to_interval_with(date_text, range_text, FallbackTimes::default())
}

/// [`parse_to_interval`] with configurable fallback times.
///
/// An unparseable date falls back to 1970-01-01 so that the result is still
/// a well-formed interval; callers that need a real date must check
/// [`ParsedInterval::fallback`].
pub fn parse_to_interval_with(
    date_text: &str,
    range_text: &str,
    fallback: FallbackTimes,
) -> ParsedInterval {
    match parse_date(date_text) {
        Some(date) => interval_on_with(date, range_text, fallback),
        None => {
            debug!(date_text, "unparseable session date, using fallback");
            let epoch = chrono::DateTime::UNIX_EPOCH.date_naive();
            let mut parsed = interval_on_with(epoch, range_text, fallback);
            parsed.fallback = Some(Fallback::UnparseableDate);
            parsed
        }
    }
}

/// Parse range text onto a known date. Never fails.
pub fn interval_on(date: NaiveDate, range_text: &str) -> ParsedInterval {
    interval_on_with(date, range_text, FallbackTimes::default())
}

/// [`interval_on`] with configurable fallback times.
pub fn interval_on_with(
    date: NaiveDate,
    range_text: &str,
    fallback: FallbackTimes,
) -> ParsedInterval {
    let outcome = match split_range(range_text) {
        None => Err(Fallback::Empty),
        Some(parts) => match parse_range(range_text) {
            None => Err(Fallback::UnparseableTime),
            Some((start, end)) => {
                let end = combine_end(date, start, end, parts.end.is_none());
                Interval::new(date.and_time(start), end).map_err(|_| Fallback::Inverted)
            }
        },
    };

    match outcome {
        Ok(interval) => ParsedInterval {
            interval,
            fallback: None,
        },
        Err(reason) => {
            debug!(range_text, ?reason, "session time fell back to default");
            ParsedInterval {
                interval: fallback_interval(date, fallback),
                fallback: Some(reason),
            }
        }
    }
}

/// Synthesized ends past midnight (e.g. a bare `11pm`) roll onto the next
/// day; explicit ranges stay on the given date.
fn combine_end(date: NaiveDate, start: NaiveTime, end: NaiveTime, synthesized: bool) -> NaiveDateTime {
    if synthesized && end < start {
        (date + Duration::days(1)).and_time(end)
    } else {
        date.and_time(end)
    }
}

fn fallback_interval(date: NaiveDate, fallback: FallbackTimes) -> Interval {
    let start = date.and_time(fallback.start);
    // A misconfigured fallback degrades to one hour; config validation
    // normally prevents it.
    Interval::new(start, date.and_time(fallback.end)).unwrap_or_else(|_| Interval::hour_from(start))
}

/// Display form of a stored original interval: `DD/MM/YYYY at h:mmAM`.
///
/// Returns `"Not available"` when no original time was recorded.
pub fn format_original_time(original: Option<&Interval>) -> String {
    match original {
        Some(interval) => interval
            .start()
            .format("%d/%m/%Y at %-I:%M%p")
            .to_string(),
        None => "Not available".to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
