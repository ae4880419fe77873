//! Booking data model: intervals, sessions, practitioners and the inbound
//! notifications that drive reconciliation.
//!
//! All instants are local wall-clock [`NaiveDateTime`] values in the single
//! configured timezone (see [`crate::config::EngineConfig::timezone`]).

use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Stable identifier of a booked session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Mint a fresh random identifier for a newly committed session.
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Practitioner identifier (registration number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PractitionerId(pub String);

impl From<&str> for PractitionerId {
    fn from(s: &str) -> Self {
        PractitionerId(s.to_string())
    }
}

impl fmt::Display for PractitionerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a queued notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl From<&str> for NotificationId {
    fn from(s: &str) -> Self {
        NotificationId(s.to_string())
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Interval ────────────────────────────────────────────────────────────────

/// A half-open time interval `[start, end)` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

#[derive(Deserialize)]
struct RawInterval {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl TryFrom<RawInterval> for Interval {
    type Error = ScheduleError;

    fn try_from(raw: RawInterval) -> Result<Self> {
        Interval::new(raw.start, raw.end)
    }
}

impl Interval {
    /// Build an interval, rejecting empty or inverted ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidInterval`] unless `start < end`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if start < end {
            Ok(Interval { start, end })
        } else {
            Err(ScheduleError::InvalidInterval(format!(
                "start {start} is not before end {end}"
            )))
        }
    }

    /// One-hour interval beginning at `start`.
    pub fn hour_from(start: NaiveDateTime) -> Self {
        Interval {
            start,
            end: start + Duration::hours(1),
        }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// Calendar date of the start instant.
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open overlap: `self.start < other.end && self.end > other.start`.
    ///
    /// Touching intervals (one ends exactly when the other starts) do not
    /// overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Whether the interval has fully elapsed at `now`.
    pub fn has_ended(&self, now: NaiveDateTime) -> bool {
        self.end <= now
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start_date = self.start.date();
        write!(
            f,
            "{} {} - ",
            start_date.format("%-d %B %Y"),
            self.start.format("%-I:%M%p")
        )?;
        if self.end.date() != start_date {
            write!(f, "{} ", self.end.date().format("%-d %B %Y"))?;
        }
        write!(f, "{}", self.end.format("%-I:%M%p"))
    }
}

// ── DateRange ───────────────────────────────────────────────────────────────

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidInterval`] if `end` precedes `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(ScheduleError::InvalidInterval(format!(
                "date range ends ({end}) before it starts ({start})"
            )));
        }
        Ok(DateRange { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        DateRange {
            start: date,
            end: date,
        }
    }

    /// Smallest range containing every given date, `None` when empty.
    pub fn covering(dates: impl IntoIterator<Item = NaiveDate>) -> Option<Self> {
        let mut iter = dates.into_iter();
        let first = iter.next()?;
        let (start, end) = iter.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)));
        Some(DateRange { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every date in the range, ascending.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// `[start 00:00, (end + 1) 00:00)` as wall-clock bounds.
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        let lo = self.start.and_time(chrono::NaiveTime::MIN);
        let hi = (self.end + Duration::days(1)).and_time(chrono::NaiveTime::MIN);
        (lo, hi)
    }
}

/// A date closed to teaching across the institution, e.g. a public holiday
/// or an exam week, with the remark shown in its place.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockedDate {
    pub date: NaiveDate,
    #[serde(default)]
    pub remark: String,
}

// ── Sessions ────────────────────────────────────────────────────────────────

/// Who is being scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Practitioner {
    pub id: PractitionerId,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// How a session's timing has been altered since it was first booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    #[default]
    None,
    /// Moved to a different date or start time.
    Rescheduled,
    /// Same start, different length.
    Resized,
}

/// A committed, located, timed teaching session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    pub practitioner: Practitioner,
    pub interval: Interval,
    #[serde(default)]
    pub location: String,
    /// Free-text student group descriptor.
    #[serde(default)]
    pub students: String,
    #[serde(default)]
    pub change: ChangeStatus,
    #[serde(default)]
    pub original_time: Option<Interval>,
    #[serde(default)]
    pub change_reason: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
}

impl SessionRecord {
    pub fn date(&self) -> NaiveDate {
        self.interval.date()
    }

    pub fn practitioner_id(&self) -> &PractitionerId {
        &self.practitioner.id
    }

    /// Non-cancelled sessions take part in overlap checks.
    pub fn is_active(&self) -> bool {
        !self.cancelled
    }
}

/// Partial update applied by [`crate::index::SessionIndex::update`].
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub interval: Option<Interval>,
    pub location: Option<String>,
    pub students: Option<String>,
    pub change: Option<ChangeStatus>,
    pub original_time: Option<Interval>,
    pub change_reason: Option<String>,
    pub cancelled: Option<bool>,
}

impl SessionPatch {
    pub(crate) fn apply_to(self, record: &mut SessionRecord) {
        if let Some(title) = self.title {
            record.title = title;
        }
        if let Some(interval) = self.interval {
            record.interval = interval;
        }
        if let Some(location) = self.location {
            record.location = location;
        }
        if let Some(students) = self.students {
            record.students = students;
        }
        if let Some(change) = self.change {
            record.change = change;
        }
        if let Some(original) = self.original_time {
            record.original_time = Some(original);
        }
        if let Some(reason) = self.change_reason {
            record.change_reason = Some(reason);
        }
        if let Some(cancelled) = self.cancelled {
            record.cancelled = cancelled;
        }
    }
}

// ── Notifications ───────────────────────────────────────────────────────────

/// A candidate `(date, time)` pair offered before commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub date: NaiveDate,
    pub time: SlotTime,
}

impl AvailabilitySlot {
    pub fn text(date: NaiveDate, time: impl Into<String>) -> Self {
        AvailabilitySlot {
            date,
            time: SlotTime::Text(time.into()),
        }
    }
}

/// Either raw free text or an already-parsed range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotTime {
    Text(String),
    Range {
        start: chrono::NaiveTime,
        end: chrono::NaiveTime,
    },
}

/// Offer to run a session: `required_slots` slots must be chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub title: String,
    pub practitioner: Practitioner,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub students: String,
    pub required_slots: usize,
}

/// Request to move or resize an existing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequestNotification {
    pub session_title: String,
    pub practitioner: Practitioner,
    /// Free-text description of the session as originally booked,
    /// e.g. `"18 March 2025 9:00AM - 10:00AM"`.
    pub original_session: String,
    /// Free-text description of the proposed replacement.
    pub proposed_session: String,
    #[serde(default)]
    pub reason: String,
    /// Authoritative reference to the session, when the sender had one.
    #[serde(default)]
    pub original_session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    Availability(AvailabilityRequest),
    ChangeRequest(ChangeRequestNotification),
}

/// A queued inbound notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl Notification {
    pub fn practitioner(&self) -> &Practitioner {
        match &self.kind {
            NotificationKind::Availability(a) => &a.practitioner,
            NotificationKind::ChangeRequest(c) => &c.practitioner,
        }
    }
}
