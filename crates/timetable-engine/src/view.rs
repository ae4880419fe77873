//! Outward-facing schedule views.
//!
//! Values cross the service boundary as ISO machine values paired with a
//! display string, e.g. `"date": "2025-03-18"` next to
//! `"date_display": "Tuesday, 18 March 2025"`.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::freeblock::FreeBlock;
use crate::model::{BlockedDate, DateRange, PractitionerId, SessionRecord};
use crate::timeparse::format_original_time;

/// `Tuesday, 18 March 2025`
pub fn display_date(date: NaiveDate) -> String {
    date.format("%A, %-d %B %Y").to_string()
}

/// `9:00AM - 10:00AM`
pub fn display_range(start: NaiveDateTime, end: NaiveDateTime) -> String {
    format!("{} - {}", start.format("%-I:%M%p"), end.format("%-I:%M%p"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionRecord,
    pub date_display: String,
    pub time_display: String,
    pub original_time_display: String,
    /// A queued change request refers to this session.
    pub pending_change: bool,
}

impl SessionView {
    pub fn new(session: SessionRecord, pending_change: bool) -> Self {
        SessionView {
            date_display: display_date(session.date()),
            time_display: display_range(session.interval.start(), session.interval.end()),
            original_time_display: format_original_time(session.original_time.as_ref()),
            pending_change,
            session,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreeBlockView {
    #[serde(flatten)]
    pub block: FreeBlock,
    pub date_display: String,
    pub time_display: String,
}

impl From<FreeBlock> for FreeBlockView {
    fn from(block: FreeBlock) -> Self {
        FreeBlockView {
            date_display: display_date(block.date),
            time_display: display_range(block.start, block.end),
            block,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedDateView {
    #[serde(flatten)]
    pub blocked: BlockedDate,
    pub date_display: String,
}

impl From<BlockedDate> for BlockedDateView {
    fn from(blocked: BlockedDate) -> Self {
        BlockedDateView {
            date_display: display_date(blocked.date),
            blocked,
        }
    }
}

/// A practitioner's sessions and free blocks over a date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleView {
    pub practitioner: PractitionerId,
    pub range: DateRange,
    /// Ordered by start time.
    pub sessions: Vec<SessionView>,
    /// None fall on a blocked date.
    pub free_blocks: Vec<FreeBlockView>,
    pub blocked_dates: Vec<BlockedDateView>,
}
