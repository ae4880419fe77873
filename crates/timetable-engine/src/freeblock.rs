//! Open gaps ("free blocks") inside a fixed daily window.
//!
//! Free blocks are the complement of a practitioner's bookings within the
//! window on each weekday of a date range. Blocked dates (holidays, exam
//! weeks) yield no blocks, like weekends. Blocks are derived on demand and
//! never stored.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};
use crate::index::SessionIndex;
use crate::model::{BlockedDate, DateRange, Interval, PractitionerId};

/// The daily window free blocks are carved from, e.g. 08:00 to 10:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DailyWindow {
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidInterval`] unless `start < end`.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if start < end {
            Ok(DailyWindow { start, end })
        } else {
            Err(ScheduleError::InvalidInterval(format!(
                "daily window {start} - {end} is empty or inverted"
            )))
        }
    }

    /// The window as concrete instants on `date`, `None` if inverted.
    pub fn on(&self, date: NaiveDate) -> Option<Interval> {
        Interval::new(date.and_time(self.start), date.and_time(self.end)).ok()
    }
}

impl Default for DailyWindow {
    fn default() -> Self {
        DailyWindow {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// An open interval not covered by any booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreeBlock {
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// The block ended before the evaluation instant.
    pub is_past: bool,
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn is_blocked(date: NaiveDate, blocked: &[BlockedDate]) -> bool {
    blocked.iter().any(|b| b.date == date)
}

/// Free blocks on a single date.
///
/// Weekends yield nothing. `bookings` may be unsorted and may include
/// intervals outside the window; only those overlapping it are swept.
pub fn free_blocks_for_day(
    date: NaiveDate,
    window: DailyWindow,
    bookings: &[Interval],
    now: NaiveDateTime,
) -> Vec<FreeBlock> {
    if is_weekend(date) {
        return Vec::new();
    }
    let Some(bounds) = window.on(date) else {
        return Vec::new();
    };

    let mut overlapping: Vec<&Interval> = bookings.iter().filter(|b| b.overlaps(&bounds)).collect();
    overlapping.sort_by_key(|b| b.start());

    let block = |start: NaiveDateTime, end: NaiveDateTime| FreeBlock {
        date,
        start,
        end,
        is_past: end < now,
    };

    let mut blocks = Vec::new();
    let mut cursor = bounds.start();
    for booking in overlapping {
        if booking.start() > cursor {
            blocks.push(block(cursor, booking.start()));
        }
        cursor = cursor.max(booking.end());
    }
    if cursor < bounds.end() {
        blocks.push(block(cursor, bounds.end()));
    }
    blocks
}

/// Free blocks for every weekday in `range`, ascending.
pub fn free_blocks(
    range: DateRange,
    window: DailyWindow,
    bookings: &[Interval],
    now: NaiveDateTime,
) -> Vec<FreeBlock> {
    free_blocks_excluding(range, window, bookings, &[], now)
}

/// [`free_blocks`], skipping every date in `blocked`.
pub fn free_blocks_excluding(
    range: DateRange,
    window: DailyWindow,
    bookings: &[Interval],
    blocked: &[BlockedDate],
    now: NaiveDateTime,
) -> Vec<FreeBlock> {
    range
        .days()
        .filter(|date| !is_blocked(*date, blocked))
        .flat_map(|date| {
            let (lo, hi) = DateRange::single(date).bounds();
            let day: Vec<Interval> = bookings
                .iter()
                .filter(|b| b.start() < hi && b.end() > lo)
                .copied()
                .collect();
            free_blocks_for_day(date, window, &day, now)
        })
        .collect()
}

/// Free blocks for one practitioner's active bookings in the index.
pub fn free_blocks_in(
    index: &SessionIndex,
    practitioner: &PractitionerId,
    range: DateRange,
    window: DailyWindow,
    blocked: &[BlockedDate],
    now: NaiveDateTime,
) -> Vec<FreeBlock> {
    let (lo, hi) = range.bounds();
    let bookings: Vec<Interval> = index
        .for_practitioner(practitioner)
        .filter(|s| s.is_active())
        .map(|s| s.interval)
        .filter(|iv| iv.start() < hi && iv.end() > lo)
        .collect();
    free_blocks_excluding(range, window, &bookings, blocked, now)
}
