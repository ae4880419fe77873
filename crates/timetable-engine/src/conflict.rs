//! Double-booking detection for a single practitioner.
//!
//! Overlap is half-open: a candidate `[a, b)` conflicts with an existing
//! booking `[c, d)` iff `a < d && c < b`. A booking that ends exactly when
//! the candidate starts is adjacent, not conflicting.
//!
//! Bookings that have already ended at the evaluation instant never block a
//! candidate, and neither do cancelled ones.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use crate::index::SessionIndex;
use crate::model::{Interval, PractitionerId, SessionId, SessionRecord};

/// The existing booking that blocks a candidate interval.
///
/// Carries enough detail for the caller to explain the rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub session_id: SessionId,
    pub title: String,
    pub interval: Interval,
    pub location: String,
}

impl Conflict {
    pub fn from_record(record: &SessionRecord) -> Self {
        Conflict {
            session_id: record.id.clone(),
            title: record.title.clone(),
            interval: record.interval,
            location: record.location.clone(),
        }
    }
}

/// Find the earliest-starting booking for `practitioner` that blocks
/// `candidate`.
///
/// # Arguments
///
/// * `index` — Current bookings
/// * `practitioner` — Whose calendar to check
/// * `candidate` — The proposed interval
/// * `exclude` — A session to ignore, typically the one being moved
/// * `now` — Evaluation instant; bookings ended by then are ignored
pub fn first_conflict(
    index: &SessionIndex,
    practitioner: &PractitionerId,
    candidate: &Interval,
    exclude: Option<&SessionId>,
    now: NaiveDateTime,
) -> Option<Conflict> {
    let hit = index
        .find_overlapping(practitioner, candidate, exclude)
        .into_iter()
        .find(|existing| !existing.interval.has_ended(now))
        .map(Conflict::from_record);
    if let Some(conflict) = &hit {
        debug!(
            practitioner = %practitioner,
            blocking = %conflict.session_id,
            candidate = %candidate,
            "conflict detected"
        );
    }
    hit
}

/// Check a candidate against arbitrary bookings, without an index.
///
/// Same rules as [`first_conflict`]; `bookings` need not be sorted and may
/// include other practitioners' sessions, which are skipped.
pub fn first_conflict_in<'a>(
    bookings: impl IntoIterator<Item = &'a SessionRecord>,
    practitioner: &PractitionerId,
    candidate: &Interval,
    exclude: Option<&SessionId>,
    now: NaiveDateTime,
) -> Option<Conflict> {
    bookings
        .into_iter()
        .filter(|b| &b.practitioner.id == practitioner && b.is_active())
        .filter(|b| Some(&b.id) != exclude)
        .filter(|b| !b.interval.has_ended(now) && b.interval.overlaps(candidate))
        .min_by_key(|b| b.interval.start())
        .map(Conflict::from_record)
}
