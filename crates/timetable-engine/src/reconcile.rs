//! Turn accepted availability and change requests into committed bookings.
//!
//! Reconciliation is all-or-nothing. Every candidate is checked before
//! anything is written; one conflict aborts the whole batch and leaves the
//! index exactly as it was.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, warn};

use crate::conflict::{first_conflict, first_conflict_in};
use crate::error::{Result, ScheduleError};
use crate::index::SessionIndex;
use crate::matcher::{MatchPath, SessionMatcher};
use crate::model::{
    AvailabilityRequest, AvailabilitySlot, ChangeRequestNotification, ChangeStatus, Interval,
    SessionId, SessionPatch, SessionRecord, SlotTime,
};
use crate::timeparse::{self, Fallback, FallbackTimes};

/// A candidate that passed conflict checks and is ready to commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedSlot {
    /// Zero-based position in the caller's selection.
    pub slot: usize,
    pub record: SessionRecord,
    /// Set when the slot's time text fell back to the default interval.
    pub fallback: Option<Fallback>,
}

/// Resolve one slot to an interval on its date.
///
/// Free text never fails (it may fall back); an explicit inverted range is
/// rejected.
pub fn slot_interval(
    slot: &AvailabilitySlot,
    fallback: FallbackTimes,
) -> Result<(Interval, Option<Fallback>)> {
    match &slot.time {
        SlotTime::Text(text) => {
            let parsed = timeparse::interval_on_with(slot.date, text, fallback);
            Ok((parsed.interval, parsed.fallback))
        }
        SlotTime::Range { start, end } => {
            let interval = Interval::new(slot.date.and_time(*start), slot.date.and_time(*end))?;
            Ok((interval, None))
        }
    }
}

/// Check every selected slot of an availability offer without writing.
///
/// Candidates are checked in order against the index and against the
/// candidates accepted before them, so two overlapping selections in one
/// batch are also rejected.
///
/// # Errors
///
/// - [`ScheduleError::SlotCountMismatch`] if `slots.len()` differs from
///   `request.required_slots`; nothing else is evaluated.
/// - [`ScheduleError::InvalidInterval`] for an inverted explicit range.
/// - [`ScheduleError::SchedulingConflict`] naming the first conflicting
///   slot and its blocker.
pub fn plan_availability(
    index: &SessionIndex,
    request: &AvailabilityRequest,
    slots: &[AvailabilitySlot],
    now: NaiveDateTime,
    fallback: FallbackTimes,
) -> Result<Vec<PlannedSlot>> {
    if slots.len() != request.required_slots {
        return Err(ScheduleError::SlotCountMismatch {
            required: request.required_slots,
            selected: slots.len(),
        });
    }

    let practitioner = &request.practitioner.id;
    let mut planned: Vec<PlannedSlot> = Vec::with_capacity(slots.len());
    for (position, slot) in slots.iter().enumerate() {
        let (interval, used_fallback) = slot_interval(slot, fallback)?;
        if let Some(reason) = used_fallback {
            warn!(slot = position, ?reason, practitioner = %practitioner, "slot time defaulted");
        }

        let blocking = first_conflict(index, practitioner, &interval, None, now).or_else(|| {
            first_conflict_in(planned.iter().map(|p| &p.record), practitioner, &interval, None, now)
        });
        if let Some(blocking) = blocking {
            warn!(
                slot = position,
                practitioner = %practitioner,
                blocking = %blocking.session_id,
                "availability batch rejected"
            );
            return Err(ScheduleError::conflict(Some(position), blocking));
        }

        planned.push(PlannedSlot {
            slot: position,
            record: SessionRecord {
                id: SessionId::generate(),
                title: request.title.clone(),
                practitioner: request.practitioner.clone(),
                interval,
                location: request.location.clone(),
                students: request.students.clone(),
                change: ChangeStatus::None,
                original_time: None,
                change_reason: None,
                cancelled: false,
            },
            fallback: used_fallback,
        });
    }
    Ok(planned)
}

/// Insert planned records into the index, all or none.
///
/// # Errors
///
/// If any insert fails, the records already inserted are removed again
/// before the error is returned.
pub fn commit(index: &mut SessionIndex, planned: &[PlannedSlot]) -> Result<Vec<SessionId>> {
    let mut inserted: Vec<SessionId> = Vec::with_capacity(planned.len());
    for plan in planned {
        if let Err(err) = index.add(plan.record.clone()) {
            for id in &inserted {
                index.remove(id);
            }
            let err = match err {
                ScheduleError::SchedulingConflict { blocking, .. } => {
                    ScheduleError::conflict(Some(plan.slot), *blocking)
                }
                other => other,
            };
            return Err(err);
        }
        inserted.push(plan.record.id.clone());
    }
    debug!(count = inserted.len(), "availability committed to index");
    Ok(inserted)
}

/// [`plan_availability`] followed by [`commit`].
///
/// The index is evaluated at `now` from here on, so a slot placed over an
/// ended booking commits the same way it planned.
pub fn reconcile_availability(
    index: &mut SessionIndex,
    request: &AvailabilityRequest,
    slots: &[AvailabilitySlot],
    now: NaiveDateTime,
    fallback: FallbackTimes,
) -> Result<Vec<PlannedSlot>> {
    index.evaluate_at(now);
    let planned = plan_availability(index, request, slots, now, fallback)?;
    commit(index, &planned)?;
    Ok(planned)
}

// ── Change requests ─────────────────────────────────────────────────────────

/// An accepted change, ready to apply to the resolved session.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub session_id: SessionId,
    pub path: MatchPath,
    pub before: SessionRecord,
    pub after: SessionRecord,
}

impl PlannedChange {
    fn patch(&self) -> SessionPatch {
        SessionPatch {
            interval: Some(self.after.interval),
            change: Some(self.after.change),
            original_time: self.after.original_time,
            change_reason: self.after.change_reason.clone(),
            ..SessionPatch::default()
        }
    }
}

/// How a move from `before` to `after` is tagged.
///
/// Same date and start with a different end is a resize; anything else is a
/// reschedule.
pub fn classify_change(before: &Interval, after: &Interval) -> ChangeStatus {
    if before == after {
        ChangeStatus::None
    } else if before.start() == after.start() {
        ChangeStatus::Resized
    } else {
        ChangeStatus::Rescheduled
    }
}

/// Resolve a change request and check its proposed interval, without
/// writing.
///
/// # Errors
///
/// - [`ScheduleError::UnresolvedReference`] from the matcher.
/// - [`ScheduleError::SchedulingConflict`] if the proposed interval overlaps
///   another of the practitioner's bookings; the session's own current
///   interval never counts.
pub fn plan_change(
    index: &SessionIndex,
    request: &ChangeRequestNotification,
    proposed: Interval,
    now: NaiveDateTime,
    fallback: FallbackTimes,
) -> Result<PlannedChange> {
    let matched = SessionMatcher::new(index, now)
        .with_fallback(fallback)
        .resolve(request)?;
    let before = matched.session.clone();

    if let Some(blocking) = first_conflict(
        index,
        before.practitioner_id(),
        &proposed,
        Some(&before.id),
        now,
    ) {
        warn!(
            session_id = %before.id,
            blocking = %blocking.session_id,
            "change request rejected"
        );
        return Err(ScheduleError::conflict(None, blocking));
    }

    let mut after = before.clone();
    after.interval = proposed;
    after.change = match classify_change(&before.interval, &proposed) {
        ChangeStatus::None => before.change,
        tag => tag,
    };
    // keep the first booked time across repeated changes
    after.original_time = before.original_time.or(Some(before.interval));
    if !request.reason.trim().is_empty() {
        after.change_reason = Some(request.reason.trim().to_string());
    }

    Ok(PlannedChange {
        session_id: before.id.clone(),
        path: matched.path,
        before,
        after,
    })
}

/// Apply a planned change to the index.
pub fn apply_change(index: &mut SessionIndex, change: &PlannedChange) -> Result<SessionRecord> {
    index
        .update(&change.session_id, change.patch())
        .cloned()
}

/// Parse the proposed descriptor carried by a change request.
///
/// # Errors
///
/// Returns [`ScheduleError::InvalidNotification`] if the descriptor has no
/// recognisable date and time; a change is never committed to a fallback
/// interval.
pub fn proposed_interval(
    request: &ChangeRequestNotification,
    fallback: FallbackTimes,
) -> Result<Interval> {
    let (date_text, range_text) = timeparse::split_descriptor(&request.proposed_session)
        .ok_or_else(|| {
            ScheduleError::InvalidNotification(format!(
                "proposed session \"{}\" has no recognisable date",
                request.proposed_session
            ))
        })?;
    let parsed = timeparse::parse_to_interval_with(date_text, range_text, fallback);
    match parsed.fallback {
        None => Ok(parsed.interval),
        Some(reason) => Err(ScheduleError::InvalidNotification(format!(
            "proposed session \"{}\" could not be parsed ({reason:?})",
            request.proposed_session
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Practitioner, PractitionerId};
    use chrono::{NaiveDate, NaiveTime};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        d(day).and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn lim() -> Practitioner {
        Practitioner {
            id: PractitionerId::from("M123"),
            name: "Lim".to_string(),
            email: "lim@example.org".to_string(),
        }
    }

    fn booking(id: &str, title: &str, start: NaiveDateTime, end: NaiveDateTime) -> SessionRecord {
        SessionRecord {
            id: SessionId::from(id),
            title: title.to_string(),
            practitioner: lim(),
            interval: Interval::new(start, end).unwrap(),
            location: "Ward 5".to_string(),
            students: String::new(),
            change: ChangeStatus::None,
            original_time: None,
            change_reason: None,
            cancelled: false,
        }
    }

    fn offer(required: usize) -> AvailabilityRequest {
        AvailabilityRequest {
            title: "Bedside Tutorial".to_string(),
            practitioner: lim(),
            location: "Ward 7".to_string(),
            students: "Tan (NUS), Ng (NTU)".to_string(),
            required_slots: required,
        }
    }

    fn now() -> NaiveDateTime {
        at(1, 0, 0)
    }

    #[test]
    fn test_count_mismatch_rejected_before_checks() {
        let index = SessionIndex::new();
        let slots = vec![AvailabilitySlot::text(d(18), "9 to 10")];
        let err = plan_availability(&index, &offer(2), &slots, now(), FallbackTimes::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::SlotCountMismatch {
                required: 2,
                selected: 1
            }
        ));
    }

    #[test]
    fn test_second_slot_conflict_commits_nothing() {
        let mut index =
            SessionIndex::from_records([booking("s1", "Ward Round", at(19, 9, 0), at(19, 10, 0))])
                .unwrap();
        let slots = vec![
            AvailabilitySlot::text(d(18), "9 to 10"),
            AvailabilitySlot::text(d(19), "9:30am-10:30am"),
            AvailabilitySlot::text(d(20), "2pm"),
        ];
        let err = reconcile_availability(&mut index, &offer(3), &slots, now(), FallbackTimes::default())
            .unwrap_err();
        match err {
            ScheduleError::SchedulingConflict { slot, blocking } => {
                assert_eq!(slot, Some(1));
                assert_eq!(blocking.title, "Ward Round");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_slot_over_ended_booking_commits() {
        let mut index =
            SessionIndex::from_records([booking("s1", "Ward Round", at(19, 9, 0), at(19, 10, 0))])
                .unwrap();
        let slots = vec![AvailabilitySlot::text(d(19), "9:30am-10:30am")];
        let now = at(19, 10, 0);
        let planned =
            reconcile_availability(&mut index, &offer(1), &slots, now, FallbackTimes::default())
                .unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.evaluated_at(), Some(now));
    }

    #[test]
    fn test_successful_batch_creates_every_slot() {
        let mut index = SessionIndex::new();
        let slots = vec![
            AvailabilitySlot::text(d(18), "9 to 10"),
            AvailabilitySlot {
                date: d(19),
                time: SlotTime::Range {
                    start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
                },
            },
        ];
        let planned =
            reconcile_availability(&mut index, &offer(2), &slots, now(), FallbackTimes::default())
                .unwrap();
        assert_eq!(planned.len(), 2);
        assert_eq!(index.len(), 2);
        assert_eq!(planned[1].record.interval.start(), at(19, 14, 0));
        assert_eq!(planned[0].record.location, "Ward 7");
    }

    #[test]
    fn test_overlapping_selections_within_batch_conflict() {
        let mut index = SessionIndex::new();
        let slots = vec![
            AvailabilitySlot::text(d(18), "9 to 11"),
            AvailabilitySlot::text(d(18), "10 to 12"),
        ];
        let err = reconcile_availability(&mut index, &offer(2), &slots, now(), FallbackTimes::default())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::SchedulingConflict { slot: Some(1), .. }));
        assert!(index.is_empty());
    }

    #[test]
    fn test_fallback_slot_is_flagged_not_fatal() {
        let index = SessionIndex::new();
        let slots = vec![AvailabilitySlot::text(d(18), "-")];
        let planned = plan_availability(&index, &offer(1), &slots, now(), FallbackTimes::default())
            .unwrap();
        assert_eq!(planned[0].fallback, Some(Fallback::Empty));
        assert_eq!(planned[0].record.interval.start(), at(18, 9, 0));
    }

    #[test]
    fn test_commit_rolls_back_on_late_failure() {
        let mut index = SessionIndex::new();
        let good = PlannedSlot {
            slot: 0,
            record: booking("a", "A", at(18, 9, 0), at(18, 10, 0)),
            fallback: None,
        };
        let clash = PlannedSlot {
            slot: 1,
            record: booking("b", "B", at(18, 9, 30), at(18, 10, 30)),
            fallback: None,
        };
        let err = commit(&mut index, &[good, clash]).unwrap_err();
        assert!(matches!(err, ScheduleError::SchedulingConflict { slot: Some(1), .. }));
        assert!(index.is_empty());
    }

    fn change_request(proposed: &str, id: Option<&str>) -> ChangeRequestNotification {
        ChangeRequestNotification {
            session_title: "Clinical Teaching Round".to_string(),
            practitioner: lim(),
            original_session: "18 March 2025 9:00AM - 10:00AM".to_string(),
            proposed_session: proposed.to_string(),
            reason: "Theatre list".to_string(),
            original_session_id: id.map(SessionId::from),
        }
    }

    #[test]
    fn test_change_conflicting_with_other_booking() {
        let index = SessionIndex::from_records([
            booking("ctr", "Clinical Teaching Round", at(18, 9, 0), at(18, 10, 0)),
            booking("mine", "Grand Ward Round", at(18, 14, 0), at(18, 15, 0)),
        ])
        .unwrap();
        let req = change_request("18 March 2025 9:30AM - 10:30AM", Some("mine"));
        let proposed = proposed_interval(&req, FallbackTimes::default()).unwrap();
        let err = plan_change(&index, &req, proposed, now(), FallbackTimes::default()).unwrap_err();
        match err {
            ScheduleError::SchedulingConflict { blocking, .. } => {
                assert_eq!(blocking.title, "Clinical Teaching Round");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_change_overlapping_only_itself_is_accepted() {
        let mut index = SessionIndex::from_records([booking(
            "ctr",
            "Clinical Teaching Round",
            at(18, 9, 0),
            at(18, 10, 0),
        )])
        .unwrap();
        let req = change_request("18 March 2025 9:30AM - 10:30AM", None);
        let proposed = proposed_interval(&req, FallbackTimes::default()).unwrap();
        let plan = plan_change(&index, &req, proposed, now(), FallbackTimes::default()).unwrap();
        assert_eq!(plan.path, MatchPath::Structural);
        let updated = apply_change(&mut index, &plan).unwrap();

        assert_eq!(updated.id, SessionId::from("ctr"));
        assert_eq!(updated.interval.start(), at(18, 9, 30));
        assert_eq!(updated.change, ChangeStatus::Rescheduled);
        assert_eq!(updated.original_time.unwrap().start(), at(18, 9, 0));
        assert_eq!(updated.change_reason.as_deref(), Some("Theatre list"));
    }

    #[test]
    fn test_classify_change() {
        let base = Interval::new(at(18, 9, 0), at(18, 10, 0)).unwrap();
        let longer = Interval::new(at(18, 9, 0), at(18, 11, 0)).unwrap();
        let moved = Interval::new(at(19, 9, 0), at(19, 10, 0)).unwrap();
        assert_eq!(classify_change(&base, &base), ChangeStatus::None);
        assert_eq!(classify_change(&base, &longer), ChangeStatus::Resized);
        assert_eq!(classify_change(&base, &moved), ChangeStatus::Rescheduled);
    }

    #[test]
    fn test_original_time_survives_second_change() {
        let mut index = SessionIndex::from_records([booking(
            "ctr",
            "Clinical Teaching Round",
            at(18, 9, 0),
            at(18, 10, 0),
        )])
        .unwrap();
        for proposed in ["18 March 2025 11:00AM - 12:00PM", "18 March 2025 1pm-2pm"] {
            let req = change_request(proposed, Some("ctr"));
            let interval = proposed_interval(&req, FallbackTimes::default()).unwrap();
            let plan = plan_change(&index, &req, interval, now(), FallbackTimes::default()).unwrap();
            apply_change(&mut index, &plan).unwrap();
        }
        let session = index.get(&SessionId::from("ctr")).unwrap();
        assert_eq!(session.interval.start(), at(18, 13, 0));
        assert_eq!(session.original_time.unwrap().start(), at(18, 9, 0));
    }

    #[test]
    fn test_unparseable_proposal_is_invalid_notification() {
        let req = change_request("sometime next week", None);
        let err = proposed_interval(&req, FallbackTimes::default()).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidNotification(_)));
    }
}
