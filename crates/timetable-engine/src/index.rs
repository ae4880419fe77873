//! In-memory canonical store of confirmed bookings.
//!
//! [`SessionIndex`] keeps every session by id plus a per-practitioner
//! ordering by start time, and enforces the booking invariant on every
//! mutation: no two active sessions for the same practitioner overlap.
//!
//! An index built [`as_of`](SessionIndex::as_of) an evaluation instant
//! applies the same rule as [`first_conflict`](crate::conflict::first_conflict):
//! a session that has ended by then neither blocks nor is blocked. Without an
//! instant every overlap is rejected.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDateTime;
use tracing::debug;

use crate::conflict::Conflict;
use crate::error::{Result, ScheduleError};
use crate::model::{DateRange, Interval, PractitionerId, SessionId, SessionPatch, SessionRecord};

#[derive(Debug, Default, Clone)]
pub struct SessionIndex {
    sessions: HashMap<SessionId, SessionRecord>,
    by_practitioner: HashMap<PractitionerId, BTreeSet<(NaiveDateTime, SessionId)>>,
    now: Option<NaiveDateTime>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from records loaded from the store.
    ///
    /// # Errors
    ///
    /// Fails with [`ScheduleError::SchedulingConflict`] if the records
    /// already violate the overlap invariant.
    pub fn from_records(records: impl IntoIterator<Item = SessionRecord>) -> Result<Self> {
        Self::load(SessionIndex::new(), records)
    }

    /// An empty index where sessions ended by `now` never conflict.
    pub fn as_of(now: NaiveDateTime) -> Self {
        SessionIndex {
            now: Some(now),
            ..SessionIndex::default()
        }
    }

    /// [`from_records`](Self::from_records) evaluated at `now`.
    ///
    /// A booking placed over one that has since ended is legal, so loading
    /// such a pair back from the store succeeds.
    ///
    /// # Errors
    ///
    /// Fails with [`ScheduleError::SchedulingConflict`] if two sessions
    /// still running at `now` overlap.
    pub fn from_records_as_of(
        records: impl IntoIterator<Item = SessionRecord>,
        now: NaiveDateTime,
    ) -> Result<Self> {
        Self::load(SessionIndex::as_of(now), records)
    }

    fn load(
        mut index: SessionIndex,
        records: impl IntoIterator<Item = SessionRecord>,
    ) -> Result<Self> {
        for record in records {
            index.add(record)?;
        }
        Ok(index)
    }

    /// The instant ended sessions are judged against, if any.
    pub fn evaluated_at(&self) -> Option<NaiveDateTime> {
        self.now
    }

    /// Move the evaluation instant.
    pub fn evaluate_at(&mut self, now: NaiveDateTime) {
        self.now = Some(now);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionRecord> {
        self.sessions.get(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Every session, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.values()
    }

    /// A practitioner's sessions ordered by start time.
    pub fn for_practitioner<'a>(
        &'a self,
        practitioner: &PractitionerId,
    ) -> impl Iterator<Item = &'a SessionRecord> + 'a {
        self.by_practitioner
            .get(practitioner)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(move |(_, id)| self.sessions.get(id))
    }

    /// A practitioner's sessions starting on a date inside `range`.
    pub fn in_range<'a>(
        &'a self,
        practitioner: &PractitionerId,
        range: DateRange,
    ) -> impl Iterator<Item = &'a SessionRecord> + 'a {
        self.for_practitioner(practitioner)
            .filter(move |s| range.contains(s.date()))
    }

    /// Active sessions for `practitioner` overlapping `interval`, ordered by
    /// start time, skipping `exclude`.
    pub fn find_overlapping<'a>(
        &'a self,
        practitioner: &PractitionerId,
        interval: &Interval,
        exclude: Option<&SessionId>,
    ) -> Vec<&'a SessionRecord> {
        let Some(set) = self.by_practitioner.get(practitioner) else {
            return Vec::new();
        };
        let interval = *interval;
        set.iter()
            // sessions starting at or after the candidate end cannot overlap
            .take_while(|(start, _)| *start < interval.end())
            .filter(|(_, id)| Some(id) != exclude)
            .filter_map(|(_, id)| self.sessions.get(id))
            .filter(|s| s.is_active() && s.interval.overlaps(&interval))
            .collect()
    }

    /// Insert a new session.
    ///
    /// # Errors
    ///
    /// - [`ScheduleError::Duplicate`] if the id is already present.
    /// - [`ScheduleError::SchedulingConflict`] if an active session for the
    ///   same practitioner overlaps.
    pub fn add(&mut self, record: SessionRecord) -> Result<()> {
        if self.sessions.contains_key(&record.id) {
            return Err(ScheduleError::Duplicate(format!("session {}", record.id)));
        }
        if record.is_active() {
            self.ensure_free(&record, None)?;
        }
        debug!(session_id = %record.id, practitioner = %record.practitioner.id, "session indexed");
        self.insert_unchecked(record);
        Ok(())
    }

    /// Apply `patch` to an existing session, re-checking overlap against
    /// everything but the session's own prior interval.
    ///
    /// Identity is preserved: the id and practitioner never change.
    ///
    /// # Errors
    ///
    /// - [`ScheduleError::NotFound`] if no session has `id`.
    /// - [`ScheduleError::SchedulingConflict`] if the patched interval
    ///   overlaps another active session; the index is left unchanged.
    pub fn update(&mut self, id: &SessionId, patch: SessionPatch) -> Result<&SessionRecord> {
        let current = self
            .sessions
            .get(id)
            .ok_or_else(|| ScheduleError::NotFound(format!("session {id}")))?;
        let mut updated = current.clone();
        patch.apply_to(&mut updated);
        if updated.is_active() {
            self.ensure_free(&updated, Some(id))?;
        }

        self.unlink(id);
        debug!(session_id = %id, "session updated");
        let id = updated.id.clone();
        self.insert_unchecked(updated);
        self.sessions
            .get(&id)
            .ok_or_else(|| ScheduleError::NotFound(format!("session {id}")))
    }

    /// Remove a session, returning it if present.
    pub fn remove(&mut self, id: &SessionId) -> Option<SessionRecord> {
        let removed = self.unlink(id);
        if removed.is_some() {
            debug!(session_id = %id, "session removed");
        }
        removed
    }

    fn ensure_free(&self, record: &SessionRecord, exclude: Option<&SessionId>) -> Result<()> {
        let ended = |interval: &Interval| self.now.is_some_and(|now| interval.has_ended(now));
        if ended(&record.interval) {
            return Ok(());
        }
        match self
            .find_overlapping(&record.practitioner.id, &record.interval, exclude)
            .into_iter()
            .find(|existing| !ended(&existing.interval))
        {
            Some(existing) => Err(ScheduleError::conflict(None, Conflict::from_record(existing))),
            None => Ok(()),
        }
    }

    fn insert_unchecked(&mut self, record: SessionRecord) {
        self.by_practitioner
            .entry(record.practitioner.id.clone())
            .or_default()
            .insert((record.interval.start(), record.id.clone()));
        self.sessions.insert(record.id.clone(), record);
    }

    fn unlink(&mut self, id: &SessionId) -> Option<SessionRecord> {
        let record = self.sessions.remove(id)?;
        if let Some(set) = self.by_practitioner.get_mut(&record.practitioner.id) {
            set.remove(&(record.interval.start(), record.id.clone()));
            if set.is_empty() {
                self.by_practitioner.remove(&record.practitioner.id);
            }
        }
        Some(record)
    }
}
