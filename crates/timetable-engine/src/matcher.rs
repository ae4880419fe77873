//! Resolve a free-text change request to exactly one booked session.
//!
//! Change requests usually come from correspondence parsed upstream, so a
//! stable key is often missing. Resolution runs as a small state machine:
//!
//! 1. **Identifier** — if the request carries an authoritative
//!    `original_session_id`, that session is the match, even if its title
//!    has since been edited. An identifier naming no active session is
//!    unresolved; the structural path is not tried.
//! 2. **Structural** — otherwise the original-session descriptor is parsed
//!    and candidates must agree, case-insensitively, on title, practitioner
//!    name, date and normalized start time. Sessions that have already ended
//!    are not candidates.
//! 3. **Unresolved** — zero or several structural candidates. The matcher
//!    never guesses.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, ScheduleError};
use crate::index::SessionIndex;
use crate::model::{ChangeRequestNotification, SessionId, SessionRecord};
use crate::timeparse::{self, FallbackTimes};

/// Which stage produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPath {
    Identifier,
    Structural,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionMatch<'a> {
    pub session: &'a SessionRecord,
    pub path: MatchPath,
}

/// The structural fields a request must agree on, pre-normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StructuralKey {
    title: String,
    practitioner_name: String,
    date: NaiveDate,
    start: NaiveDateTime,
}

impl StructuralKey {
    fn from_request(request: &ChangeRequestNotification, fallback: FallbackTimes) -> Option<Self> {
        let (date_text, range_text) = timeparse::split_descriptor(&request.original_session)?;
        let parsed = timeparse::parse_to_interval_with(date_text, range_text, fallback);
        if parsed.used_fallback() {
            return None;
        }
        Some(StructuralKey {
            title: fold(&request.session_title),
            practitioner_name: fold(&request.practitioner.name),
            date: parsed.interval.date(),
            start: parsed.interval.start(),
        })
    }

    fn matches(&self, session: &SessionRecord) -> bool {
        session.date() == self.date
            && session.interval.start() == self.start
            && fold(&session.title) == self.title
            && fold(&session.practitioner.name) == self.practitioner_name
    }
}

/// Lowercase and collapse internal whitespace.
fn fold(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

enum MatchState<'n> {
    Start,
    ById(&'n SessionId),
    Structural,
    Unresolved(String),
}

pub struct SessionMatcher<'a> {
    index: &'a SessionIndex,
    now: NaiveDateTime,
    fallback: FallbackTimes,
}

impl<'a> SessionMatcher<'a> {
    pub fn new(index: &'a SessionIndex, now: NaiveDateTime) -> Self {
        SessionMatcher {
            index,
            now,
            fallback: FallbackTimes::default(),
        }
    }

    /// Use the configured parse fallback when reading descriptors.
    pub fn with_fallback(mut self, fallback: FallbackTimes) -> Self {
        self.fallback = fallback;
        self
    }

    /// Resolve `request` to exactly one session.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::UnresolvedReference`] when the identifier
    /// names no active session, the descriptor cannot be parsed, or the
    /// structural match yields zero or several candidates.
    pub fn resolve(&self, request: &ChangeRequestNotification) -> Result<SessionMatch<'a>> {
        let mut state = MatchState::Start;
        loop {
            state = match state {
                MatchState::Start => match &request.original_session_id {
                    Some(id) => MatchState::ById(id),
                    None => MatchState::Structural,
                },
                MatchState::ById(id) => match self.index.get(id) {
                    Some(session) if session.is_active() => {
                        debug!(session_id = %id, "change request matched by identifier");
                        return Ok(SessionMatch {
                            session,
                            path: MatchPath::Identifier,
                        });
                    }
                    Some(_) => MatchState::Unresolved(format!("session {id} has been cancelled")),
                    None => MatchState::Unresolved(format!("no session with id {id}")),
                },
                MatchState::Structural => match self.structural_candidates(request) {
                    Err(reason) => MatchState::Unresolved(reason),
                    Ok(candidates) => match candidates.as_slice() {
                        [only] => {
                            let session = *only;
                            debug!(session_id = %session.id, "change request matched structurally");
                            return Ok(SessionMatch {
                                session,
                                path: MatchPath::Structural,
                            });
                        }
                        [] => MatchState::Unresolved(format!(
                            "no upcoming session \"{}\" for {} at {}",
                            request.session_title, request.practitioner.name, request.original_session
                        )),
                        many => MatchState::Unresolved(format!(
                            "{} sessions match \"{}\" at {}; manual disambiguation required",
                            many.len(),
                            request.session_title,
                            request.original_session
                        )),
                    },
                },
                MatchState::Unresolved(reason) => {
                    debug!(%reason, "change request unresolved");
                    return Err(ScheduleError::unresolved(reason));
                }
            };
        }
    }

    /// Ids of the sessions the given requests resolve to, each request
    /// resolved once. Unresolved requests contribute nothing.
    pub fn referenced_sessions<'r>(
        &self,
        requests: impl IntoIterator<Item = &'r ChangeRequestNotification>,
    ) -> HashSet<SessionId> {
        requests
            .into_iter()
            .filter_map(|request| self.resolve(request).ok())
            .map(|m| m.session.id.clone())
            .collect()
    }

    fn structural_candidates(
        &self,
        request: &ChangeRequestNotification,
    ) -> std::result::Result<Vec<&'a SessionRecord>, String> {
        let key = StructuralKey::from_request(request, self.fallback).ok_or_else(|| {
            format!(
                "original session \"{}\" has no recognisable date and time",
                request.original_session
            )
        })?;
        let now = self.now;
        Ok(self
            .index
            .iter()
            .filter(|s| s.is_active() && !s.interval.has_ended(now))
            .filter(|s| key.matches(s))
            .collect())
    }
}
