//! Async facade over the engine and its collaborators.
//!
//! Every write follows the same shape: take the practitioner's lock, load
//! the relevant slice of the schedule into a [`SessionIndex`], plan the
//! change against it, commit to the [`SessionStore`], release the lock, then
//! run follow-ups (queue removal, dispatch). A commit that fails part-way is
//! rolled back before the error is returned. Follow-up failures never undo a
//! commit; they are logged and reported on the [`Receipt`].
//!
//! No collaborator call or lock wait is unbounded: each is wrapped in
//! [`tokio::time::timeout`] using the limits in [`EngineConfig`].

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{Result, ScheduleError};
use crate::freeblock::free_blocks_in;
use crate::index::SessionIndex;
use crate::locks::PractitionerLocks;
use crate::matcher::SessionMatcher;
use crate::model::{
    AvailabilityRequest, AvailabilitySlot, ChangeRequestNotification, DateRange, Notification,
    NotificationId, NotificationKind, PractitionerId, SessionId, SessionRecord,
};
use crate::ports::{Dispatcher, NotificationQueue, Outcome, SessionStore};
use crate::reconcile::{plan_availability, plan_change, proposed_interval, slot_interval};
use crate::timeparse;
use crate::view::{BlockedDateView, FreeBlockView, ScheduleView, SessionView};

/// A follow-up step that runs after a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStep {
    RemoveNotification,
    Dispatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FollowUpFailure {
    pub step: FollowUpStep,
    pub message: String,
}

/// A committed result plus any follow-ups that failed after the commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt<T> {
    pub value: T,
    pub follow_up_failures: Vec<FollowUpFailure>,
}

impl<T> Receipt<T> {
    pub fn is_clean(&self) -> bool {
        self.follow_up_failures.is_empty()
    }
}

pub struct SchedulingService {
    store: Arc<dyn SessionStore>,
    queue: Arc<dyn NotificationQueue>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    tz: Tz,
    locks: PractitionerLocks,
}

impl SchedulingService {
    /// # Errors
    ///
    /// Returns [`ScheduleError::Config`] if `config` does not validate.
    pub fn new(
        store: Arc<dyn SessionStore>,
        queue: Arc<dyn NotificationQueue>,
        dispatcher: Arc<dyn Dispatcher>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let tz = config.tz()?;
        Ok(SchedulingService {
            store,
            queue,
            dispatcher,
            clock: Arc::new(SystemClock),
            config,
            tz,
            locks: PractitionerLocks::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current local wall-clock time.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now_local(self.tz)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Sessions, free blocks and blocked dates for `practitioner` over
    /// `range`.
    #[instrument(skip(self, practitioner), fields(practitioner = %practitioner))]
    pub async fn query(
        &self,
        practitioner: &PractitionerId,
        range: DateRange,
    ) -> Result<ScheduleView> {
        let now = self.now();
        let index = self.load_index(practitioner, widen(range), now).await?;
        let pending = self.pending_changes_for(practitioner).await?;
        let blocked = self
            .call("list_blocked_dates", self.store.list_blocked_dates(range))
            .await?;
        let flagged = SessionMatcher::new(&index, now)
            .with_fallback(self.config.fallback)
            .referenced_sessions(&pending);

        let sessions = index
            .in_range(practitioner, range)
            .filter(|s| s.is_active())
            .map(|s| SessionView::new(s.clone(), flagged.contains(&s.id)))
            .collect();
        let window = self.config.window;
        let free_blocks = free_blocks_in(&index, practitioner, range, window, &blocked, now)
            .into_iter()
            .map(FreeBlockView::from)
            .collect();

        Ok(ScheduleView {
            practitioner: practitioner.clone(),
            range,
            sessions,
            free_blocks,
            blocked_dates: blocked.into_iter().map(BlockedDateView::from).collect(),
        })
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Accept an availability offer with the caller's chosen slots.
    ///
    /// All slots are committed or none are. On success the notification is
    /// removed and a [`Outcome::Committed`] is dispatched.
    ///
    /// # Errors
    ///
    /// - [`ScheduleError::NotFound`] / [`ScheduleError::InvalidNotification`]
    ///   for a missing or non-availability notification.
    /// - [`ScheduleError::SlotCountMismatch`] or
    ///   [`ScheduleError::SchedulingConflict`]; a rejection is dispatched and
    ///   the notification stays queued.
    /// - Store errors and timeouts, after rolling back partial creates.
    #[instrument(
        skip(self, notification_id, slots),
        fields(notification_id = %notification_id, slots = slots.len())
    )]
    pub async fn submit_availability(
        &self,
        notification_id: &NotificationId,
        slots: &[AvailabilitySlot],
    ) -> Result<Receipt<Vec<SessionRecord>>> {
        let notification = self.notification(notification_id).await?;
        let request = availability_of(&notification)?;
        let practitioner = &request.practitioner.id;

        let guard = self
            .locks
            .acquire(practitioner, self.config.lock_timeout())
            .await?;
        let now = self.now();
        let index = match DateRange::covering(slots.iter().map(|s| s.date)) {
            Some(range) => self.load_index(practitioner, widen(range), now).await?,
            None => SessionIndex::as_of(now),
        };

        let planned = match plan_availability(&index, request, slots, now, self.config.fallback) {
            Ok(planned) => planned,
            Err(err) => {
                drop(guard);
                self.notify_rejection(&notification, &err).await;
                return Err(err);
            }
        };

        let mut created: Vec<SessionId> = Vec::with_capacity(planned.len());
        for plan in &planned {
            if let Err(err) = self
                .call("create_session", self.store.create_session(&plan.record))
                .await
            {
                error!(
                    slot = plan.slot,
                    error = %err,
                    created = created.len(),
                    "availability commit failed, rolling back"
                );
                self.roll_back(&created).await;
                return Err(err);
            }
            created.push(plan.record.id.clone());
        }
        drop(guard);

        let sessions: Vec<SessionRecord> = planned.into_iter().map(|p| p.record).collect();
        info!(
            practitioner = %practitioner,
            count = sessions.len(),
            "availability committed"
        );

        let outcome = Outcome::Committed {
            notification_id: notification.id.clone(),
            practitioner: request.practitioner.clone(),
            sessions: sessions.clone(),
        };
        let follow_up_failures = self.follow_up(Some(&notification.id), &outcome).await;
        Ok(Receipt {
            value: sessions,
            follow_up_failures,
        })
    }

    /// Accept a change request, moving the session it refers to.
    ///
    /// With `proposed` absent, the request's own proposed descriptor is
    /// used.
    ///
    /// # Errors
    ///
    /// - [`ScheduleError::UnresolvedReference`] if the request matches zero
    ///   or several sessions.
    /// - [`ScheduleError::SchedulingConflict`] if the proposed interval is
    ///   taken; a rejection is dispatched and the request stays queued.
    /// - [`ScheduleError::InvalidNotification`] if no proposed time can be
    ///   read.
    #[instrument(skip(self, notification_id, proposed), fields(notification_id = %notification_id))]
    pub async fn resolve_change_request(
        &self,
        notification_id: &NotificationId,
        proposed: Option<&AvailabilitySlot>,
    ) -> Result<Receipt<SessionRecord>> {
        let notification = self.notification(notification_id).await?;
        let request = change_request_of(&notification)?;
        let practitioner = &request.practitioner.id;

        let target = match proposed {
            Some(slot) => match slot_interval(slot, self.config.fallback)? {
                (interval, None) => interval,
                (_, Some(reason)) => {
                    return Err(ScheduleError::InvalidNotification(format!(
                        "proposed slot could not be parsed ({reason:?})"
                    )))
                }
            },
            None => proposed_interval(request, self.config.fallback)?,
        };

        let guard = self
            .locks
            .acquire(practitioner, self.config.lock_timeout())
            .await?;
        let now = self.now();
        let mut dates = vec![target.date()];
        dates.extend(self.original_date(request).await?);
        let range = DateRange::covering(dates).unwrap_or_else(|| DateRange::single(target.date()));
        let index = self.load_index(practitioner, widen(range), now).await?;

        let plan = match plan_change(&index, request, target, now, self.config.fallback) {
            Ok(plan) => plan,
            Err(err) => {
                drop(guard);
                self.notify_rejection(&notification, &err).await;
                return Err(err);
            }
        };
        self.call("update_session", self.store.update_session(&plan.after))
            .await?;
        drop(guard);

        info!(
            session_id = %plan.session_id,
            path = ?plan.path,
            change = ?plan.after.change,
            "change request applied"
        );
        let outcome = Outcome::Rescheduled {
            notification_id: notification.id.clone(),
            session: plan.after.clone(),
            previous: plan.before.interval,
        };
        let follow_up_failures = self.follow_up(Some(&notification.id), &outcome).await;
        Ok(Receipt {
            value: plan.after,
            follow_up_failures,
        })
    }

    /// Decline a change request: drop it from the queue and tell the sender.
    #[instrument(skip(self, notification_id), fields(notification_id = %notification_id))]
    pub async fn reject_change_request(
        &self,
        notification_id: &NotificationId,
    ) -> Result<Receipt<()>> {
        let notification = self.notification(notification_id).await?;
        change_request_of(&notification)?;
        self.call("remove_notification", self.queue.remove(notification_id))
            .await?;

        let outcome = Outcome::Rejected {
            notification_id: notification.id.clone(),
            practitioner: notification.practitioner().clone(),
            reason: "declined".to_string(),
            message: "change request declined".to_string(),
        };
        info!("change request declined");
        let follow_up_failures = self.follow_up(None, &outcome).await;
        Ok(Receipt {
            value: (),
            follow_up_failures,
        })
    }

    /// Remove a booking and announce the cancellation.
    #[instrument(skip(self, session_id), fields(session_id = %session_id))]
    pub async fn cancel_session(&self, session_id: &SessionId) -> Result<Receipt<SessionRecord>> {
        let session = self
            .call("get_session", self.store.get_session(session_id))
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("session {session_id}")))?;

        let guard = self
            .locks
            .acquire(session.practitioner_id(), self.config.lock_timeout())
            .await?;
        self.call("delete_session", self.store.delete_session(session_id))
            .await?;
        drop(guard);

        info!(practitioner = %session.practitioner.id, "session cancelled");
        let outcome = Outcome::Cancelled {
            session: session.clone(),
        };
        let follow_up_failures = self.follow_up(None, &outcome).await;
        Ok(Receipt {
            value: session,
            follow_up_failures,
        })
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Bound a collaborator call by the configured timeout.
    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let after = self.config.call_timeout();
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, ?after, "collaborator call timed out");
                Err(ScheduleError::Timeout { operation, after })
            }
        }
    }

    async fn load_index(
        &self,
        practitioner: &PractitionerId,
        range: DateRange,
        now: NaiveDateTime,
    ) -> Result<SessionIndex> {
        let records = self
            .call("list_sessions", self.store.list_sessions(practitioner, range))
            .await?;
        SessionIndex::from_records_as_of(records, now)
    }

    async fn notification(&self, id: &NotificationId) -> Result<Notification> {
        self.call("get_notification", self.queue.get(id))
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("notification {id}")))
    }

    async fn pending_changes_for(
        &self,
        practitioner: &PractitionerId,
    ) -> Result<Vec<ChangeRequestNotification>> {
        let pending = self.call("pending_notifications", self.queue.pending()).await?;
        Ok(pending
            .into_iter()
            .filter_map(|n| match n.kind {
                NotificationKind::ChangeRequest(c) if &c.practitioner.id == practitioner => Some(c),
                _ => None,
            })
            .collect())
    }

    /// Date of the session a change request points at, when knowable
    /// before matching.
    async fn original_date(&self, request: &ChangeRequestNotification) -> Result<Option<NaiveDate>> {
        if let Some(id) = &request.original_session_id {
            let session = self.call("get_session", self.store.get_session(id)).await?;
            return Ok(session.map(|s| s.date()));
        }
        Ok(timeparse::split_descriptor(&request.original_session)
            .and_then(|(date_text, _)| timeparse::parse_date(date_text)))
    }

    async fn roll_back(&self, created: &[SessionId]) {
        for id in created.iter().rev() {
            if let Err(err) = self
                .call("delete_session", self.store.delete_session(id))
                .await
            {
                error!(session_id = %id, error = %err, "rollback failed");
            }
        }
    }

    async fn notify_rejection(&self, notification: &Notification, err: &ScheduleError) {
        warn!(reason = err.label(), error = %err, "notification rejected");
        let outcome = Outcome::rejected(notification, err);
        if let Err(dispatch_err) = self
            .call("dispatch", self.dispatcher.dispatch(&outcome))
            .await
        {
            warn!(error = %dispatch_err, "rejection dispatch failed");
        }
    }

    async fn follow_up(
        &self,
        remove: Option<&NotificationId>,
        outcome: &Outcome,
    ) -> Vec<FollowUpFailure> {
        let mut failures = Vec::new();
        if let Some(id) = remove {
            if let Err(err) = self
                .call("remove_notification", self.queue.remove(id))
                .await
            {
                warn!(notification_id = %id, error = %err, "notification removal failed after commit");
                failures.push(FollowUpFailure {
                    step: FollowUpStep::RemoveNotification,
                    message: err.to_string(),
                });
            }
        }
        if let Err(err) = self.call("dispatch", self.dispatcher.dispatch(outcome)).await {
            warn!(outcome = outcome.label(), error = %err, "dispatch failed after commit");
            failures.push(FollowUpFailure {
                step: FollowUpStep::Dispatch,
                message: err.to_string(),
            });
        }
        failures
    }
}

/// One extra day each side, so sessions crossing midnight are seen.
fn widen(range: DateRange) -> DateRange {
    DateRange {
        start: range.start - Duration::days(1),
        end: range.end + Duration::days(1),
    }
}

fn availability_of(notification: &Notification) -> Result<&AvailabilityRequest> {
    match &notification.kind {
        NotificationKind::Availability(request) => Ok(request),
        NotificationKind::ChangeRequest(_) => Err(ScheduleError::InvalidNotification(format!(
            "notification {} is a change request, not an availability offer",
            notification.id
        ))),
    }
}

fn change_request_of(notification: &Notification) -> Result<&ChangeRequestNotification> {
    match &notification.kind {
        NotificationKind::ChangeRequest(request) => Ok(request),
        NotificationKind::Availability(_) => Err(ScheduleError::InvalidNotification(format!(
            "notification {} is an availability offer, not a change request",
            notification.id
        ))),
    }
}
