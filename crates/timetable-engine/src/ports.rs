//! Collaborator interfaces consumed by [`crate::service::SchedulingService`].

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Result, ScheduleError};
use crate::model::{
    BlockedDate, DateRange, Interval, Notification, NotificationId, Practitioner, PractitionerId,
    SessionId, SessionRecord,
};

/// Persistence for committed sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Sessions for `practitioner` starting on a date inside `range`.
    async fn list_sessions(
        &self,
        practitioner: &PractitionerId,
        range: DateRange,
    ) -> Result<Vec<SessionRecord>>;

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>>;

    /// Persist a new session; fails with [`ScheduleError::Duplicate`] if the
    /// id exists.
    async fn create_session(&self, record: &SessionRecord) -> Result<()>;

    /// Replace an existing session, keyed by its id.
    async fn update_session(&self, record: &SessionRecord) -> Result<()>;

    async fn delete_session(&self, id: &SessionId) -> Result<()>;

    /// Institution-wide closed dates inside `range`, ascending.
    async fn list_blocked_dates(&self, range: DateRange) -> Result<Vec<BlockedDate>>;
}

/// Inbound notifications awaiting a decision.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn pending(&self) -> Result<Vec<Notification>>;

    async fn get(&self, id: &NotificationId) -> Result<Option<Notification>>;

    async fn remove(&self, id: &NotificationId) -> Result<()>;
}

/// Outbound messaging, invoked after an operation succeeds or fails.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, outcome: &Outcome) -> Result<()>;
}

/// What happened, as told to the [`Dispatcher`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Committed {
        notification_id: NotificationId,
        practitioner: Practitioner,
        sessions: Vec<SessionRecord>,
    },
    Rescheduled {
        notification_id: NotificationId,
        session: SessionRecord,
        previous: Interval,
    },
    Rejected {
        notification_id: NotificationId,
        practitioner: Practitioner,
        reason: String,
        message: String,
    },
    Cancelled {
        session: SessionRecord,
    },
}

impl Outcome {
    pub fn rejected(notification: &Notification, error: &ScheduleError) -> Self {
        Outcome::Rejected {
            notification_id: notification.id.clone(),
            practitioner: notification.practitioner().clone(),
            reason: error.label().to_string(),
            message: error.to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Committed { .. } => "committed",
            Outcome::Rescheduled { .. } => "rescheduled",
            Outcome::Rejected { .. } => "rejected",
            Outcome::Cancelled { .. } => "cancelled",
        }
    }
}
