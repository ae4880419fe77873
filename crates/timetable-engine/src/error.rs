//! Error types for timetable-engine operations.

use std::time::Duration;

use thiserror::Error;

use crate::conflict::Conflict;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Unresolved reference: {reason}")]
    UnresolvedReference { reason: String },

    #[error("{}", describe_conflict(.slot, .blocking))]
    SchedulingConflict {
        /// Zero-based position of the offending candidate in a batch, if any.
        slot: Option<usize>,
        blocking: Box<Conflict>,
    },

    #[error("Slot count mismatch: {required} slot(s) required, {selected} selected")]
    SlotCountMismatch { required: usize, selected: usize },

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Timed out after {after:?} during {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScheduleError {
    pub(crate) fn conflict(slot: Option<usize>, blocking: Conflict) -> Self {
        ScheduleError::SchedulingConflict {
            slot,
            blocking: Box::new(blocking),
        }
    }

    pub(crate) fn unresolved(reason: impl Into<String>) -> Self {
        ScheduleError::UnresolvedReference {
            reason: reason.into(),
        }
    }

    /// Stable label for structured logs and dispatched outcomes.
    pub fn label(&self) -> &'static str {
        match self {
            ScheduleError::UnresolvedReference { .. } => "unresolved_reference",
            ScheduleError::SchedulingConflict { .. } => "scheduling_conflict",
            ScheduleError::SlotCountMismatch { .. } => "slot_count_mismatch",
            ScheduleError::InvalidInterval(_) => "invalid_interval",
            ScheduleError::NotFound(_) => "not_found",
            ScheduleError::Duplicate(_) => "duplicate",
            ScheduleError::InvalidNotification(_) => "invalid_notification",
            ScheduleError::Store(_) => "store",
            ScheduleError::Timeout { .. } => "timeout",
            ScheduleError::Config(_) => "config",
        }
    }
}

fn describe_conflict(slot: &Option<usize>, blocking: &Conflict) -> String {
    let prefix = match slot {
        Some(index) => format!("Slot {} conflicts", index + 1),
        None => "Conflicts".to_string(),
    };
    format!(
        "{prefix} with \"{}\" ({}) at {}",
        blocking.title,
        blocking.interval,
        if blocking.location.is_empty() {
            "an unspecified location"
        } else {
            blocking.location.as_str()
        }
    )
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
