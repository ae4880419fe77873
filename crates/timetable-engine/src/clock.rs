//! Source of the evaluation instant.
//!
//! Engine functions take `now` explicitly; the service asks a [`Clock`] and
//! converts to local wall-clock time in the configured timezone.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, ScheduleError};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current wall-clock time in `tz`.
    fn now_local(&self, tz: Tz) -> NaiveDateTime {
        self.now_utc().with_timezone(&tz).naive_local()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Freeze at a local wall-clock time in `tz`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidInterval`] if `local` falls in a
    /// daylight-saving gap. Ambiguous times resolve to the earlier instant.
    pub fn at_local(local: NaiveDateTime, tz: Tz) -> Result<Self> {
        tz.from_local_datetime(&local)
            .earliest()
            .map(|dt| FixedClock(dt.with_timezone(&Utc)))
            .ok_or_else(|| {
                ScheduleError::InvalidInterval(format!("{local} does not exist in {tz}"))
            })
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}
