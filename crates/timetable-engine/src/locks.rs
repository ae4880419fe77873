//! Per-practitioner serialisation of check-then-commit sections.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{Result, ScheduleError};
use crate::model::PractitionerId;

/// One async mutex per practitioner, created on first use and dropped from
/// the table once the last holder or waiter lets go.
///
/// Writers for different practitioners never contend.
#[derive(Debug, Default)]
pub struct PractitionerLocks {
    locks: DashMap<PractitionerId, Arc<Mutex<()>>>,
}

impl PractitionerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for `practitioner`'s lock, for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Timeout`] if the lock is not obtained in time.
    pub async fn acquire(
        &self,
        practitioner: &PractitionerId,
        timeout: Duration,
    ) -> Result<PractitionerGuard<'_>> {
        // clone the Arc out so the shard guard is not held across the await
        let lock = self
            .locks
            .entry(practitioner.clone())
            .or_default()
            .value()
            .clone();
        let guard = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| ScheduleError::Timeout {
                operation: "practitioner lock",
                after: timeout,
            })?;
        debug!(practitioner = %practitioner, "practitioner lock acquired");
        Ok(PractitionerGuard {
            guard: Some(guard),
            practitioner: practitioner.clone(),
            locks: &self.locks,
        })
    }

    /// Number of practitioners currently holding or waiting for a lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds a practitioner's lock until dropped.
#[derive(Debug)]
pub struct PractitionerGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    practitioner: PractitionerId,
    locks: &'a DashMap<PractitionerId, Arc<Mutex<()>>>,
}

impl Drop for PractitionerGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // only the table's own handle left: nobody holds or waits
        self.locks
            .remove_if(&self.practitioner, |_, lock| Arc::strong_count(lock) == 1);
    }
}
