//! In-memory collaborator adapters for tests, demos and the CLI.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;

use crate::error::{Result, ScheduleError};
use crate::model::{
    BlockedDate, DateRange, Notification, NotificationId, PractitionerId, SessionId,
    SessionRecord,
};
use crate::ports::{Dispatcher, NotificationQueue, Outcome, SessionStore};

/// Failure injection shared by the adapters.
#[derive(Debug, Default)]
struct Faults {
    /// Successful creates still allowed before creates start failing.
    creates_left: Option<usize>,
    fail_updates: bool,
    fail_deletes: bool,
    latency: Option<Duration>,
}

/// Session store held in a map, optionally seeded from JSON.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<BTreeMap<SessionId, SessionRecord>>,
    blocked: RwLock<BTreeSet<BlockedDate>>,
    faults: Mutex<Faults>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ScheduleError::Store(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| ScheduleError::Store(format!("{}: {e}", path.display())))
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = SessionRecord>) -> Self {
        let store = Self::new();
        store
            .sessions
            .write()
            .extend(records.into_iter().map(|r| (r.id.clone(), r)));
        store
    }

    /// Load a JSON array of sessions.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let records: Vec<SessionRecord> = read_json(path.as_ref())?;
        Ok(Self::with_records(records))
    }

    /// Close dates to teaching. A repeated (date, remark) pair is kept once.
    pub fn block_dates(&self, dates: impl IntoIterator<Item = BlockedDate>) {
        self.blocked.write().extend(dates);
    }

    /// Add the blocked dates in a JSON array of `{"date", "remark"}`.
    pub fn load_blocked_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let dates: Vec<BlockedDate> = read_json(path.as_ref())?;
        self.block_dates(dates);
        Ok(())
    }

    /// Write every session as a JSON array, ordered by id.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| ScheduleError::Store(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| ScheduleError::Store(format!("{}: {e}", path.display())))
    }

    /// Every stored session, ordered by id.
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Let `n` more creates succeed, then fail every create after that.
    pub fn fail_creates_after(&self, n: usize) {
        self.faults.lock().creates_left = Some(n);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.faults.lock().fail_updates = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.faults.lock().fail_deletes = fail;
    }

    /// Delay every call, to exercise timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.lock().latency = latency;
    }

    async fn pause(&self) {
        let latency = self.faults.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn list_sessions(
        &self,
        practitioner: &PractitionerId,
        range: DateRange,
    ) -> Result<Vec<SessionRecord>> {
        self.pause().await;
        let mut found: Vec<SessionRecord> = self
            .sessions
            .read()
            .values()
            .filter(|s| &s.practitioner.id == practitioner && range.contains(s.date()))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.interval.start());
        Ok(found)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        self.pause().await;
        Ok(self.sessions.read().get(id).cloned())
    }

    async fn create_session(&self, record: &SessionRecord) -> Result<()> {
        self.pause().await;
        {
            let mut faults = self.faults.lock();
            match faults.creates_left {
                Some(0) => {
                    return Err(ScheduleError::Store(format!(
                        "create of session {} refused",
                        record.id
                    )))
                }
                Some(ref mut left) => *left -= 1,
                None => {}
            }
        }
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&record.id) {
            return Err(ScheduleError::Duplicate(format!("session {}", record.id)));
        }
        sessions.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_session(&self, record: &SessionRecord) -> Result<()> {
        self.pause().await;
        if self.faults.lock().fail_updates {
            return Err(ScheduleError::Store(format!(
                "update of session {} refused",
                record.id
            )));
        }
        match self.sessions.write().get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(ScheduleError::NotFound(format!("session {}", record.id))),
        }
    }

    async fn delete_session(&self, id: &SessionId) -> Result<()> {
        self.pause().await;
        if self.faults.lock().fail_deletes {
            return Err(ScheduleError::Store(format!("delete of session {id} refused")));
        }
        self.sessions
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ScheduleError::NotFound(format!("session {id}")))
    }

    async fn list_blocked_dates(&self, range: DateRange) -> Result<Vec<BlockedDate>> {
        self.pause().await;
        Ok(self
            .blocked
            .read()
            .iter()
            .filter(|b| range.contains(b.date))
            .cloned()
            .collect())
    }
}

/// FIFO notification queue.
#[derive(Debug, Default)]
pub struct MemoryNotificationQueue {
    items: RwLock<Vec<Notification>>,
    fail_removals: Mutex<bool>,
}

impl MemoryNotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifications(items: impl IntoIterator<Item = Notification>) -> Self {
        let queue = Self::new();
        queue.items.write().extend(items);
        queue
    }

    pub fn push(&self, notification: Notification) {
        self.items.write().push(notification);
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn fail_removals(&self, fail: bool) {
        *self.fail_removals.lock() = fail;
    }
}

#[async_trait]
impl NotificationQueue for MemoryNotificationQueue {
    async fn pending(&self) -> Result<Vec<Notification>> {
        Ok(self.items.read().clone())
    }

    async fn get(&self, id: &NotificationId) -> Result<Option<Notification>> {
        Ok(self.items.read().iter().find(|n| &n.id == id).cloned())
    }

    async fn remove(&self, id: &NotificationId) -> Result<()> {
        if *self.fail_removals.lock() {
            return Err(ScheduleError::Store(format!("removal of notification {id} refused")));
        }
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|n| &n.id != id);
        if items.len() == before {
            return Err(ScheduleError::NotFound(format!("notification {id}")));
        }
        Ok(())
    }
}

/// Dispatcher that records every outcome it is handed.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Outcome>>,
    fail: Mutex<bool>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later dispatch fail after recording the attempt.
    pub fn fail_dispatch(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn sent(&self) -> Vec<Outcome> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, outcome: &Outcome) -> Result<()> {
        self.sent.lock().push(outcome.clone());
        if *self.fail.lock() {
            return Err(ScheduleError::Store(format!(
                "dispatch of {} outcome failed",
                outcome.label()
            )));
        }
        Ok(())
    }
}
