//! # timetable-engine
//!
//! Scheduling reconciliation for teaching timetables.
//!
//! The engine turns loosely-structured scheduling input (free-text times,
//! availability offers, change requests from correspondence) into a
//! consistent set of bookings per practitioner, and guarantees that no
//! practitioner is ever double-booked.
//!
//! ## Modules
//!
//! - [`timeparse`] — Free-text times → concrete intervals, with fallback flags
//! - [`index`] — Canonical in-memory booking store enforcing no-overlap
//! - [`conflict`] — Half-open overlap detection ignoring past bookings
//! - [`matcher`] — Change request → exactly one session (identifier, then structure)
//! - [`reconcile`] — All-or-nothing commit of availability and change requests
//! - [`freeblock`] — Open gaps inside a daily window, weekdays and open dates only
//! - [`service`] — Async facade: locking, timeouts, rollback, dispatch
//! - [`ports`] / [`memory`] — Collaborator interfaces and in-memory adapters
//! - [`config`] / [`clock`] — Engine settings and the evaluation instant
//! - [`error`] — Error types

pub mod clock;
pub mod config;
pub mod conflict;
pub mod error;
pub mod freeblock;
pub mod index;
pub mod locks;
pub mod matcher;
pub mod memory;
pub mod model;
pub mod ports;
pub mod reconcile;
pub mod service;
pub mod timeparse;
pub mod view;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use conflict::{first_conflict, first_conflict_in, Conflict};
pub use error::{Result, ScheduleError};
pub use freeblock::{
    free_blocks, free_blocks_excluding, free_blocks_for_day, free_blocks_in, DailyWindow, FreeBlock,
};
pub use index::SessionIndex;
pub use matcher::{MatchPath, SessionMatch, SessionMatcher};
pub use memory::{MemoryNotificationQueue, MemorySessionStore, RecordingDispatcher};
pub use model::{
    AvailabilityRequest, AvailabilitySlot, BlockedDate, ChangeRequestNotification, ChangeStatus,
    DateRange, Interval, Notification, NotificationId, NotificationKind, Practitioner,
    PractitionerId, SessionId, SessionPatch, SessionRecord, SlotTime,
};
pub use ports::{Dispatcher, NotificationQueue, Outcome, SessionStore};
pub use reconcile::{
    apply_change, plan_availability, plan_change, reconcile_availability, PlannedChange,
    PlannedSlot,
};
pub use service::{FollowUpFailure, FollowUpStep, Receipt, SchedulingService};
pub use timeparse::{
    normalize_token, parse_to_interval, split_range, Fallback, FallbackTimes, ParsedInterval,
};
pub use view::{BlockedDateView, FreeBlockView, ScheduleView, SessionView};
