//! End-to-end behaviour of `SchedulingService` over the in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use timetable_engine::{
    AvailabilityRequest, AvailabilitySlot, BlockedDate, ChangeRequestNotification, ChangeStatus,
    DateRange, EngineConfig, FixedClock, FollowUpStep, Interval, MemoryNotificationQueue,
    MemorySessionStore, Notification, NotificationId, NotificationKind, Outcome, Practitioner,
    PractitionerId, RecordingDispatcher, ScheduleError, SchedulingService, SessionId,
    SessionRecord,
};

fn march(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
}

fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    march(day).and_hms_opt(h, m, 0).unwrap()
}

fn lim() -> Practitioner {
    Practitioner {
        id: PractitionerId::from("M123"),
        name: "Lim".to_string(),
        email: "lim@example.org".to_string(),
    }
}

fn session(id: &str, title: &str, start: NaiveDateTime, end: NaiveDateTime) -> SessionRecord {
    SessionRecord {
        id: SessionId::from(id),
        title: title.to_string(),
        practitioner: lim(),
        interval: Interval::new(start, end).unwrap(),
        location: "Level 3 Seminar Room".to_string(),
        students: "Tan (NUS)".to_string(),
        change: ChangeStatus::None,
        original_time: None,
        change_reason: None,
        cancelled: false,
    }
}

fn offer(id: &str, required: usize) -> Notification {
    Notification {
        id: NotificationId::from(id),
        kind: NotificationKind::Availability(AvailabilityRequest {
            title: "Bedside Tutorial".to_string(),
            practitioner: lim(),
            location: "Ward 7".to_string(),
            students: "Ng (NTU)".to_string(),
            required_slots: required,
        }),
    }
}

fn change(id: &str, title: &str, original: &str, proposed: &str, session_id: Option<&str>) -> Notification {
    Notification {
        id: NotificationId::from(id),
        kind: NotificationKind::ChangeRequest(ChangeRequestNotification {
            session_title: title.to_string(),
            practitioner: lim(),
            original_session: original.to_string(),
            proposed_session: proposed.to_string(),
            reason: "Theatre list overran".to_string(),
            original_session_id: session_id.map(SessionId::from),
        }),
    }
}

struct Harness {
    store: Arc<MemorySessionStore>,
    queue: Arc<MemoryNotificationQueue>,
    dispatcher: Arc<RecordingDispatcher>,
    service: SchedulingService,
}

fn harness_with(
    config: EngineConfig,
    sessions: Vec<SessionRecord>,
    notifications: Vec<Notification>,
) -> Harness {
    build(config, at(1, 8, 0), sessions, notifications)
}

/// A harness whose clock reads `now`.
fn harness_at(
    now: NaiveDateTime,
    sessions: Vec<SessionRecord>,
    notifications: Vec<Notification>,
) -> Harness {
    build(EngineConfig::default(), now, sessions, notifications)
}

fn build(
    config: EngineConfig,
    now: NaiveDateTime,
    sessions: Vec<SessionRecord>,
    notifications: Vec<Notification>,
) -> Harness {
    let store = Arc::new(MemorySessionStore::with_records(sessions));
    let queue = Arc::new(MemoryNotificationQueue::with_notifications(notifications));
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let tz = config.tz().unwrap();
    let clock = FixedClock::at_local(now, tz).unwrap();
    let service = SchedulingService::new(store.clone(), queue.clone(), dispatcher.clone(), config)
        .unwrap()
        .with_clock(Arc::new(clock));
    Harness {
        store,
        queue,
        dispatcher,
        service,
    }
}

fn harness(sessions: Vec<SessionRecord>, notifications: Vec<Notification>) -> Harness {
    harness_with(EngineConfig::default(), sessions, notifications)
}

#[tokio::test]
async fn test_change_request_conflicting_with_teaching_round() {
    let h = harness(
        vec![
            session("s-ctr", "Clinical Teaching Round", at(18, 9, 0), at(18, 10, 0)),
            session("s-gwr", "Grand Ward Round", at(18, 14, 0), at(18, 15, 0)),
        ],
        vec![change(
            "n-1",
            "Grand Ward Round",
            "18 March 2025 2:00PM - 3:00PM",
            "18 March 2025 9:30AM - 10:30AM",
            Some("s-gwr"),
        )],
    );

    let err = h
        .service
        .resolve_change_request(&NotificationId::from("n-1"), None)
        .await
        .unwrap_err();
    match &err {
        ScheduleError::SchedulingConflict { blocking, .. } => {
            assert_eq!(blocking.title, "Clinical Teaching Round");
            assert_eq!(blocking.location, "Level 3 Seminar Room");
        }
        other => panic!("unexpected error: {other}"),
    }

    let untouched = h.store.snapshot();
    assert!(untouched.iter().all(|s| s.change == ChangeStatus::None));
    assert_eq!(h.queue.len(), 1);
    assert!(matches!(
        h.dispatcher.sent().as_slice(),
        [Outcome::Rejected { reason, .. }] if reason == "scheduling_conflict"
    ));
}

#[tokio::test]
async fn test_availability_batch_is_all_or_nothing() {
    let h = harness(
        vec![session("s-1", "Ward Round", at(19, 14, 0), at(19, 15, 0))],
        vec![offer("n-1", 3)],
    );
    let slots = vec![
        AvailabilitySlot::text(march(18), "2pm-3pm"),
        AvailabilitySlot::text(march(19), "2:30pm-3:30pm"),
        AvailabilitySlot::text(march(20), "2pm-3pm"),
    ];

    let err = h
        .service
        .submit_availability(&NotificationId::from("n-1"), &slots)
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::SchedulingConflict { slot: Some(1), .. }));
    assert!(err.to_string().starts_with("Slot 2 conflicts with \"Ward Round\""), "got: {err}");
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.queue.len(), 1);
}

#[tokio::test]
async fn test_availability_count_mismatch() {
    let h = harness(vec![], vec![offer("n-1", 2)]);
    let err = h
        .service
        .submit_availability(
            &NotificationId::from("n-1"),
            &[AvailabilitySlot::text(march(18), "9 to 10")],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScheduleError::SlotCountMismatch {
            required: 2,
            selected: 1
        }
    ));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_availability_commit_removes_notification_and_dispatches() {
    let h = harness(vec![], vec![offer("n-1", 2)]);
    let slots = vec![
        AvailabilitySlot::text(march(18), "9 to 10"),
        AvailabilitySlot::text(march(19), "3pm to 4pm"),
    ];
    let receipt = h
        .service
        .submit_availability(&NotificationId::from("n-1"), &slots)
        .await
        .unwrap();

    assert!(receipt.is_clean());
    assert_eq!(receipt.value.len(), 2);
    assert_eq!(receipt.value[1].interval.start(), at(19, 15, 0));
    assert_eq!(h.store.len(), 2);
    assert!(h.queue.is_empty());
    assert!(matches!(
        h.dispatcher.sent().as_slice(),
        [Outcome::Committed { sessions, .. }] if sessions.len() == 2
    ));
}

#[tokio::test]
async fn test_partial_store_failure_rolls_back() {
    let h = harness(vec![], vec![offer("n-1", 3)]);
    h.store.fail_creates_after(2);
    let slots = vec![
        AvailabilitySlot::text(march(18), "9 to 10"),
        AvailabilitySlot::text(march(19), "9 to 10"),
        AvailabilitySlot::text(march(20), "9 to 10"),
    ];
    let err = h
        .service
        .submit_availability(&NotificationId::from("n-1"), &slots)
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::Store(_)));
    assert!(h.store.is_empty(), "partial creates must be rolled back");
    assert_eq!(h.queue.len(), 1);
    assert!(h.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn test_dispatch_failure_keeps_commit() {
    let h = harness(vec![], vec![offer("n-1", 1)]);
    h.dispatcher.fail_dispatch(true);
    let receipt = h
        .service
        .submit_availability(
            &NotificationId::from("n-1"),
            &[AvailabilitySlot::text(march(18), "9 to 10")],
        )
        .await
        .unwrap();

    assert_eq!(h.store.len(), 1);
    assert!(h.queue.is_empty());
    assert_eq!(receipt.follow_up_failures.len(), 1);
    assert_eq!(receipt.follow_up_failures[0].step, FollowUpStep::Dispatch);
}

#[tokio::test]
async fn test_queue_removal_failure_is_reported() {
    let h = harness(vec![], vec![offer("n-1", 1)]);
    h.queue.fail_removals(true);
    let receipt = h
        .service
        .submit_availability(
            &NotificationId::from("n-1"),
            &[AvailabilitySlot::text(march(18), "9 to 10")],
        )
        .await
        .unwrap();
    assert_eq!(h.store.len(), 1);
    assert_eq!(
        receipt.follow_up_failures[0].step,
        FollowUpStep::RemoveNotification
    );
    // dispatch still ran
    assert_eq!(h.dispatcher.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acceptances_for_one_practitioner_serialise() {
    let h = harness(vec![], vec![offer("n-1", 1), offer("n-2", 1)]);
    h.store.set_latency(Some(Duration::from_millis(20)));
    let service = Arc::new(h.service);

    let tasks: Vec<_> = ["n-1", "n-2"]
        .into_iter()
        .map(|id| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let slots = [AvailabilitySlot::text(march(18), "2pm to 3pm")];
                service
                    .submit_availability(&NotificationId::from(id), &slots)
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => committed += 1,
            Err(ScheduleError::SchedulingConflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((committed, conflicts), (1, 1));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let config = EngineConfig {
        call_timeout_ms: 10,
        ..EngineConfig::default()
    };
    let h = harness_with(config, vec![], vec![offer("n-1", 1)]);
    h.store.set_latency(Some(Duration::from_millis(200)));
    let err = h
        .service
        .submit_availability(
            &NotificationId::from("n-1"),
            &[AvailabilitySlot::text(march(18), "9 to 10")],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScheduleError::Timeout {
            operation: "list_sessions",
            ..
        }
    ));
}

#[tokio::test]
async fn test_identifier_preferred_over_diverged_title() {
    let h = harness(
        vec![
            session("s-1", "Renamed Tutorial", at(18, 9, 0), at(18, 10, 0)),
            session("s-2", "Bedside Tutorial", at(18, 11, 0), at(18, 12, 0)),
        ],
        vec![change(
            "n-1",
            "Bedside Tutorial",
            "18 March 2025 11:00AM - 12:00PM",
            "20 March 2025 9:00AM - 10:00AM",
            Some("s-1"),
        )],
    );
    let receipt = h
        .service
        .resolve_change_request(&NotificationId::from("n-1"), None)
        .await
        .unwrap();
    assert_eq!(receipt.value.id, SessionId::from("s-1"));
    assert_eq!(receipt.value.change, ChangeStatus::Rescheduled);

    let stored = h.store.snapshot();
    let moved = stored.iter().find(|s| s.id == SessionId::from("s-1")).unwrap();
    assert_eq!(moved.interval.start(), at(20, 9, 0));
    assert_eq!(moved.original_time.unwrap().start(), at(18, 9, 0));
    let other = stored.iter().find(|s| s.id == SessionId::from("s-2")).unwrap();
    assert_eq!(other.interval.start(), at(18, 11, 0));
}

#[tokio::test]
async fn test_explicit_proposed_slot_resizes_session() {
    let h = harness(
        vec![session("s-1", "Clinical Teaching Round", at(18, 9, 0), at(18, 10, 0))],
        vec![change(
            "n-1",
            "clinical teaching round",
            "Tuesday, 18 March 2025 9 to 10",
            "",
            None,
        )],
    );
    let proposed = AvailabilitySlot::text(march(18), "9am - 11am");
    let receipt = h
        .service
        .resolve_change_request(&NotificationId::from("n-1"), Some(&proposed))
        .await
        .unwrap();
    assert_eq!(receipt.value.change, ChangeStatus::Resized);
    assert_eq!(receipt.value.interval.end(), at(18, 11, 0));
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_unresolved_change_request() {
    let h = harness(
        vec![session("s-1", "Round", at(18, 9, 0), at(18, 10, 0))],
        vec![change(
            "n-1",
            "Round",
            "19 March 2025 9:00AM - 10:00AM",
            "20 March 2025 9:00AM - 10:00AM",
            None,
        )],
    );
    let err = h
        .service
        .resolve_change_request(&NotificationId::from("n-1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::UnresolvedReference { .. }));
    assert_eq!(err.label(), "unresolved_reference");
}

#[tokio::test]
async fn test_wrong_notification_kind() {
    let h = harness(vec![], vec![offer("n-1", 1)]);
    let err = h
        .service
        .resolve_change_request(&NotificationId::from("n-1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::InvalidNotification(_)));

    let err = h
        .service
        .submit_availability(&NotificationId::from("missing"), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::NotFound(_)));
}

#[tokio::test]
async fn test_reject_change_request() {
    let h = harness(
        vec![session("s-1", "Round", at(18, 9, 0), at(18, 10, 0))],
        vec![change(
            "n-1",
            "Round",
            "18 March 2025 9:00AM - 10:00AM",
            "20 March 2025 9:00AM - 10:00AM",
            None,
        )],
    );
    h.service
        .reject_change_request(&NotificationId::from("n-1"))
        .await
        .unwrap();
    assert!(h.queue.is_empty());
    assert_eq!(h.store.snapshot()[0].interval.start(), at(18, 9, 0));
    assert!(matches!(
        h.dispatcher.sent().as_slice(),
        [Outcome::Rejected { reason, .. }] if reason == "declined"
    ));
}

#[tokio::test]
async fn test_query_flags_pending_change_and_derives_free_blocks() {
    let h = harness(
        vec![
            session("s-1", "Clinical Teaching Round", at(18, 9, 0), at(18, 10, 0)),
            session("s-2", "Ward Round", at(19, 8, 0), at(19, 8, 30)),
        ],
        vec![change(
            "n-1",
            "Clinical Teaching Round",
            "18 March 2025 9:00AM - 10:00AM",
            "20 March 2025 9:00AM - 10:00AM",
            None,
        )],
    );
    let view = h
        .service
        .query(&PractitionerId::from("M123"), DateRange::new(march(18), march(19)).unwrap())
        .await
        .unwrap();

    assert_eq!(view.sessions.len(), 2);
    assert!(view.sessions[0].pending_change);
    assert!(!view.sessions[1].pending_change);
    assert_eq!(view.sessions[0].date_display, "Tuesday, 18 March 2025");

    let blocks: Vec<_> = view
        .free_blocks
        .iter()
        .map(|b| (b.block.start, b.block.end))
        .collect();
    assert_eq!(
        blocks,
        vec![
            (at(18, 8, 0), at(18, 9, 0)),
            (at(19, 8, 30), at(19, 10, 0)),
        ]
    );
    assert_eq!(view.free_blocks[0].time_display, "8:00AM - 9:00AM");
}

#[tokio::test]
async fn test_cancel_session_frees_its_time() {
    let h = harness(
        vec![session("s-1", "Round", at(18, 8, 0), at(18, 10, 0))],
        vec![],
    );
    let receipt = h
        .service
        .cancel_session(&SessionId::from("s-1"))
        .await
        .unwrap();
    assert_eq!(receipt.value.title, "Round");
    assert!(h.store.is_empty());
    assert!(matches!(h.dispatcher.sent().as_slice(), [Outcome::Cancelled { .. }]));

    let view = h
        .service
        .query(&PractitionerId::from("M123"), DateRange::single(march(18)))
        .await
        .unwrap();
    assert_eq!(view.free_blocks.len(), 1);

    let err = h
        .service
        .cancel_session(&SessionId::from("s-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::NotFound(_)));
}

#[tokio::test]
async fn test_booking_over_ended_session_stays_readable() {
    let h = harness_at(
        at(18, 10, 0),
        vec![session("s-1", "Round", at(18, 9, 0), at(18, 10, 0))],
        vec![offer("n-1", 1)],
    );
    let receipt = h
        .service
        .submit_availability(
            &NotificationId::from("n-1"),
            &[AvailabilitySlot::text(march(18), "9:30am-10:30am")],
        )
        .await
        .unwrap();
    assert_eq!(receipt.value.len(), 1);
    assert_eq!(h.store.len(), 2);

    let view = h
        .service
        .query(&PractitionerId::from("M123"), DateRange::single(march(18)))
        .await
        .unwrap();
    let titles: Vec<_> = view.sessions.iter().map(|s| s.session.title.as_str()).collect();
    assert_eq!(titles, vec!["Round", "Bedside Tutorial"]);
    assert_eq!(view.free_blocks.len(), 1);
    assert!(view.free_blocks[0].block.is_past);

    // the day also stays writable
    h.queue.push(offer("n-2", 1));
    h.service
        .submit_availability(
            &NotificationId::from("n-2"),
            &[AvailabilitySlot::text(march(18), "11am-12pm")],
        )
        .await
        .unwrap();
    assert_eq!(h.store.len(), 3);
}

#[tokio::test]
async fn test_change_onto_ended_session_stays_readable() {
    let h = harness_at(
        at(18, 10, 0),
        vec![
            session("s-1", "Round", at(18, 9, 0), at(18, 10, 0)),
            session("s-2", "Grand Ward Round", at(18, 14, 0), at(18, 15, 0)),
        ],
        vec![change(
            "n-1",
            "Grand Ward Round",
            "18 March 2025 2:00PM - 3:00PM",
            "18 March 2025 9:30AM - 10:30AM",
            Some("s-2"),
        )],
    );
    let receipt = h
        .service
        .resolve_change_request(&NotificationId::from("n-1"), None)
        .await
        .unwrap();
    assert_eq!(receipt.value.interval.start(), at(18, 9, 30));

    let view = h
        .service
        .query(&PractitionerId::from("M123"), DateRange::single(march(18)))
        .await
        .unwrap();
    assert_eq!(view.sessions.len(), 2);
}

#[tokio::test]
async fn test_query_skips_blocked_dates() {
    let h = harness(
        vec![session("s-1", "Round", at(19, 8, 0), at(19, 9, 0))],
        vec![],
    );
    h.store.block_dates([BlockedDate {
        date: march(18),
        remark: "HOR Week".to_string(),
    }]);
    let view = h
        .service
        .query(&PractitionerId::from("M123"), DateRange::new(march(17), march(19)).unwrap())
        .await
        .unwrap();

    let days: Vec<_> = view.free_blocks.iter().map(|b| b.block.date).collect();
    assert_eq!(days, vec![march(17), march(19)]);
    assert_eq!(view.blocked_dates.len(), 1);
    assert_eq!(view.blocked_dates[0].blocked.remark, "HOR Week");
    assert_eq!(view.blocked_dates[0].date_display, "Tuesday, 18 March 2025");
    assert_eq!(view.sessions.len(), 1);
}
