use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::cache::FallbackCache;
use crate::cache::tests::DownCache;
use crate::directory::User;
use crate::model::tests::at;
use crate::notify::SinkError;

// ── Fixtures ─────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roombook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct Fixture {
    engine: Arc<Engine>,
    directory: Arc<InMemoryDirectory>,
    hub: Arc<NotifyHub>,
    room: Room,
    user: Ulid,
    admin: Ulid,
    path: PathBuf,
}

impl Fixture {
    fn new(name: &str) -> Self {
        Self::with(name, |deps| deps)
    }

    fn with(name: &str, wire: impl FnOnce(Collaborators) -> Collaborators) -> Self {
        let path = test_wal_path(name);
        let directory = Arc::new(InMemoryDirectory::new());
        let room = Room::new("A101", 30, "Block A");
        directory.add_room(room.clone()).unwrap();
        let user = Ulid::new();
        let admin = Ulid::new();
        directory.add_user(User {
            id: user,
            username: "student".into(),
        });
        directory.add_user(User {
            id: admin,
            username: "admin".into(),
        });
        let hub = Arc::new(NotifyHub::new());
        let deps = wire(Collaborators::in_memory(directory.clone(), hub.clone()));
        let engine = Engine::new(path.clone(), deps, Duration::from_secs(30)).unwrap();
        Self {
            engine: Arc::new(engine),
            directory,
            hub,
            room,
            user,
            admin,
            path,
        }
    }

    /// A fresh engine over the same journal and directory.
    fn reopen(&self) -> Engine {
        Engine::new(
            self.path.clone(),
            Collaborators::in_memory(self.directory.clone(), self.hub.clone()),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    async fn book(
        &self,
        start: Timestamp,
        end: Timestamp,
        policy: CreationPolicy,
    ) -> Result<Booking, EngineError> {
        self.engine
            .create_booking(self.room.id, self.user, start, end, "seminar", policy)
            .await
    }
}

struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn emit(&self, _notification: Notification) -> Result<(), SinkError> {
        Err(SinkError::Unavailable("mail relay down".into()))
    }
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn approved_booking_blocks_touching_slot() {
    let f = Fixture::new("touching_slot.wal");
    f.book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();

    let err = f
        .book(at("2099-01-05", "10:00"), at("2099-01-05", "11:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotUnavailable(_)));

    let touching = f
        .engine
        .is_available(f.room.id, at("2099-01-05", "10:00"), at("2099-01-05", "11:00"), None)
        .await
        .unwrap();
    assert!(!touching);
    let after = f
        .engine
        .is_available(f.room.id, at("2099-01-05", "10:01"), at("2099-01-05", "11:00"), None)
        .await
        .unwrap();
    assert!(after);
}

#[tokio::test]
async fn pending_bookings_do_not_block() {
    let f = Fixture::new("pending_no_block.wal");
    let first = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    let second = f
        .book(at("2099-01-05", "09:30"), at("2099-01-05", "10:30"), CreationPolicy::Moderated)
        .await
        .unwrap();
    assert_eq!(first.status, BookingStatus::Pending);

    f.engine.approve(first.id, f.admin).await.unwrap();
    let err = f.engine.approve(second.id, f.admin).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotUnavailable(id) if id == first.id));
    assert_eq!(
        f.engine.get_booking(second.id).await.unwrap().status,
        BookingStatus::Pending
    );
}

#[tokio::test]
async fn availability_input_errors() {
    let f = Fixture::new("availability_errors.wal");
    let err = f
        .engine
        .is_available(Ulid::new(), at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RoomNotFound(_)));

    let err = f
        .engine
        .is_available(f.room.id, at("2099-01-05", "10:00"), at("2099-01-05", "10:00"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInterval { .. }));

    let err = f
        .engine
        .is_available(f.room.id, at("2000-01-05", "09:00"), at("2000-01-05", "10:00"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PastBooking(_)));
}

#[tokio::test]
async fn switched_off_room_is_unavailable() {
    let f = Fixture::new("switched_off.wal");
    f.directory.set_available(f.room.id, false).unwrap();

    let free = f
        .engine
        .is_available(f.room.id, at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), None)
        .await
        .unwrap();
    assert!(!free);
    let err = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RoomUnavailable(_)));
    assert!(
        f.engine
            .available_rooms(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn available_rooms_skips_booked_rooms() {
    let f = Fixture::new("available_rooms.wal");
    let other = Room::new("B202", 12, "Block B");
    f.directory.add_room(other.clone()).unwrap();
    f.book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();

    let free = f
        .engine
        .available_rooms(at("2099-01-05", "09:30"), at("2099-01-05", "11:00"))
        .await
        .unwrap();
    assert_eq!(free, vec![other]);
}

#[tokio::test]
async fn randomized_approvals_never_overlap() {
    let f = Fixture::new("randomized_no_overlap.wal");
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let day = at("2099-02-01", "00:00");

    for _ in 0..300 {
        let start = day + chrono::Duration::minutes(rng.gen_range(0..(3 * 24 * 60)));
        let end = start + chrono::Duration::minutes(rng.gen_range(15..240));
        let policy = if rng.gen_bool(0.5) {
            CreationPolicy::AutoApprove
        } else {
            CreationPolicy::Moderated
        };
        match f.book(start, end, policy).await {
            Ok(b) if b.status == BookingStatus::Pending && rng.gen_bool(0.5) => {
                let _ = f.engine.approve(b.id, f.admin).await;
            }
            Ok(_) | Err(EngineError::SlotUnavailable(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let approved = f
        .engine
        .list_bookings(BookingFilter::default().status(BookingStatus::Approved))
        .await;
    assert!(!approved.is_empty());
    for (i, a) in approved.iter().enumerate() {
        for b in &approved[i + 1..] {
            assert!(
                !a.span().conflicts_with(&b.span()),
                "{a:?} overlaps {b:?}"
            );
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn create_validates_inputs() {
    let f = Fixture::new("create_validates.wal");
    let err = f
        .engine
        .create_booking(
            Ulid::new(),
            f.user,
            at("2099-01-05", "09:00"),
            at("2099-01-05", "10:00"),
            "",
            CreationPolicy::Moderated,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RoomNotFound(_)));

    let err = f
        .engine
        .create_booking(
            f.room.id,
            Ulid::new(),
            at("2099-01-05", "09:00"),
            at("2099-01-05", "10:00"),
            "",
            CreationPolicy::Moderated,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UserNotFound(_)));

    let err = f
        .book(at("2099-01-05", "11:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInterval { .. }));

    let err = f
        .book(at("2001-01-05", "09:00"), at("2001-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PastBooking(_)));

    let err = f
        .engine
        .create_booking(
            f.room.id,
            f.user,
            at("2099-01-05", "09:00"),
            at("2099-01-05", "10:00"),
            "x".repeat(crate::limits::MAX_REASON_LEN + 1),
            CreationPolicy::Moderated,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    assert!(f.engine.list_bookings(BookingFilter::default()).await.is_empty());
}

#[tokio::test]
async fn terminal_states_stay_terminal() {
    let f = Fixture::new("terminal.wal");
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    f.engine.cancel(b.id, f.user).await.unwrap();

    for target in [
        BookingStatus::Cancelled,
        BookingStatus::Rejected,
        BookingStatus::Approved,
        BookingStatus::Pending,
    ] {
        let err = f
            .engine
            .change_status(b.id, target, Some("late".into()), f.admin)
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                EngineError::InvalidStatusTransition { from: BookingStatus::Cancelled, .. }
            ),
            "{target}: {err}"
        );
    }
    let err = f
        .engine
        .reschedule_booking(b.id, at("2099-01-06", "09:00"), at("2099-01-06", "10:00"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidStatusTransition { .. }));
    assert_eq!(
        f.engine.get_booking(b.id).await.unwrap().status,
        BookingStatus::Cancelled
    );
}

#[tokio::test]
async fn rejected_bookings_stay_rejected() {
    let f = Fixture::new("terminal_rejected.wal");
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    f.engine.reject(b.id, f.admin, Some("exam week".into())).await.unwrap();

    let err = f.engine.cancel(b.id, f.user).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidStatusTransition {
            from: BookingStatus::Rejected,
            to: BookingStatus::Cancelled
        }
    ));
    let err = f
        .engine
        .reject(b.id, f.admin, Some("again".into()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidStatusTransition { from: BookingStatus::Rejected, .. }
    ));
    let err = f.engine.approve(b.id, f.admin).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidStatusTransition { from: BookingStatus::Rejected, .. }
    ));
    let err = f
        .engine
        .reschedule_booking(b.id, at("2099-01-06", "09:00"), at("2099-01-06", "10:00"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidStatusTransition { from: BookingStatus::Rejected, .. }
    ));

    let stored = f.engine.get_booking(b.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Rejected);
    assert_eq!(stored.start, at("2099-01-05", "09:00"));
    assert_eq!(f.engine.rejection_record(b.id).unwrap().reason, "exam week");
    assert_eq!(f.engine.rejection_records().len(), 1);
}

#[tokio::test]
async fn cancelling_an_approved_booking_frees_the_slot() {
    let f = Fixture::new("cancel_approved.wal");
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();
    assert_eq!(b.status, BookingStatus::Approved);

    let cancelled = f.engine.cancel(b.id, f.user).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.updated_at >= b.updated_at);
    assert!(
        f.engine
            .is_available(f.room.id, at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), None)
            .await
            .unwrap()
    );
    f.book(at("2099-01-05", "09:30"), at("2099-01-05", "10:30"), CreationPolicy::AutoApprove)
        .await
        .unwrap();
}

#[tokio::test]
async fn approved_booking_cannot_be_approved_again() {
    let f = Fixture::new("approve_twice.wal");
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();
    let err = f.engine.approve(b.id, f.admin).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidStatusTransition {
            from: BookingStatus::Approved,
            to: BookingStatus::Approved
        }
    ));
    let err = f.engine.approve(Ulid::new(), f.admin).await.unwrap_err();
    assert!(matches!(err, EngineError::BookingNotFound(_)));
}

#[tokio::test]
async fn reject_with_reason_records_and_notifies() {
    let f = Fixture::new("reject_reason.wal");
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();

    let rejected = f
        .engine
        .change_status(b.id, BookingStatus::Rejected, Some("  exam week  ".into()), f.admin)
        .await
        .unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);

    let record = f.engine.rejection_record(b.id).unwrap();
    assert_eq!(record.admin_id, f.admin);
    assert_eq!(record.reason, "exam week");

    let inbox = f.hub.for_user(f.user);
    assert_eq!(inbox.len(), 1);
    assert_eq!(
        inbox[0].message,
        "Your booking for A101 from 2099-01-05 09:00 to 2099-01-05 10:00 has been rejected. Reason: exam week"
    );
    assert!(!inbox[0].read);

    // The slot is free again.
    f.book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();
}

#[tokio::test]
async fn reject_without_reason_is_silent() {
    let f = Fixture::new("reject_silent.wal");
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    f.engine.reject(b.id, f.admin, Some("   ".into())).await.unwrap();

    assert_eq!(
        f.engine.get_booking(b.id).await.unwrap().status,
        BookingStatus::Rejected
    );
    assert!(f.engine.rejection_record(b.id).is_none());
    assert!(f.hub.for_user(f.user).is_empty());
}

#[tokio::test]
async fn reject_with_unknown_actor_changes_nothing() {
    let f = Fixture::new("reject_unknown_actor.wal");
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    let err = f
        .engine
        .reject(b.id, Ulid::new(), Some("no".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UserNotFound(_)));
    assert_eq!(
        f.engine.get_booking(b.id).await.unwrap().status,
        BookingStatus::Pending
    );
}

#[tokio::test]
async fn failing_sink_does_not_roll_back_rejection() {
    let f = Fixture::with("failing_sink.wal", |deps| Collaborators {
        sink: Arc::new(FailingSink),
        ..deps
    });
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();

    let rejected = f
        .engine
        .reject(b.id, f.admin, Some("maintenance".into()))
        .await
        .unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);
    assert!(f.engine.rejection_record(b.id).is_some());
}

#[tokio::test]
async fn reschedule_moves_booking_and_ignores_itself() {
    let f = Fixture::new("reschedule.wal");
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();
    f.book(at("2099-01-05", "12:00"), at("2099-01-05", "13:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();

    // Overlaps its own old slot only.
    let moved = f
        .engine
        .reschedule_booking(
            b.id,
            at("2099-01-05", "09:30"),
            at("2099-01-05", "10:30"),
            Some("longer".into()),
        )
        .await
        .unwrap();
    assert_eq!(moved.start, at("2099-01-05", "09:30"));
    assert_eq!(moved.reason, "longer");
    assert_eq!(moved.status, BookingStatus::Approved);
    assert!(moved.updated_at >= b.updated_at);

    let err = f
        .engine
        .reschedule_booking(b.id, at("2099-01-05", "11:30"), at("2099-01-05", "12:30"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotUnavailable(_)));

    let err = f
        .engine
        .reschedule_booking(b.id, at("2001-01-05", "11:30"), at("2001-01-05", "12:30"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PastBooking(_)));

    let listed = f.engine.list_bookings(BookingFilter::default().room(f.room.id)).await;
    assert_eq!(listed[0].id, b.id);
    assert_eq!(listed[0].reason, "longer");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_admit_exactly_one() {
    let f = Fixture::new("approval_race.wal");
    let a = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    let b = f
        .book(at("2099-01-05", "09:30"), at("2099-01-05", "10:30"), CreationPolicy::Moderated)
        .await
        .unwrap();

    let (ea, eb) = (f.engine.clone(), f.engine.clone());
    let admin = f.admin;
    let (ra, rb) = futures::future::join(
        tokio::spawn(async move { ea.approve(a.id, admin).await }),
        tokio::spawn(async move { eb.approve(b.id, admin).await }),
    )
    .await;
    let results = [ra.unwrap(), rb.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::SlotUnavailable(_))))
            .count(),
        1
    );
    let approved = f
        .engine
        .list_bookings(BookingFilter::default().status(BookingStatus::Approved))
        .await;
    assert_eq!(approved.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_admit_exactly_one() {
    let f = Fixture::new("create_race.wal");
    let tasks = (0..16).map(|i| {
        let engine = f.engine.clone();
        let (room, user) = (f.room.id, f.user);
        tokio::spawn(async move {
            let start = at("2099-01-05", "09:00") + chrono::Duration::minutes(i);
            engine
                .create_booking(
                    room,
                    user,
                    start,
                    start + chrono::Duration::hours(1),
                    "",
                    CreationPolicy::AutoApprove,
                )
                .await
        })
    });
    let results = futures::future::join_all(tasks).await;
    let created = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(created, 1);
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn listing_filters_and_orders() {
    let f = Fixture::new("listing.wal");
    let late = f
        .book(at("2099-01-06", "09:00"), at("2099-01-06", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    let early = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();

    let all = f.engine.list_bookings(BookingFilter::default()).await;
    assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![early.id, late.id]);

    let pending = f
        .engine
        .list_bookings(BookingFilter::default().status(BookingStatus::Pending))
        .await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, late.id);

    let day_one = f
        .engine
        .list_bookings(
            BookingFilter::default().range(at("2099-01-05", "00:00"), at("2099-01-05", "23:59")),
        )
        .await;
    assert_eq!(day_one.len(), 1);
    assert!(
        f.engine
            .list_bookings(BookingFilter::default().room(Ulid::new()))
            .await
            .is_empty()
    );

    let mine = f.engine.bookings_for_user(f.user).await;
    assert_eq!(mine.iter().map(|b| b.id).collect::<Vec<_>>(), vec![early.id, late.id]);
}

#[tokio::test]
async fn rejection_records_newest_first() {
    let f = Fixture::new("rejection_records.wal");
    let a = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    let b = f
        .book(at("2099-01-06", "09:00"), at("2099-01-06", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    f.engine.reject(a.id, f.admin, Some("first".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    f.engine.reject(b.id, f.admin, Some("second".into())).await.unwrap();

    let reasons: Vec<String> = f
        .engine
        .rejection_records()
        .into_iter()
        .map(|r| r.reason)
        .collect();
    assert_eq!(reasons, vec!["second".to_string(), "first".to_string()]);
}

// ── Statistics ───────────────────────────────────────────

#[tokio::test]
async fn statistics_follow_commits() {
    let f = Fixture::new("statistics.wal");
    f.book(at("2099-01-05", "09:00"), at("2099-01-05", "17:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();
    let (from, to) = (at("2099-01-05", "00:00"), at("2099-01-05", "23:59"));

    let first = f.engine.get_statistics(from, to).await.unwrap();
    assert_eq!(first.total_bookings, 1);
    let rate = first.room_utilization_rates[&f.room.id];
    assert!((rate - 33.3).abs() < 0.1, "rate = {rate}");
    assert_eq!(first.room_labels[&f.room.id], "A101 - Block A");

    let cached = f.engine.get_statistics(from, to).await.unwrap();
    assert_eq!(cached.total_bookings, 1);
    assert_eq!(cached.most_active_day, first.most_active_day);

    f.book(at("2099-01-05", "18:00"), at("2099-01-05", "19:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    let fresh = f.engine.get_statistics(from, to).await.unwrap();
    assert_eq!(fresh.total_bookings, 2);
    assert_eq!(fresh.pending_bookings, 1);
}

#[tokio::test]
async fn statistics_survive_a_dead_cache() {
    let f = Fixture::with("statistics_dead_cache.wal", |deps| Collaborators {
        cache: Arc::new(FallbackCache::new(Arc::new(DownCache))),
        ..deps
    });
    f.book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();
    let (from, to) = (at("2099-01-05", "00:00"), at("2099-01-05", "23:59"));
    for _ in 0..2 {
        let report = f.engine.get_statistics(from, to).await.unwrap();
        assert_eq!(report.approved_bookings, 1);
    }
}

#[tokio::test]
async fn statistics_window_is_bounded() {
    let f = Fixture::new("statistics_window.wal");
    let err = f
        .engine
        .get_statistics(at("2099-01-01", "00:00"), at("2105-01-01", "00:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn replay_restores_state() {
    let f = Fixture::new("replay.wal");
    let kept = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    let rejected = f
        .book(at("2099-01-05", "11:00"), at("2099-01-05", "12:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    f.engine.approve(kept.id, f.admin).await.unwrap();
    f.engine
        .reschedule_booking(kept.id, at("2099-01-05", "08:00"), at("2099-01-05", "09:30"), None)
        .await
        .unwrap();
    f.engine
        .reject(rejected.id, f.admin, Some("clash".into()))
        .await
        .unwrap();

    let before = f.engine.list_bookings(BookingFilter::default()).await;
    let reopened = f.reopen();
    let after = reopened.list_bookings(BookingFilter::default()).await;
    assert_eq!(before, after);
    assert_eq!(
        reopened.get_booking(kept.id).await.unwrap().start,
        at("2099-01-05", "08:00")
    );
    assert_eq!(
        reopened.rejection_record(rejected.id).unwrap().reason,
        "clash"
    );
    assert_eq!(reopened.bookings_for_user(f.user).await.len(), 2);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let f = Fixture::new("compaction.wal");
    for hour in 9..14 {
        let start = at("2099-01-05", "00:00") + chrono::Duration::hours(hour);
        let b = f
            .book(start, start + chrono::Duration::minutes(30), CreationPolicy::Moderated)
            .await
            .unwrap();
        if hour % 2 == 0 {
            f.engine.reject(b.id, f.admin, Some("odd hours only".into())).await.unwrap();
        } else {
            f.engine.approve(b.id, f.admin).await.unwrap();
        }
    }
    assert!(f.engine.journal_appends_since_compact().await >= 10);

    let before = f.engine.list_bookings(BookingFilter::default()).await;
    let records_before = f.engine.rejection_records();
    f.engine.compact_journal().await.unwrap();
    assert_eq!(f.engine.journal_appends_since_compact().await, 0);

    // Appends after compaction land in the new file.
    let late = f
        .book(at("2099-01-06", "09:00"), at("2099-01-06", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();

    let reopened = f.reopen();
    let mut after = reopened.list_bookings(BookingFilter::default()).await;
    assert_eq!(after.pop().map(|b| b.id), Some(late.id));
    assert_eq!(before, after);
    assert_eq!(records_before, reopened.rejection_records());
}

#[tokio::test]
async fn purge_cascades_to_bookings_and_records() {
    let f = Fixture::new("purge.wal");
    let a = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    f.book(at("2099-01-05", "11:00"), at("2099-01-05", "12:00"), CreationPolicy::AutoApprove)
        .await
        .unwrap();
    f.engine.reject(a.id, f.admin, Some("closing".into())).await.unwrap();

    f.directory.remove_room(f.room.id);
    assert_eq!(f.engine.purge_room(f.room.id).await.unwrap(), 2);

    assert!(matches!(
        f.engine.get_booking(a.id).await,
        Err(EngineError::BookingNotFound(_))
    ));
    assert!(f.engine.rejection_record(a.id).is_none());
    assert!(f.engine.bookings_for_user(f.user).await.is_empty());
    assert_eq!(f.engine.purge_room(f.room.id).await.unwrap(), 0);

    let reopened = f.reopen();
    assert!(reopened.list_bookings(BookingFilter::default()).await.is_empty());
    assert!(reopened.rejection_records().is_empty());
}

#[tokio::test]
async fn transition_queued_behind_purge_finds_nothing() {
    let f = Fixture::new("purge_race.wal");
    let b = f
        .book(at("2099-01-05", "09:00"), at("2099-01-05", "10:00"), CreationPolicy::Moderated)
        .await
        .unwrap();
    let ledger = f.engine.existing_ledger(f.room.id).unwrap();
    let reader = ledger.read().await;

    f.directory.remove_room(f.room.id);
    let engine = f.engine.clone();
    let room_id = f.room.id;
    let purge = tokio::spawn(async move { engine.purge_room(room_id).await });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    let engine = f.engine.clone();
    let (booking_id, user) = (b.id, f.user);
    let cancel = tokio::spawn(async move { engine.cancel(booking_id, user).await });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    drop(reader);

    assert_eq!(purge.await.unwrap().unwrap(), 1);
    let err = cancel.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::BookingNotFound(id) if id == b.id));

    let reopened = f.reopen();
    assert!(reopened.list_bookings(BookingFilter::default()).await.is_empty());
    assert!(reopened.existing_ledger(f.room.id).is_none());
}

#[tokio::test]
async fn statistics_cache_does_not_grow_with_commits() {
    let f = Fixture::new("statistics_cache_growth.wal");
    let cache = Arc::new(InProcessCache::new());
    let deps = Collaborators {
        cache: cache.clone(),
        ..Collaborators::in_memory(f.directory.clone(), f.hub.clone())
    };
    let path = test_wal_path("statistics_cache_growth_ttl0.wal");
    let engine = Engine::new(path, deps, Duration::ZERO).unwrap();
    let (from, to) = (at("2099-01-05", "00:00"), at("2099-01-05", "23:59"));

    for i in 0..20 {
        let start = from + chrono::Duration::minutes(i * 70);
        engine
            .create_booking(
                f.room.id,
                f.user,
                start,
                start + chrono::Duration::hours(1),
                "",
                CreationPolicy::AutoApprove,
            )
            .await
            .unwrap();
        let report = engine.get_statistics(from, to).await.unwrap();
        assert_eq!(report.total_bookings, i as u64 + 1);
    }
    assert!(cache.len() <= 1, "cache holds {} entries", cache.len());
}
