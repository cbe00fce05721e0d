use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use tokio::sync::{broadcast, Mutex, Notify};
use ulid::Ulid;

use super::*;
use crate::engine::Occupancy;
use crate::store::{BookingStore, ChangeKind, ConnectionStatus, FeedItem, Subscription};

const S: Group = Group::Sisteres;
const E: Group = Group::Elderes;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
}

fn september() -> OfferedDates {
    OfferedDates::weekends_of(2025, 9).unwrap()
}

fn record(day: u32, claim: Claim, seq: u32) -> BookingRecord {
    BookingRecord {
        id: Ulid::new(),
        name: format!("host{seq}"),
        date: d(day),
        couples: claim.groups_requested(),
        which_couple: claim.which_group(),
        created_at: Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, seq).unwrap(),
    }
}

fn loaded(records: Vec<BookingRecord>) -> Synchronizer {
    let mut sync = Synchronizer::new(september());
    sync.full_load(Ok(records));
    sync
}

fn stored(request: &NewBooking) -> BookingRecord {
    request.to_new_record().into_record(Ulid::new(), Utc::now())
}

// ── Scripted store ───────────────────────────────────────────

/// In-memory store whose failures and latency are set per test.
struct FakeStore {
    rows: StdMutex<Vec<BookingRecord>>,
    feed: broadcast::Sender<FeedItem>,
    fail_load: AtomicBool,
    fail_insert: AtomicBool,
    /// When set, inserts wait for `release` before committing.
    hold_inserts: AtomicBool,
    release: Notify,
    fetches: AtomicUsize,
    subscribed: Mutex<bool>,
}

impl FakeStore {
    fn new(rows: Vec<BookingRecord>) -> Arc<Self> {
        let (feed, _) = broadcast::channel(4);
        Arc::new(Self {
            rows: StdMutex::new(rows),
            feed,
            fail_load: AtomicBool::new(false),
            fail_insert: AtomicBool::new(false),
            hold_inserts: AtomicBool::new(false),
            release: Notify::new(),
            fetches: AtomicUsize::new(0),
            subscribed: Mutex::new(false),
        })
    }

    /// Commit a row as another client would, and notify.
    fn commit_foreign(&self, record: BookingRecord) {
        self.rows.lock().unwrap().push(record.clone());
        let _ = self.feed.send(FeedItem::Change(FeedMessage::inserted(&record)));
    }

    fn push(&self, item: FeedItem) {
        let _ = self.feed.send(item);
    }
}

#[async_trait]
impl BookingStore for FakeStore {
    async fn fetch_all(&self, _table: &str) -> Result<Vec<BookingRecord>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(StoreError::Load("connection refused".into()));
        }
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn insert(&self, _table: &str, record: NewRecord) -> Result<BookingRecord, StoreError> {
        if self.hold_inserts.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Insert("permission denied".into()));
        }
        let row = record.into_record(Ulid::new(), Utc::now());
        self.commit_foreign(row.clone());
        Ok(row)
    }

    async fn subscribe(&self, _table: &str) -> Result<Subscription, StoreError> {
        *self.subscribed.lock().await = true;
        Ok(Subscription::new(self.feed.subscribe()))
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        table: "lunch_bookings".into(),
        store_timeout: Duration::from_millis(200),
    }
}

/// Wait until the published views satisfy `pred`.
async fn views_until(handle: &SyncHandle, pred: impl Fn(&Views) -> bool) -> Arc<Views> {
    let mut rx = handle.views();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("views never reached the expected state")
}

// ── Mirror maintenance ──────────────────────────────────────

#[test]
fn full_load_drops_incoherent_rows() {
    let good = record(6, Claim::One(S), 1);
    let mut bad = record(7, Claim::Both, 2);
    bad.which_couple = Some(E);
    let sync = loaded(vec![good.clone(), bad]);
    assert_eq!(sync.mirror().len(), 1);
    assert!(sync.mirror().get(&good.id).is_some());
}

#[test]
fn failed_first_load_leaves_empty_usable_mirror() {
    let mut sync = Synchronizer::new(september());
    sync.full_load(Err(StoreError::Load("offline".into())));
    assert!(sync.mirror().is_empty());
    let views = sync.views();
    assert_eq!(views.dates.len(), 8);
    assert!(sync.prepare_submission(&SubmissionRequest::both("Ana", d(6))).is_ok());
}

#[test]
fn failed_reload_keeps_the_mirror() {
    let mut sync = loaded(vec![record(6, Claim::Both, 1)]);
    sync.begin_reload();
    sync.full_load(Err(StoreError::Load("offline".into())));
    assert_eq!(sync.mirror().len(), 1);
    assert!(!sync.is_reloading());
}

#[test]
fn events_are_idempotent() {
    let mut sync = loaded(vec![]);
    let rec = record(6, Claim::One(S), 1);
    let insert = FeedMessage::inserted(&rec);
    assert!(sync.apply(&insert));
    assert!(!sync.apply(&insert));
    assert_eq!(sync.mirror().len(), 1);

    let mut renamed = rec.clone();
    renamed.name = "Ana".into();
    let update = FeedMessage::updated(&renamed, &rec);
    assert!(sync.apply(&update));
    assert!(!sync.apply(&update));
    assert_eq!(sync.mirror().get(&rec.id).unwrap().name, "Ana");

    let delete = FeedMessage::deleted(&renamed);
    assert!(sync.apply(&delete));
    assert!(!sync.apply(&delete));
    assert!(sync.mirror().is_empty());
}

#[test]
fn update_for_unknown_id_is_ignored() {
    let mut sync = loaded(vec![]);
    let rec = record(6, Claim::Both, 1);
    assert!(!sync.apply(&FeedMessage::updated(&rec, &rec)));
    assert!(sync.mirror().is_empty());
}

#[test]
fn insert_order_does_not_matter() {
    let recs: Vec<BookingRecord> = (1..=5)
        .map(|i| record(6 + i, Claim::One(if i % 2 == 0 { S } else { E }), i))
        .collect();

    let mut forward = loaded(vec![]);
    for r in &recs {
        forward.apply(&FeedMessage::inserted(r));
    }
    let mut backward = loaded(vec![]);
    for r in recs.iter().rev() {
        backward.apply(&FeedMessage::inserted(r));
    }
    assert_eq!(forward.mirror().snapshot(), backward.mirror().snapshot());
}

#[test]
fn late_insert_after_delete_stays_deleted() {
    let mut sync = loaded(vec![]);
    let rec = record(6, Claim::Both, 1);
    assert!(!sync.apply(&FeedMessage::deleted(&rec)));
    assert!(!sync.apply(&FeedMessage::inserted(&rec)));
    assert!(sync.mirror().is_empty());
}

#[test]
fn malformed_payloads_are_dropped() {
    let mut sync = loaded(vec![record(6, Claim::Both, 1)]);
    let before = sync.views().revision;
    let garbage = FeedMessage {
        kind: ChangeKind::Insert,
        new: Some(json!({ "id": "not-an-id", "couples": "três" })),
        old: None,
    };
    assert!(!sync.apply(&garbage));
    let no_old = FeedMessage {
        kind: ChangeKind::Delete,
        new: None,
        old: None,
    };
    assert!(!sync.apply(&no_old));
    assert_eq!(sync.mirror().len(), 1);
    assert_eq!(sync.views().revision, before);
}

#[test]
fn changes_during_reload_survive_it() {
    let stale = record(6, Claim::One(S), 1);
    let mut sync = loaded(vec![]);
    sync.begin_reload();
    let fresh = record(7, Claim::Both, 2);
    sync.apply(&FeedMessage::inserted(&fresh));
    // The fetch started before `fresh` was committed.
    sync.full_load(Ok(vec![stale.clone()]));
    assert_eq!(sync.mirror().len(), 2);
    assert!(sync.mirror().get(&fresh.id).is_some());
}

#[test]
fn overlapping_reloads_keep_changes_until_the_last() {
    let mut sync = loaded(vec![]);
    sync.begin_reload();
    sync.begin_reload();
    // The older fetch lands first, then a change arrives.
    sync.full_load(Ok(vec![]));
    assert!(sync.is_reloading());
    let fresh = record(6, Claim::Both, 1);
    sync.apply(&FeedMessage::inserted(&fresh));
    // The newer fetch started before `fresh` was committed.
    sync.full_load(Ok(vec![]));
    assert!(!sync.is_reloading());
    assert!(sync.mirror().get(&fresh.id).is_some());
    assert!(!sync.views().is_selectable(d(6)));
}

#[test]
fn deletes_during_overlapping_reloads_stay_deleted() {
    let gone = record(6, Claim::Both, 1);
    let mut sync = loaded(vec![gone.clone()]);
    sync.begin_reload();
    sync.begin_reload();
    sync.apply(&FeedMessage::deleted(&gone));
    sync.full_load(Ok(vec![gone.clone()]));
    sync.full_load(Ok(vec![gone.clone()]));
    assert!(sync.mirror().is_empty());
    assert!(sync.views().is_selectable(d(6)));
}

#[test]
fn every_change_publishes_views() {
    let mut sync = loaded(vec![]);
    let rx = sync.subscribe_views();
    let r0 = rx.borrow().revision;
    sync.apply(&FeedMessage::inserted(&record(6, Claim::Both, 1)));
    let views = rx.borrow().clone();
    assert_eq!(views.revision, r0 + 1);
    assert!(!views.is_selectable(d(6)));
}

// ── Scenarios ───────────────────────────────────────────────

#[test]
fn scenario_a_first_single_leaves_the_other_group() {
    let mut sync = loaded(vec![]);
    let booking = sync
        .prepare_submission(&SubmissionRequest::one("X", d(6), S))
        .unwrap();
    let outcome = sync.finish_submission(Ok(stored(&booking))).unwrap();
    assert!(matches!(outcome, SubmitOutcome::Confirmed(_)));

    let views = sync.focus(Some(d(6)));
    assert!(views.is_selectable(d(6)));
    let banner = views.banner.clone().unwrap();
    assert_eq!(banner.occupancy, Occupancy::PartiallyBooked { available: E });
    assert_eq!(
        banner.guidance,
        Guidance::Prefilled {
            couples: GroupsRequested::One,
            which_couple: E
        }
    );
}

#[test]
fn scenario_b_same_group_rejected_before_the_store() {
    let sync = loaded(vec![record(6, Claim::One(S), 1)]);
    let err = sync
        .prepare_submission(&SubmissionRequest::one("Y", d(6), S))
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Validation(ValidationError::OccupancyConflict { .. })
    ));
    assert_eq!(sync.mirror().len(), 1);
}

#[test]
fn scenario_c_two_singles_hide_the_date() {
    let mut sync = loaded(vec![record(6, Claim::One(S), 1)]);
    sync.apply(&FeedMessage::inserted(&record(6, Claim::One(E), 2)));
    let views = sync.views();
    assert!(!views.is_selectable(d(6)));
    assert_eq!(views.dates.len(), 7);
}

#[test]
fn scenario_d_double_booking_hides_the_date() {
    let sync = loaded(vec![record(13, Claim::Both, 1)]);
    assert!(!sync.views().is_selectable(d(13)));
    assert!(sync.views().is_selectable(d(14)));
}

#[test]
fn scenario_e_delete_frees_the_date() {
    let booking = record(6, Claim::One(S), 1);
    let mut sync = loaded(vec![booking.clone()]);
    sync.focus(Some(d(6)));
    assert_eq!(
        sync.views().banner.as_ref().unwrap().occupancy,
        Occupancy::PartiallyBooked { available: E }
    );

    assert!(sync.apply(&FeedMessage::deleted(&booking)));
    let views = sync.views();
    let banner = views.banner.as_ref().unwrap();
    assert_eq!(banner.occupancy, Occupancy::Free);
    assert_eq!(banner.guidance, Guidance::ChooseFreely);
    assert_eq!(banner.message, None);
    assert!(views.is_selectable(d(6)));
    assert!(sync.mirror().is_empty());
}

#[test]
fn remote_insert_updates_focused_banner() {
    let mut sync = loaded(vec![]);
    sync.focus(Some(d(7)));
    assert_eq!(sync.views().banner.as_ref().unwrap().guidance, Guidance::ChooseFreely);

    sync.apply(&FeedMessage::inserted(&record(7, Claim::Both, 1)));
    let views = sync.views();
    assert!(!views.is_selectable(d(7)));
    assert_eq!(views.banner.as_ref().unwrap().guidance, Guidance::Unavailable);
}

#[test]
fn unoffered_date_rejected() {
    let sync = loaded(vec![]);
    let err = sync
        .prepare_submission(&SubmissionRequest::both("Ana", d(10)))
        .unwrap_err();
    assert_eq!(err, SyncError::Validation(ValidationError::UnknownDate(d(10))));
}

#[test]
fn failed_insert_leaves_mirror_unchanged() {
    let mut sync = loaded(vec![]);
    let before = sync.views().revision;
    let err = sync
        .finish_submission(Err(StoreError::Insert("denied".into())))
        .unwrap_err();
    assert_eq!(err, SyncError::Store(StoreError::Insert("denied".into())));
    assert!(sync.mirror().is_empty());
    assert_eq!(sync.views().revision, before);
}

#[test]
fn confirmation_after_echo_is_not_duplicated() {
    let mut sync = loaded(vec![]);
    let booking = sync
        .prepare_submission(&SubmissionRequest::both("Ana", d(6)))
        .unwrap();
    let row = stored(&booking);
    sync.apply(&FeedMessage::inserted(&row));
    let outcome = sync.finish_submission(Ok(row)).unwrap();
    assert!(!outcome.is_contested());
    assert_eq!(sync.mirror().len(), 1);
}

#[test]
fn collision_while_in_flight_is_contested() {
    let mut sync = loaded(vec![]);
    let booking = sync
        .prepare_submission(&SubmissionRequest::one("Ana", d(6), S))
        .unwrap();
    let rival = record(6, Claim::Both, 1);
    sync.apply(&FeedMessage::inserted(&rival));

    let outcome = sync.finish_submission(Ok(stored(&booking))).unwrap();
    match outcome {
        SubmitOutcome::Contested { rivals, .. } => assert_eq!(rivals, vec![rival.id]),
        other => panic!("expected contested, got {other:?}"),
    }
    assert_eq!(sync.mirror().len(), 2);
}

#[test]
fn calendar_view_follows_toggle() {
    let mut sync = loaded(vec![record(6, Claim::One(E), 1)]);
    assert!(sync.views().calendar.is_none());
    let views = sync.show_calendar(true);
    let calendars = views.calendar.as_ref().unwrap();
    assert_eq!(calendars[1].group, E);
    assert_eq!(calendars[1].entries[0].booked_by.as_deref(), Some("host1"));
    assert!(sync.show_calendar(false).calendar.is_none());
}

// ── Actor ───────────────────────────────────────────────────

#[tokio::test]
async fn spawn_loads_and_subscribes() {
    let store = FakeStore::new(vec![record(6, Claim::Both, 1)]);
    let handle = spawn(store.clone(), september(), config()).await;
    assert!(*store.subscribed.lock().await);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(handle.current_views().bookings, 1);
    assert!(!handle.current_views().is_selectable(d(6)));
}

#[tokio::test]
async fn spawn_survives_failed_load() {
    let store = FakeStore::new(vec![record(6, Claim::Both, 1)]);
    store.fail_load.store(true, Ordering::SeqCst);
    let handle = spawn(store.clone(), september(), config()).await;
    assert_eq!(handle.snapshot().await.unwrap().len(), 0);

    store.fail_load.store(false, Ordering::SeqCst);
    assert_eq!(handle.reload().await.unwrap(), 1);
}

#[tokio::test]
async fn submit_confirms_and_mirrors() {
    let store = FakeStore::new(vec![]);
    let handle = spawn(store.clone(), september(), config()).await;
    let outcome = handle
        .submit(SubmissionRequest::one("Ana", d(6), S))
        .await
        .unwrap();
    assert_eq!(outcome.label(), "confirmed");
    assert_eq!(outcome.booking().name, "Ana");

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    let views = handle.focus(Some(d(6))).await.unwrap();
    assert_eq!(
        views.banner.as_ref().unwrap().occupancy,
        Occupancy::PartiallyBooked { available: E }
    );
}

#[tokio::test]
async fn submit_rejected_without_store_call() {
    let store = FakeStore::new(vec![record(6, Claim::One(S), 1)]);
    let handle = spawn(store.clone(), september(), config()).await;
    let err = handle
        .submit(SubmissionRequest::one("Y", d(6), S))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(store.rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn store_failure_reported() {
    let store = FakeStore::new(vec![]);
    store.fail_insert.store(true, Ordering::SeqCst);
    let handle = spawn(store.clone(), september(), config()).await;
    let err = handle
        .submit(SubmissionRequest::both("Ana", d(6)))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Insert(_))));
    assert!(handle.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_store_times_out_as_unavailable() {
    let store = FakeStore::new(vec![]);
    store.hold_inserts.store(true, Ordering::SeqCst);
    let handle = spawn(store.clone(), september(), config()).await;
    let err = handle
        .submit(SubmissionRequest::both("Ana", d(6)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SyncError::Store(StoreError::Unavailable {
            op: "insert",
            after: Duration::from_millis(200)
        })
    );
    assert!(handle.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn feed_events_apply_while_insert_is_pending() {
    let store = FakeStore::new(vec![]);
    store.hold_inserts.store(true, Ordering::SeqCst);
    let handle = spawn(store.clone(), september(), SyncConfig {
        store_timeout: Duration::from_secs(5),
        ..config()
    })
    .await;

    let submitting = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.submit(SubmissionRequest::one("Ana", d(6), S)).await })
    };
    // Give the insert time to start and block.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let rival = record(6, Claim::One(S), 1);
    store.commit_foreign(rival.clone());
    views_until(&handle, |v| v.bookings == 1).await;

    store.release.notify_one();
    let outcome = submitting.await.unwrap().unwrap();
    match outcome {
        SubmitOutcome::Contested { rivals, .. } => assert_eq!(rivals, vec![rival.id]),
        other => panic!("expected contested, got {other:?}"),
    }
    views_until(&handle, |v| v.bookings == 2).await;
}

#[tokio::test]
async fn remote_insert_pushes_views() {
    let store = FakeStore::new(vec![]);
    let handle = spawn(store.clone(), september(), config()).await;
    handle.focus(Some(d(7))).await.unwrap();

    store.commit_foreign(record(7, Claim::Both, 1));
    let views = views_until(&handle, |v| !v.is_selectable(d(7))).await;
    assert_eq!(views.banner.as_ref().unwrap().guidance, Guidance::Unavailable);
}

#[tokio::test]
async fn lagged_feed_triggers_reload() {
    let store = FakeStore::new(vec![]);
    let handle = spawn(store.clone(), september(), config()).await;
    // Row committed without a notification reaching us.
    store.rows.lock().unwrap().push(record(6, Claim::Both, 1));
    store.push(FeedItem::Status(ConnectionStatus::Lagged(3)));

    views_until(&handle, |v| v.bookings == 1).await;
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_reloads_answer_every_caller() {
    let store = FakeStore::new(vec![record(6, Claim::Both, 1)]);
    let handle = spawn(store.clone(), september(), config()).await;
    let (a, b) = tokio::join!(handle.reload(), handle.reload());
    assert_eq!(a.unwrap(), 1);
    assert_eq!(b.unwrap(), 1);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn feed_errors_are_tolerated() {
    let store = FakeStore::new(vec![]);
    let handle = spawn(store.clone(), september(), config()).await;
    store.push(FeedItem::Status(ConnectionStatus::Error("socket reset".into())));
    store.commit_foreign(record(6, Claim::Both, 1));
    views_until(&handle, |v| v.bookings == 1).await;
}

#[tokio::test]
async fn handle_reports_closed_after_shutdown() {
    let store = FakeStore::new(vec![]);
    let handle = spawn(store.clone(), september(), config()).await;
    handle.shutdown().await;
    assert_eq!(handle.snapshot().await.unwrap_err(), SyncError::Closed);
    assert_eq!(
        handle.submit(SubmissionRequest::both("Ana", d(6))).await.unwrap_err(),
        SyncError::Closed
    );
}
