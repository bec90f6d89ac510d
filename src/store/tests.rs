use futures::StreamExt;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use super::*;
use crate::model::Ms;

const H: Ms = 3_600_000;

fn event(start: Ms, end: Ms) -> CalendarEvent {
    CalendarEvent::new(Ulid::new(), Ulid::new(), TimeRange::new(start, end))
}

#[tokio::test]
async fn get_absent_is_none() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let got: Option<CalendarEvent> = store.get_by_id(Ulid::new(), &cancel).await.unwrap();
    assert!(got.is_none());
}

#[tokio::test]
async fn add_then_get_roundtrip() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let e = event(9 * H, 10 * H);
    let id = store.add(e.clone(), &cancel).await.unwrap();
    assert_eq!(id, e.id);
    let got: Option<CalendarEvent> = store.get_by_id(id, &cancel).await.unwrap();
    assert_eq!(got, Some(e));
}

#[tokio::test]
async fn delete_absent_is_a_no_op() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    Repository::<CalendarEvent>::delete(&store, Ulid::new(), &cancel)
        .await
        .unwrap();
    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn get_range_filters_orders_and_pages() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let a = event(9 * H, 10 * H);
    let b = event(10 * H, 11 * H);
    let c = event(11 * H, 12 * H);
    let far = event(20 * H, 21 * H);
    for e in [c.clone(), a.clone(), far, b.clone()] {
        store.add(e, &cancel).await.unwrap();
    }

    let window = TimeRange::new(8 * H, 13 * H);
    let hits: Vec<CalendarEvent> = store
        .get_range(window, Page::default(), &cancel)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(hits, vec![a, b.clone(), c.clone()]);

    let page = Page { start: 1, count: 1 };
    let paged: Vec<CalendarEvent> = store
        .get_range(window, page, &cancel)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(paged, vec![b]);
}

#[tokio::test]
async fn booking_range_follows_referenced_event() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let morning = event(9 * H, 10 * H);
    let evening = event(18 * H, 19 * H);
    let b_morning = Booking::new(Ulid::new(), morning.id);
    let b_evening = Booking::new(Ulid::new(), evening.id);
    store.add(morning, &cancel).await.unwrap();
    store.add(evening, &cancel).await.unwrap();
    store.add(b_evening, &cancel).await.unwrap();
    store.add(b_morning.clone(), &cancel).await.unwrap();

    let hits: Vec<Booking> = Repository::<Booking>::get_range(
        &store,
        TimeRange::new(8 * H, 11 * H),
        Page::default(),
        &cancel,
    )
    .await
    .unwrap()
    .collect()
    .await;
    assert_eq!(hits, vec![b_morning]);
}

#[tokio::test]
async fn rollback_restores_prior_state() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let kept = event(9 * H, 10 * H);
    store.add(kept.clone(), &cancel).await.unwrap();

    let mut txn = store.scope();
    txn.begin(IsolationLevel::RepeatableRead, &cancel).await.unwrap();
    Repository::<CalendarEvent>::delete(&store, kept.id, &cancel)
        .await
        .unwrap();
    store.add(event(11 * H, 12 * H), &cancel).await.unwrap();
    store
        .add(Booking::new(Ulid::new(), kept.id), &cancel)
        .await
        .unwrap();
    txn.rollback(&cancel).await.unwrap();

    assert_eq!(store.event_count(), 1);
    assert_eq!(store.booking_count(), 0);
    let got: Option<CalendarEvent> = store.get_by_id(kept.id, &cancel).await.unwrap();
    assert_eq!(got, Some(kept));
}

#[tokio::test]
async fn commit_keeps_writes() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();

    let mut txn = store.scope();
    txn.begin(IsolationLevel::RepeatableRead, &cancel).await.unwrap();
    store.add(event(9 * H, 10 * H), &cancel).await.unwrap();
    txn.commit(&cancel).await.unwrap();

    assert_eq!(store.event_count(), 1);
}

#[tokio::test]
async fn nested_begin_fails_fast() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();

    let mut txn = store.scope();
    txn.begin(IsolationLevel::RepeatableRead, &cancel).await.unwrap();
    let err = txn
        .begin(IsolationLevel::RepeatableRead, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::TxnAlreadyOpen);
    txn.commit(&cancel).await.unwrap();
}

#[tokio::test]
async fn commit_without_begin_is_an_error() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let mut txn = store.scope();
    assert_eq!(txn.commit(&cancel).await.unwrap_err(), StoreError::NoOpenTxn);
    assert_eq!(txn.rollback(&cancel).await.unwrap_err(), StoreError::NoOpenTxn);
}

#[tokio::test]
async fn scope_is_reusable_after_commit() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    let mut txn = store.scope();
    tokio_test::assert_ok!(txn.begin(IsolationLevel::RepeatableRead, &cancel).await);
    tokio_test::assert_ok!(txn.commit(&cancel).await);
    tokio_test::assert_ok!(txn.begin(IsolationLevel::ReadCommitted, &cancel).await);
    tokio_test::assert_ok!(txn.rollback(&cancel).await);
}

#[tokio::test]
async fn concurrent_transactions_serialize() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();

    let mut first = store.scope();
    first.begin(IsolationLevel::RepeatableRead, &cancel).await.unwrap();

    // A second transaction waits on the gate instead of interleaving.
    let mut second = store.scope();
    let waiting = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        second.begin(IsolationLevel::RepeatableRead, &cancel),
    )
    .await;
    assert!(waiting.is_err(), "second begin should block while the first is open");

    first.commit(&cancel).await.unwrap();
    second.begin(IsolationLevel::RepeatableRead, &cancel).await.unwrap();
    second.commit(&cancel).await.unwrap();
}

#[tokio::test]
async fn cancelled_token_rejects_reads_and_begin() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = Repository::<CalendarEvent>::get_by_id(&store, Ulid::new(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::Cancelled);

    let mut txn = store.scope();
    let err = txn
        .begin(IsolationLevel::RepeatableRead, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::Cancelled);
}

#[test]
fn page_bounds() {
    assert_eq!(Page::new(None, None).unwrap(), Page { start: 0, count: 100 });
    assert_eq!(Page::new(Some(5), Some(1000)).unwrap(), Page { start: 5, count: 1000 });
    assert!(Page::new(Some(-1), None).is_err());
    assert!(Page::new(None, Some(0)).is_err());
    assert!(Page::new(None, Some(1001)).is_err());
}
