use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::model::{Booking, CalendarEvent, TimeRange};

use super::{IsolationLevel, Page, Repository, StoreError, Transactional, TxnScope};

/// Inverse operations recorded while a transaction is open, replayed in
/// reverse on rollback.
enum UndoOp {
    RestoreEvent(CalendarEvent),
    DropEvent(Ulid),
    RestoreBooking(Booking),
    DropBooking(Ulid),
}

struct ActiveTxn {
    isolation: IsolationLevel,
    undo: Vec<UndoOp>,
    _permit: OwnedSemaphorePermit,
}

struct Inner {
    events: DashMap<Ulid, CalendarEvent>,
    bookings: DashMap<Ulid, Booking>,
    /// One permit: transactions serialize, which is at least as strong as
    /// repeatable-read. A real backend maps `IsolationLevel` onto its own
    /// isolation instead.
    gate: Arc<Semaphore>,
    active: Mutex<Option<ActiveTxn>>,
}

/// In-memory store: the repository contract's reference double.
///
/// Writes issued outside a transaction auto-commit. Writes inside one are
/// applied immediately and undone on rollback; concurrent transactions
/// wait on the gate rather than interleave.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                events: DashMap::new(),
                bookings: DashMap::new(),
                gate: Arc::new(Semaphore::new(1)),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn event_count(&self) -> usize {
        self.inner.events.len()
    }

    pub fn booking_count(&self) -> usize {
        self.inner.bookings.len()
    }

    /// Range lookup used by `Repository<Booking>::get_range`: a booking's
    /// time is the time of the event it references.
    fn event_range(&self, event_id: &Ulid) -> Option<TimeRange> {
        self.inner.events.get(event_id).map(|e| e.range)
    }

    async fn record_undo(&self, op: UndoOp) {
        let mut active = self.inner.active.lock().await;
        if let Some(txn) = active.as_mut() {
            txn.undo.push(op);
        }
    }

    fn apply_undo(&self, undo: Vec<UndoOp>) {
        for op in undo.into_iter().rev() {
            match op {
                UndoOp::RestoreEvent(e) => {
                    self.inner.events.insert(e.id, e);
                }
                UndoOp::DropEvent(id) => {
                    self.inner.events.remove(&id);
                }
                UndoOp::RestoreBooking(b) => {
                    self.inner.bookings.insert(b.id, b);
                }
                UndoOp::DropBooking(id) => {
                    self.inner.bookings.remove(&id);
                }
            }
        }
    }
}

// ── Calendar event repository ────────────────────────────────────

#[async_trait]
impl Repository<CalendarEvent> for MemoryStore {
    async fn get_by_id(
        &self,
        id: Ulid,
        cancel: &CancellationToken,
    ) -> Result<Option<CalendarEvent>, StoreError> {
        ensure_live(cancel)?;
        Ok(self.inner.events.get(&id).map(|e| e.value().clone()))
    }

    async fn get_range(
        &self,
        window: TimeRange,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, CalendarEvent>, StoreError> {
        ensure_live(cancel)?;
        let mut hits: Vec<CalendarEvent> = self
            .inner
            .events
            .iter()
            .filter(|e| e.range.overlaps(&window))
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by_key(|e| e.range.start);
        let paged: Vec<CalendarEvent> =
            hits.into_iter().skip(page.start).take(page.count).collect();
        Ok(stream::iter(paged).boxed())
    }

    async fn add(
        &self,
        entity: CalendarEvent,
        cancel: &CancellationToken,
    ) -> Result<Ulid, StoreError> {
        ensure_live(cancel)?;
        let id = entity.id;
        let prev = self.inner.events.insert(id, entity);
        let undo = match prev {
            Some(old) => UndoOp::RestoreEvent(old),
            None => UndoOp::DropEvent(id),
        };
        self.record_undo(undo).await;
        Ok(id)
    }

    async fn delete(&self, id: Ulid, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_live(cancel)?;
        if let Some((_, old)) = self.inner.events.remove(&id) {
            self.record_undo(UndoOp::RestoreEvent(old)).await;
        }
        Ok(())
    }
}

// ── Booking repository ───────────────────────────────────────────

#[async_trait]
impl Repository<Booking> for MemoryStore {
    async fn get_by_id(
        &self,
        id: Ulid,
        cancel: &CancellationToken,
    ) -> Result<Option<Booking>, StoreError> {
        ensure_live(cancel)?;
        Ok(self.inner.bookings.get(&id).map(|b| b.value().clone()))
    }

    async fn get_range(
        &self,
        window: TimeRange,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Booking>, StoreError> {
        ensure_live(cancel)?;
        let mut hits: Vec<(TimeRange, Booking)> = self
            .inner
            .bookings
            .iter()
            .filter_map(|b| {
                let range = self.event_range(&b.event_id)?;
                range.overlaps(&window).then(|| (range, b.value().clone()))
            })
            .collect();
        hits.sort_by_key(|(range, _)| range.start);
        let paged: Vec<Booking> = hits
            .into_iter()
            .map(|(_, b)| b)
            .skip(page.start)
            .take(page.count)
            .collect();
        Ok(stream::iter(paged).boxed())
    }

    async fn add(&self, entity: Booking, cancel: &CancellationToken) -> Result<Ulid, StoreError> {
        ensure_live(cancel)?;
        let id = entity.id;
        let prev = self.inner.bookings.insert(id, entity);
        let undo = match prev {
            Some(old) => UndoOp::RestoreBooking(old),
            None => UndoOp::DropBooking(id),
        };
        self.record_undo(undo).await;
        Ok(id)
    }

    async fn delete(&self, id: Ulid, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_live(cancel)?;
        if let Some((_, old)) = self.inner.bookings.remove(&id) {
            self.record_undo(UndoOp::RestoreBooking(old)).await;
        }
        Ok(())
    }
}

// ── Transaction scope ────────────────────────────────────────────

pub struct MemoryTxn {
    store: MemoryStore,
    open: bool,
}

#[async_trait]
impl TxnScope for MemoryTxn {
    async fn begin(
        &mut self,
        isolation: IsolationLevel,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        if self.open {
            return Err(StoreError::TxnAlreadyOpen);
        }
        ensure_live(cancel)?;
        let permit = tokio::select! {
            permit = self.store.inner.gate.clone().acquire_owned() => permit
                .map_err(|_| StoreError::Unavailable("transaction gate closed".into()))?,
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
        };
        tracing::debug!(?isolation, "transaction begin");
        *self.store.inner.active.lock().await = Some(ActiveTxn {
            isolation,
            undo: Vec::new(),
            _permit: permit,
        });
        self.open = true;
        Ok(())
    }

    async fn commit(&mut self, _cancel: &CancellationToken) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::NoOpenTxn);
        }
        // Writes are already applied; commit only releases the gate.
        // Deliberately ignores cancellation — commit is terminal.
        let _ = self.store.inner.active.lock().await.take();
        self.open = false;
        tracing::debug!("transaction commit");
        Ok(())
    }

    async fn rollback(&mut self, _cancel: &CancellationToken) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::NoOpenTxn);
        }
        let txn = self.store.inner.active.lock().await.take();
        if let Some(txn) = txn {
            tracing::debug!(isolation = ?txn.isolation, undo_ops = txn.undo.len(), "transaction rollback");
            self.store.apply_undo(txn.undo);
        }
        self.open = false;
        Ok(())
    }
}

impl Transactional for MemoryStore {
    type Scope = MemoryTxn;

    fn scope(&self) -> MemoryTxn {
        MemoryTxn {
            store: self.clone(),
            open: false,
        }
    }
}
