mod merge;

pub use merge::{absorb_adjacent, split_vacancy};

use std::collections::HashSet;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth;
use crate::command::{self, Request};
use crate::error::CommandError;
use crate::mailer::{Mailer, Notice};
use crate::model::{
    Booking, BookingId, CalendarEvent, EmployeeId, EventId, LocationId, Principal, TimeRange,
    UserId, Version,
};
use crate::observability;
use crate::store::{IsolationLevel, Page, Repository, Transactional, TxnScope};

/// Everything the booking workflows need from storage, in one bound.
pub trait Store:
    Repository<Booking> + Repository<CalendarEvent> + Transactional + Send + Sync
{
}

impl<S> Store for S where
    S: Repository<Booking> + Repository<CalendarEvent> + Transactional + Send + Sync
{
}

/// Slot released by a cancellation, carried from the deletion transaction
/// into the reopen leg and the outbound notice.
struct FreedSlot {
    customer_id: UserId,
    employee_id: EmployeeId,
    location_id: LocationId,
    range: TimeRange,
}

fn scan_page() -> Page {
    Page {
        start: 0,
        count: Page::MAX_COUNT as usize,
    }
}

/// Booking workflows over a transactional store.
///
/// Calendar events double as vacancies: an event no booking references is
/// an open slot. Claiming splits a vacancy, cancelling deletes the booked
/// pair and re-opens the freed time, merging it with adjacent vacancies.
pub struct BookingService<S> {
    store: S,
    mailer: Mailer,
}

impl<S: Store> BookingService<S> {
    pub fn new(store: S, mailer: Mailer) -> Self {
        Self { store, mailer }
    }

    // ── Vacancy scheduling ───────────────────────────────────────

    /// Open a new vacancy on an employee's calendar. Staff only; the new
    /// range must not overlap any existing event of that employee.
    pub async fn open_vacancy(
        &self,
        actor: &Principal,
        employee_id: EmployeeId,
        location_id: LocationId,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<EventId, CommandError> {
        auth::require_staff(actor, employee_id)?;
        if !range.is_well_formed() {
            return Err(CommandError::Validation(
                "vacancy must be a non-empty half-open interval",
            ));
        }

        let mut txn = self.store.scope();
        txn.begin(IsolationLevel::RepeatableRead, cancel).await?;
        let result = async {
            let events = self.events_in(range, cancel).await?;
            if events
                .iter()
                .any(|e| e.employee_id == employee_id && e.range.overlaps(&range))
            {
                return Err(CommandError::Validation(
                    "vacancy overlaps an existing event for this employee",
                ));
            }
            let vacancy = CalendarEvent::new(employee_id, location_id, range);
            command::add_entity(&self.store, Request::new(actor.clone(), vacancy), cancel).await
        }
        .await;

        match result {
            Ok(id) => {
                txn.commit(cancel).await?;
                Ok(id)
            }
            Err(e) => {
                self.abort(txn, cancel).await;
                Err(e)
            }
        }
    }

    /// Move an open vacancy to a new range. Staff only, conditional on the
    /// caller's expected version. The moved vacancy must not overlap any
    /// other event of the same employee.
    pub async fn reschedule_vacancy(
        &self,
        actor: &Principal,
        event_id: EventId,
        expected: Version,
        new_range: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<Option<Version>, CommandError> {
        if !new_range.is_well_formed() {
            return Err(CommandError::Validation(
                "vacancy must be a non-empty half-open interval",
            ));
        }
        let Some(current) = self.event(event_id, cancel).await? else {
            return Ok(None);
        };
        let conflicts = self.events_in(new_range, cancel).await?;
        if conflicts.iter().any(|e| {
            e.id != event_id
                && e.employee_id == current.employee_id
                && e.range.overlaps(&new_range)
        }) {
            return Err(CommandError::Validation(
                "vacancy overlaps an existing event for this employee",
            ));
        }
        command::update_entity::<CalendarEvent, _, _, _>(
            &self.store,
            Request::conditional(actor.clone(), event_id, expected),
            |who, ev| auth::require_staff(who, ev.id),
            move |ev| ev.range = new_range,
            cancel,
        )
        .await
    }

    // ── Claiming ─────────────────────────────────────────────────

    /// Claim `range` out of an open vacancy for the acting customer.
    ///
    /// The vacancy splits: the claimed slot becomes a booked event, the
    /// leftover time stays open. One transaction covers the split and the
    /// new booking; the confirmation notice goes out after commit.
    pub async fn claim_vacancy(
        &self,
        actor: &Principal,
        employee_id: EmployeeId,
        location_id: LocationId,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<BookingId, CommandError> {
        if !range.is_well_formed() {
            return Err(CommandError::Validation(
                "requested slot must be a non-empty half-open interval",
            ));
        }

        let mut txn = self.store.scope();
        txn.begin(IsolationLevel::RepeatableRead, cancel).await?;
        let result = async {
            let events = self.events_in(range, cancel).await?;
            let booked = self.booked_event_ids(range, cancel).await?;
            let vacancy = events
                .iter()
                .find(|e| {
                    e.employee_id == employee_id
                        && e.location_id == location_id
                        && !booked.contains(&e.id)
                        && e.range.contains(&range)
                })
                .cloned()
                .ok_or(CommandError::Validation(
                    "no open vacancy covers the requested slot",
                ))?;

            let (slot, remainders) = merge::split_vacancy(&vacancy, range);
            Repository::<CalendarEvent>::delete(&self.store, vacancy.id, cancel).await?;
            let event_id =
                Repository::<CalendarEvent>::add(&self.store, slot, cancel).await?;
            for remainder in remainders {
                Repository::<CalendarEvent>::add(&self.store, remainder, cancel).await?;
            }
            let booking = Booking::new(actor.user_id, event_id);
            command::add_entity(&self.store, Request::new(actor.clone(), booking), cancel).await
        }
        .await;

        let booking_id = match result {
            Ok(id) => id,
            Err(e) => {
                self.abort(txn, cancel).await;
                return Err(e);
            }
        };
        txn.commit(cancel).await?;
        metrics::counter!(observability::BOOKINGS_CLAIMED_TOTAL).increment(1);
        info!(actor = %actor.user_id, booking = %booking_id, start = range.start, end = range.end, "vacancy claimed");

        if let Err(e) = self
            .mailer
            .enqueue(Notice::BookingConfirmed {
                customer_id: actor.user_id,
                booking_id,
                range,
            })
            .await
        {
            // The booking is committed; a lost notice must not fail it.
            warn!(error = %e, booking = %booking_id, "confirmation notice not queued");
        }
        Ok(booking_id)
    }

    // ── Cancellation ─────────────────────────────────────────────

    /// Cancel a booking and re-open the freed time as a vacancy.
    ///
    /// Idempotent: `Ok(false)` if the booking is already gone. The booked
    /// event and the booking are deleted atomically; the reopen runs in an
    /// independent transaction after the deletion commits, so a reopen
    /// failure never un-cancels the booking.
    pub async fn cancel_booking(
        &self,
        actor: &Principal,
        booking_id: BookingId,
        cancel: &CancellationToken,
    ) -> Result<bool, CommandError> {
        let mut txn = self.store.scope();
        txn.begin(IsolationLevel::RepeatableRead, cancel).await?;
        let freed = match self.cancel_in_txn(actor, booking_id, cancel).await {
            Ok(freed) => freed,
            Err(e) => {
                self.abort(txn, cancel).await;
                return Err(e);
            }
        };
        txn.commit(cancel).await?;

        let Some(freed) = freed else {
            return Ok(false);
        };
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(actor = %actor.user_id, booking = %booking_id, "booking cancelled");

        self.reopen_after_cancel(&freed, cancel).await;

        if let Err(e) = self
            .mailer
            .enqueue(Notice::BookingCancelled {
                customer_id: freed.customer_id,
                booking_id,
                range: freed.range,
            })
            .await
        {
            warn!(error = %e, booking = %booking_id, "cancellation notice not queued");
        }
        Ok(true)
    }

    async fn cancel_in_txn(
        &self,
        actor: &Principal,
        booking_id: BookingId,
        cancel: &CancellationToken,
    ) -> Result<Option<FreedSlot>, CommandError> {
        let Some(booking) =
            Repository::<Booking>::get_by_id(&self.store, booking_id, cancel).await?
        else {
            return Ok(None);
        };
        auth::require_owner_or_staff(actor, Some(booking.customer_id), booking_id)?;

        let Some(event) =
            Repository::<CalendarEvent>::get_by_id(&self.store, booking.event_id, cancel).await?
        else {
            // A booking without its event is a broken invariant. Treat it
            // as already gone (no mutation, `false` result) but log loudly
            // so it never passes unnoticed.
            error!(booking = %booking_id, event = %booking.event_id, "booking references a missing calendar event");
            return Ok(None);
        };

        // Event first, booking second: if the pair is ever observed
        // half-deleted, it must never be a booking pointing at nothing.
        Repository::<CalendarEvent>::delete(&self.store, event.id, cancel).await?;
        Repository::<Booking>::delete(&self.store, booking_id, cancel).await?;

        Ok(Some(FreedSlot {
            customer_id: booking.customer_id,
            employee_id: event.employee_id,
            location_id: event.location_id,
            range: event.range,
        }))
    }

    /// Second leg of the cancellation: one retry, then escalate. The
    /// deletion stays committed whatever happens here.
    async fn reopen_after_cancel(&self, freed: &FreedSlot, cancel: &CancellationToken) {
        let mut attempt = self
            .reopen_vacancy(freed.employee_id, freed.location_id, freed.range, cancel)
            .await;
        if let Err(first) = &attempt {
            warn!(error = %first, "vacancy reopen failed, retrying");
            attempt = self
                .reopen_vacancy(freed.employee_id, freed.location_id, freed.range, cancel)
                .await;
        }
        match attempt {
            Ok(id) => info!(vacancy = %id, "freed interval reopened"),
            Err(e) => {
                metrics::counter!(observability::VACANCY_REOPEN_FAILURES_TOTAL).increment(1);
                error!(
                    error = %e,
                    employee = %freed.employee_id,
                    start = freed.range.start,
                    end = freed.range.end,
                    "vacancy reopen failed after committed deletion"
                );
            }
        }
    }

    // ── Reopening ────────────────────────────────────────────────

    /// Re-open a freed interval as a vacancy, merging it with vacancies of
    /// the same employee and location that exactly touch its boundaries.
    pub async fn reopen_vacancy(
        &self,
        employee_id: EmployeeId,
        location_id: LocationId,
        freed: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<EventId, CommandError> {
        if !freed.is_well_formed() {
            return Err(CommandError::Validation(
                "freed interval must be a non-empty half-open interval",
            ));
        }

        let mut txn = self.store.scope();
        txn.begin(IsolationLevel::RepeatableRead, cancel).await?;
        let result = self
            .reopen_in_txn(employee_id, location_id, freed, cancel)
            .await;
        match result {
            Ok(id) => {
                txn.commit(cancel).await?;
                metrics::counter!(observability::VACANCIES_REOPENED_TOTAL).increment(1);
                Ok(id)
            }
            Err(e) => {
                self.abort(txn, cancel).await;
                Err(e)
            }
        }
    }

    async fn reopen_in_txn(
        &self,
        employee_id: EmployeeId,
        location_id: LocationId,
        freed: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<EventId, CommandError> {
        // Touching ranges never overlap under half-open semantics, so the
        // probe window is widened by 1ms each side to pick up neighbors.
        let probe = TimeRange::new(freed.start - 1, freed.end + 1);
        let events = self.events_in(probe, cancel).await?;
        let booked = self.booked_event_ids(probe, cancel).await?;

        let neighbors: Vec<CalendarEvent> = events
            .iter()
            .filter(|e| e.employee_id == employee_id && e.location_id == location_id)
            .filter(|e| !booked.contains(&e.id))
            .filter(|e| e.range.touches(&freed))
            .cloned()
            .collect();

        let (merged, absorbed) = merge::absorb_adjacent(freed, &neighbors);

        // The merged slot must only cover freed time plus what it absorbed.
        for e in &events {
            if e.employee_id == employee_id
                && !absorbed.contains(&e.id)
                && e.range.overlaps(&merged)
            {
                return Err(CommandError::Invariant(format!(
                    "reopened vacancy would overlap event {}",
                    e.id
                )));
            }
        }

        for id in &absorbed {
            Repository::<CalendarEvent>::delete(&self.store, *id, cancel).await?;
        }
        let vacancy = CalendarEvent::new(employee_id, location_id, merged);
        let id = Repository::<CalendarEvent>::add(&self.store, vacancy, cancel).await?;
        info!(
            vacancy = %id,
            absorbed = absorbed.len(),
            start = merged.start,
            end = merged.end,
            "vacancy reopened"
        );
        Ok(id)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Paged calendar lookup; raw paging fields are validated before any
    /// repository access.
    pub async fn events_page(
        &self,
        window: TimeRange,
        start: Option<i64>,
        count: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, CalendarEvent>, CommandError> {
        command::list_entities(&self.store, window, start, count, cancel).await
    }

    pub async fn booking(
        &self,
        id: BookingId,
        cancel: &CancellationToken,
    ) -> Result<Option<Booking>, CommandError> {
        command::get_entity(&self.store, id, cancel).await
    }

    pub async fn event(
        &self,
        id: EventId,
        cancel: &CancellationToken,
    ) -> Result<Option<CalendarEvent>, CommandError> {
        command::get_entity(&self.store, id, cancel).await
    }

    // ── Internals ────────────────────────────────────────────────

    /// Every event overlapping `window`, paging until the store comes
    /// back short. A single page caps at `Page::MAX_COUNT`, which a busy
    /// calendar can exceed.
    async fn events_in(
        &self,
        window: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<CalendarEvent>, CommandError> {
        let mut all = Vec::new();
        let mut page = scan_page();
        loop {
            let batch: Vec<CalendarEvent> =
                Repository::<CalendarEvent>::get_range(&self.store, window, page, cancel)
                    .await?
                    .collect()
                    .await;
            let got = batch.len();
            all.extend(batch);
            if got < page.count {
                return Ok(all);
            }
            page.start += page.count;
        }
    }

    /// Ids of events in `window` that a booking references, paged like
    /// `events_in`.
    async fn booked_event_ids(
        &self,
        window: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<HashSet<EventId>, CommandError> {
        let mut ids = HashSet::new();
        let mut page = scan_page();
        loop {
            let batch: Vec<Booking> =
                Repository::<Booking>::get_range(&self.store, window, page, cancel)
                    .await?
                    .collect()
                    .await;
            let got = batch.len();
            ids.extend(batch.into_iter().map(|b| b.event_id));
            if got < page.count {
                return Ok(ids);
            }
            page.start += page.count;
        }
    }

    async fn abort(&self, mut txn: S::Scope, cancel: &CancellationToken) {
        metrics::counter!(observability::TXN_ROLLBACKS_TOTAL).increment(1);
        if let Err(e) = txn.rollback(cancel).await {
            error!(error = %e, "rollback failed");
        }
    }
}
