use crate::model::{CalendarEvent, EventId, TimeRange};

// ── Adjacency merge ──────────────────────────────────────────────

/// Extend a freed interval over vacancies that exactly touch its
/// boundaries, so the calendar never fragments into needless small gaps.
///
/// `neighbors` must already be filtered to vacancies of the same
/// employee and location — adjacency is scoped per employee+location.
/// At most one left and one right neighbor can touch (events of one
/// employee never overlap), and both may apply at once.
///
/// Returns the merged range and the ids of absorbed neighbors.
pub fn absorb_adjacent(
    freed: TimeRange,
    neighbors: &[CalendarEvent],
) -> (TimeRange, Vec<EventId>) {
    let mut merged = freed;
    let mut absorbed = Vec::new();
    for v in neighbors {
        if v.range.end == freed.start {
            merged.start = v.range.start;
            absorbed.push(v.id);
        } else if v.range.start == freed.end {
            merged.end = v.range.end;
            absorbed.push(v.id);
        }
    }
    (merged, absorbed)
}

// ── Vacancy split ────────────────────────────────────────────────

/// Split a vacancy around a claimed sub-range: the claimed slot becomes a
/// fresh event (to be referenced by the new booking) and leftover time on
/// either side stays open as remainder vacancies.
///
/// The claimed range must lie inside the vacancy; the caller checks this.
pub fn split_vacancy(
    vacancy: &CalendarEvent,
    claimed: TimeRange,
) -> (CalendarEvent, Vec<CalendarEvent>) {
    debug_assert!(vacancy.range.contains(&claimed));
    let slot = CalendarEvent::new(vacancy.employee_id, vacancy.location_id, claimed);
    let mut remainders = Vec::new();
    if vacancy.range.start < claimed.start {
        remainders.push(CalendarEvent::new(
            vacancy.employee_id,
            vacancy.location_id,
            TimeRange::new(vacancy.range.start, claimed.start),
        ));
    }
    if claimed.end < vacancy.range.end {
        remainders.push(CalendarEvent::new(
            vacancy.employee_id,
            vacancy.location_id,
            TimeRange::new(claimed.end, vacancy.range.end),
        ));
    }
    (slot, remainders)
}
