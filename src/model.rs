use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Ms,
    pub end: Ms,
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Zero-length and inverted ranges are rejected before any store call.
    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Exact boundary contact: `self` ends where `other` starts, or vice
    /// versa. Half-open ranges that touch never overlap.
    pub fn touches(&self, other: &TimeRange) -> bool {
        self.end == other.start || other.end == self.start
    }
}

// ── Identifiers ──────────────────────────────────────────────────

pub type BookingId = Ulid;
pub type EventId = Ulid;
pub type EmployeeId = Ulid;
pub type LocationId = Ulid;
pub type UserId = Ulid;

// ── Version stamps ───────────────────────────────────────────────

/// Opaque monotonically increasing stamp for optimistic concurrency.
///
/// A logical counter, not a wall-clock timestamp: two updates landing in
/// the same clock tick would produce colliding timestamp stamps, while a
/// counter always advances. Compared by equality only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    pub const fn initial() -> Self {
        Version(1)
    }

    pub const fn next(self) -> Self {
        Version(self.0 + 1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ── Entities ─────────────────────────────────────────────────────

/// A time slot on an employee's calendar at a location.
///
/// Whether the slot is a vacancy or booked is implied by whether a
/// `Booking` references it — the event itself carries no kind flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: EventId,
    pub employee_id: EmployeeId,
    pub location_id: LocationId,
    pub range: TimeRange,
    pub version: Version,
}

impl CalendarEvent {
    pub fn new(employee_id: EmployeeId, location_id: LocationId, range: TimeRange) -> Self {
        Self {
            id: Ulid::new(),
            employee_id,
            location_id,
            range,
            version: Version::initial(),
        }
    }
}

/// A customer's claim on one calendar event.
///
/// Invariant: while a booking exists, the event it references exists. A
/// booking whose event is gone is a broken invariant, not a user error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub customer_id: UserId,
    pub event_id: EventId,
    pub version: Version,
}

impl Booking {
    pub fn new(customer_id: UserId, event_id: EventId) -> Self {
        Self {
            id: Ulid::new(),
            customer_id,
            event_id,
            version: Version::initial(),
        }
    }
}

// ── Identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Customer,
    Employee,
    Admin,
}

/// The authenticated requester: resolved identity plus role set.
/// Built by the (external) routing layer per request; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn customer(user_id: UserId) -> Self {
        Self::new(user_id, vec![Role::Customer])
    }

    pub fn staff(user_id: UserId) -> Self {
        Self::new(user_id, vec![Role::Employee])
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_basics() {
        let r = TimeRange::new(100, 200);
        assert_eq!(r.duration_ms(), 100);
        assert!(r.is_well_formed());
        assert!(!TimeRange { start: 200, end: 200 }.is_well_formed());
        assert!(!TimeRange { start: 300, end: 200 }.is_well_formed());
    }

    #[test]
    fn range_overlap() {
        let a = TimeRange::new(100, 200);
        let b = TimeRange::new(150, 250);
        let c = TimeRange::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn range_touches() {
        let a = TimeRange::new(100, 200);
        let b = TimeRange::new(200, 300);
        let c = TimeRange::new(250, 350);
        assert!(a.touches(&b));
        assert!(b.touches(&a));
        assert!(!a.touches(&c));
        assert!(!a.touches(&a));
    }

    #[test]
    fn range_contains() {
        let outer = TimeRange::new(100, 400);
        let inner = TimeRange::new(150, 300);
        let partial = TimeRange::new(50, 200);
        assert!(outer.contains(&inner));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&partial));
    }

    #[test]
    fn version_advances() {
        let v = Version::initial();
        assert_eq!(v.next(), v.next());
        assert_ne!(v, v.next());
        assert!(v < v.next());
    }

    #[test]
    fn principal_roles() {
        let staff = Principal::staff(Ulid::new());
        assert!(staff.has_role(Role::Employee));
        assert!(!staff.has_role(Role::Admin));

        let customer = Principal::customer(Ulid::new());
        assert!(customer.has_role(Role::Customer));
        assert!(!customer.has_role(Role::Employee));
    }
}
