mod error;
mod memory;
#[cfg(test)]
mod tests;

pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTxn};

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::model::{Booking, CalendarEvent, TimeRange, Version};

// ── Entity contract ──────────────────────────────────────────────

/// A stored entity kind: identified, version-stamped, cloneable.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Short name used in log and metric labels.
    const KIND: &'static str;

    fn id(&self) -> Ulid;
    fn version(&self) -> Version;
    fn advance_version(&mut self);
}

impl Entity for CalendarEvent {
    const KIND: &'static str = "calendar_event";

    fn id(&self) -> Ulid {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn advance_version(&mut self) {
        self.version = self.version.next();
    }
}

impl Entity for Booking {
    const KIND: &'static str = "booking";

    fn id(&self) -> Ulid {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn advance_version(&mut self) {
        self.version = self.version.next();
    }
}

// ── Paging ───────────────────────────────────────────────────────

/// Start/count paging window. Bounds: `start ≥ 0`, `1 ≤ count ≤ 1000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub start: usize,
    pub count: usize,
}

impl Page {
    pub const MAX_COUNT: i64 = 1000;
    pub const DEFAULT_COUNT: i64 = 100;

    /// Validate raw query fields. Unspecified fields default to
    /// `start = 0`, `count = 100`. Out-of-range values are rejected here,
    /// before any repository access.
    pub fn new(start: Option<i64>, count: Option<i64>) -> Result<Self, &'static str> {
        let start = start.unwrap_or(0);
        let count = count.unwrap_or(Self::DEFAULT_COUNT);
        if start < 0 {
            return Err("page start must be >= 0");
        }
        if count < 1 || count > Self::MAX_COUNT {
            return Err("page count must be between 1 and 1000");
        }
        Ok(Self {
            start: start as usize,
            count: count as usize,
        })
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            start: 0,
            count: Self::DEFAULT_COUNT as usize,
        }
    }
}

// ── Repository contract ──────────────────────────────────────────

/// Storage interface per entity kind. Implementations hold no cross-call
/// state: every method is re-entrant, and all writes issued between a
/// scope's `begin` and `commit`/`rollback` join that transaction.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Absence is a normal result, never an error.
    async fn get_by_id(&self, id: Ulid, cancel: &CancellationToken)
    -> Result<Option<T>, StoreError>;

    /// Entities overlapping `window`, in store order, as a lazy
    /// forward-only stream. Finite and single-pass; not restartable.
    async fn get_range(
        &self,
        window: TimeRange,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, T>, StoreError>;

    /// Persist the entity and return its assigned id.
    async fn add(&self, entity: T, cancel: &CancellationToken) -> Result<Ulid, StoreError>;

    /// Remove by id. No-op if absent.
    async fn delete(&self, id: Ulid, cancel: &CancellationToken) -> Result<(), StoreError>;
}

// ── Transaction contract ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Unit-of-work scoped to one logical operation.
///
/// `begin` while open is a programming error and fails fast. `commit`
/// and `rollback` are terminal; afterwards the scope is idle and may be
/// reused. The scope never rolls back on its own — a failing workflow
/// must call `rollback` before propagating its error.
#[async_trait]
pub trait TxnScope: Send {
    async fn begin(
        &mut self,
        isolation: IsolationLevel,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn commit(&mut self, cancel: &CancellationToken) -> Result<(), StoreError>;

    async fn rollback(&mut self, cancel: &CancellationToken) -> Result<(), StoreError>;
}

/// A store that can hand out per-operation transaction scopes.
pub trait Transactional {
    type Scope: TxnScope;

    fn scope(&self) -> Self::Scope;
}
