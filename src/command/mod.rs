
use std::time::Instant;

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::info;
use ulid::Ulid;

use crate::auth;
use crate::error::CommandError;
use crate::model::{Principal, TimeRange, UserId, Version};
use crate::observability;
use crate::store::{Entity, IsolationLevel, Page, Repository, Transactional, TxnScope};

/// Authenticated request envelope: target payload plus the requesting
/// principal and, for conditional updates, the expected version taken
/// from the conditional-request header. Never persisted.
#[derive(Debug, Clone)]
pub struct Request<T> {
    pub actor: Principal,
    pub body: T,
    pub expected_version: Option<Version>,
}

impl<T> Request<T> {
    pub fn new(actor: Principal, body: T) -> Self {
        Self {
            actor,
            body,
            expected_version: None,
        }
    }

    pub fn conditional(actor: Principal, body: T, expected: Version) -> Self {
        Self {
            actor,
            body,
            expected_version: Some(expected),
        }
    }
}

// ── Generic executors ────────────────────────────────────────────
//
// One executor per operation shape; concrete commands inject the entity
// type, an authorization function, and (for updates) a patch function.

/// Persist a new entity and return its assigned id.
pub async fn add_entity<T, S>(
    store: &S,
    req: Request<T>,
    cancel: &CancellationToken,
) -> Result<Ulid, CommandError>
where
    T: Entity,
    S: Repository<T>,
{
    let started = Instant::now();
    let id = store.add(req.body, cancel).await?;
    info!(actor = %req.actor.user_id, kind = T::KIND, id = %id, "entity added");
    metrics::counter!(observability::COMMANDS_TOTAL, "command" => "add", "kind" => T::KIND)
        .increment(1);
    metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => "add")
        .record(started.elapsed().as_secs_f64());
    Ok(id)
}

/// Conditional update under a transaction.
///
/// Fails with `MidAirCollision` when the stored version no longer matches
/// the expected one — the caller re-fetches and retries. Absent entities
/// yield `Ok(None)`. On success the stored version advances and an audit
/// record is emitted.
pub async fn update_entity<T, S, A, F>(
    store: &S,
    req: Request<Ulid>,
    authorize: A,
    patch: F,
    cancel: &CancellationToken,
) -> Result<Option<Version>, CommandError>
where
    T: Entity,
    S: Repository<T> + Transactional,
    A: FnOnce(&Principal, &T) -> Result<(), CommandError> + Send,
    F: FnOnce(&mut T) + Send,
{
    let expected = req.expected_version.ok_or(CommandError::Validation(
        "conditional update requires an expected version",
    ))?;
    let started = Instant::now();
    let id = req.body;

    let mut txn = store.scope();
    txn.begin(IsolationLevel::RepeatableRead, cancel).await?;
    let result = async {
        let Some(mut current) = store.get_by_id(id, cancel).await? else {
            return Ok(None);
        };
        authorize(&req.actor, &current)?;
        if current.version() != expected {
            return Err(CommandError::MidAirCollision {
                expected,
                current: current.version(),
            });
        }
        patch(&mut current);
        current.advance_version();
        let new_version = current.version();
        // The repository contract has no in-place update; replace under
        // the same transaction.
        store.delete(id, cancel).await?;
        store.add(current, cancel).await?;
        Ok(Some(new_version))
    }
    .await;

    match result {
        Ok(outcome) => {
            txn.commit(cancel).await?;
            if let Some(new_version) = outcome {
                let record = serde_json::json!({
                    "actor": req.actor.user_id.to_string(),
                    "kind": T::KIND,
                    "id": id.to_string(),
                    "from": expected,
                    "to": new_version,
                });
                info!(target: "audit", audit = %record, "entity updated");
                metrics::counter!(observability::COMMANDS_TOTAL, "command" => "update", "kind" => T::KIND)
                    .increment(1);
                metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => "update")
                    .record(started.elapsed().as_secs_f64());
            }
            Ok(outcome)
        }
        Err(e) => {
            metrics::counter!(observability::TXN_ROLLBACKS_TOTAL).increment(1);
            if let Err(rb) = txn.rollback(cancel).await {
                tracing::error!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Idempotent delete: `true` if an entity was removed, `false` if it was
/// already gone. `owner_of` names the owning user for the authorization
/// policy (owner or staff may delete).
pub async fn delete_entity<T, S, O>(
    store: &S,
    req: Request<Ulid>,
    owner_of: O,
    cancel: &CancellationToken,
) -> Result<bool, CommandError>
where
    T: Entity,
    S: Repository<T> + Transactional,
    O: FnOnce(&T) -> Option<UserId> + Send,
{
    let started = Instant::now();
    let id = req.body;

    let mut txn = store.scope();
    txn.begin(IsolationLevel::RepeatableRead, cancel).await?;
    let result = async {
        let Some(current) = store.get_by_id(id, cancel).await? else {
            return Ok(false);
        };
        auth::require_owner_or_staff(&req.actor, owner_of(&current), id)?;
        store.delete(id, cancel).await?;
        Ok(true)
    }
    .await;

    match result {
        Ok(deleted) => {
            txn.commit(cancel).await?;
            if deleted {
                info!(actor = %req.actor.user_id, kind = T::KIND, id = %id, "entity deleted");
            }
            metrics::counter!(observability::COMMANDS_TOTAL, "command" => "delete", "kind" => T::KIND)
                .increment(1);
            metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => "delete")
                .record(started.elapsed().as_secs_f64());
            Ok(deleted)
        }
        Err(e) => {
            metrics::counter!(observability::TXN_ROLLBACKS_TOTAL).increment(1);
            if let Err(rb) = txn.rollback(cancel).await {
                tracing::error!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Pass-through read. Absence is `Ok(None)`, never an error.
pub async fn get_entity<T, S>(
    store: &S,
    id: Ulid,
    cancel: &CancellationToken,
) -> Result<Option<T>, CommandError>
where
    T: Entity,
    S: Repository<T>,
{
    Ok(store.get_by_id(id, cancel).await?)
}

/// Paged range read. Raw paging fields are validated here, before any
/// repository access; the result is a lazy single-pass stream.
pub async fn list_entities<T, S>(
    store: &S,
    window: TimeRange,
    start: Option<i64>,
    count: Option<i64>,
    cancel: &CancellationToken,
) -> Result<BoxStream<'static, T>, CommandError>
where
    T: Entity,
    S: Repository<T>,
{
    if !window.is_well_formed() {
        return Err(CommandError::Validation(
            "query window must be a non-empty half-open interval",
        ));
    }
    let page = Page::new(start, count).map_err(CommandError::Validation)?;
    Ok(store.get_range(window, page, cancel).await?)
}
