use ulid::Ulid;

use crate::mailer::MailError;
use crate::model::{UserId, Version};
use crate::store::StoreError;

/// Failure taxonomy for the command layer and workflows.
///
/// Absence is never an error: missing entities surface as `Ok(None)` or
/// `Ok(false)` so that deletes stay idempotent.
#[derive(Debug)]
pub enum CommandError {
    /// Malformed or out-of-range request fields; rejected before any
    /// repository call.
    Validation(&'static str),
    /// The actor may not touch this entity instance.
    Unauthorized { actor: UserId, target: Ulid },
    /// Conditional update lost the race: the record changed since the
    /// caller last read it. Re-fetch and retry with the new version.
    MidAirCollision { expected: Version, current: Version },
    /// Broken internal invariant (e.g. a reopened vacancy that would
    /// overlap an existing event). Aborts the operation loudly; not a
    /// user-facing error.
    Invariant(String),
    /// Bounded notification queue is full and the overflow policy rejects.
    QueueFull(&'static str),
    /// Mail provider failure, carrying the provider's status code.
    Mail(MailError),
    /// Storage or transaction failure.
    Store(StoreError),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Validation(msg) => write!(f, "validation: {msg}"),
            CommandError::Unauthorized { actor, target } => {
                write!(f, "actor {actor} is not authorized for {target}")
            }
            CommandError::MidAirCollision { expected, current } => {
                write!(
                    f,
                    "mid-air collision: expected {expected}, but stored version is {current}"
                )
            }
            CommandError::Invariant(msg) => write!(f, "invariant violated: {msg}"),
            CommandError::QueueFull(msg) => write!(f, "queue full: {msg}"),
            CommandError::Mail(e) => write!(f, "mail provider: {e}"),
            CommandError::Store(e) => write!(f, "store: {e}"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Store(e) => Some(e),
            CommandError::Mail(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Store(e)
    }
}

impl From<MailError> for CommandError {
    fn from(e: MailError) -> Self {
        CommandError::Mail(e)
    }
}
