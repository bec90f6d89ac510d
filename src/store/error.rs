#[derive(Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Storage backend failure (connection lost, writer gone, etc.).
    Unavailable(String),
    /// `begin` while a transaction is already open on this scope.
    TxnAlreadyOpen,
    /// `commit`/`rollback` without an open transaction.
    NoOpenTxn,
    /// The caller abandoned the operation mid-flight.
    Cancelled,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::TxnAlreadyOpen => write!(f, "transaction already open on this scope"),
            StoreError::NoOpenTxn => write!(f, "no open transaction"),
            StoreError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for StoreError {}
