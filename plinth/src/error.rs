use std::fmt;
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

/// Why a transaction was forcibly aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The acquire would have closed a cycle in the waits-for graph.
    Deadlock,
    /// The acquire exceeded the configured number of wait rounds.
    LockTimeout,
    /// The host environment interrupted the transaction.
    Interrupted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Deadlock => write!(f, "deadlock detected"),
            AbortReason::LockTimeout => write!(f, "lock wait timed out"),
            AbortReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("no page is eligible for eviction")]
    NoEvictable,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no empty slot on page")]
    NotEnoughSpace,

    #[error("tuple is not stored on this page")]
    TupleNotOnPage,

    /// Recoverable: the caller must run `transaction_complete(tid, false)`
    /// to restore buffer state and release the transaction's locks.
    #[error("transaction aborted: {0}")]
    TransactionAborted(AbortReason),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("write-ahead log corrupted: {0}")]
    WalCorrupted(String),
}

impl DbError {
    /// True for the abort errors that require transaction-wide cleanup.
    pub fn is_abort(&self) -> bool {
        matches!(self, DbError::TransactionAborted(_))
    }
}
