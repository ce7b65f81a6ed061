//! Error and Result types surfaced to callers of the pool.

use thiserror::Error;

use crate::classify::Classification;

/// A specialized `Result` type for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every way a borrow, release, or delegated driver call can fail.
#[derive(Error, Debug)]
pub enum Error {
    /// [`crate::pool::Pool::acquire`] waited longer than `connection_timeout`.
    #[error("timed out waiting for a connection from the pool")]
    ConnectionTimeout,

    /// Opening a raw connection failed, or a captured I/O failure poisoned one.
    #[error("connection failure: {0}")]
    ConnectionFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// `release` was called by a caller that does not hold the connection.
    #[error("connection was already released by its owner")]
    ConnectionAlreadyReleased,

    /// A [`crate::connection::StatementId`] was used against a connection
    /// that has no record of it checked out — it was already closed, or it
    /// belongs to a different connection entirely.
    #[error("statement is not checked out on this connection")]
    UnknownStatement,

    /// `close()` arrived with a pending, uncommitted transaction; the pool
    /// rolled it back on the caller's behalf before returning it to service.
    #[error("uncommitted transaction was rolled back before the connection was released")]
    UncommittedTransactionForcedRollback,

    /// A data-access failure, classified per [`crate::classify`].
    #[error("data access error ({kind:?}): {source}")]
    DataAccess {
        kind: Classification,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Classified as [`Classification::NoData`]: the connection is fine, the
    /// query simply produced nothing.
    #[error("no data: {0}")]
    NoData(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The pool has been closed; no further connections will be issued.
    #[error("the pool has been closed")]
    PoolClosed,
}

impl Error {
    /// True when this failure means the connection that produced it must be
    /// retired rather than returned to service.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Error::DataAccess {
                kind: Classification::Communication | Classification::System,
                ..
            }
        )
    }
}
