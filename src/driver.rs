//! The contract a physical database driver must satisfy.
//!
//! The pool, the wrapper, and the statement cache are all generic over these
//! traits. Everything on the other side of this boundary — connecting,
//! preparing, executing, and reading rows — is a driver concern, not a pool
//! concern.

use async_trait::async_trait;
use std::error::Error as StdError;
use std::time::Duration;

/// An error raised by the driver, carrying enough structure for
/// [`crate::classify`] to categorize it without understanding the driver's
/// concrete error type.
pub trait DriverError: StdError + Send + Sync + 'static {
    /// Five-character SQLSTATE-style code, e.g. `"08003"`, if the driver
    /// exposes one.
    fn state_code(&self) -> Option<&str> {
        None
    }

    /// A vendor-specific numeric error code, if the driver exposes one.
    fn vendor_code(&self) -> Option<i64> {
        None
    }

    /// A coarse category the driver itself assigns, if any.
    fn category(&self) -> Option<ErrorCategory> {
        None
    }

    /// The next error in the classification chain, when this error wraps
    /// another driver-level error (e.g. a connection failure wrapping the
    /// protocol error that caused it). [`crate::classify::classify`] walks
    /// this chain up to ten hops.
    fn cause(&self) -> Option<&dyn DriverError> {
        None
    }

    /// Whether this error means "the driver doesn't support that piece of
    /// configuration" rather than "the connection is bad". Open ignores these; everything else aborts the open.
    fn is_unsupported_feature(&self) -> bool {
        false
    }
}

/// The categories a driver may tag its own errors with, independent of
/// SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Timeout,
    Recoverable,
    InvalidAuthorization,
    NonTransientConnection,
    TransientConnection,
    NonTransient,
    TransactionRollback,
    Other,
}

/// Connection-level configuration applied during open.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub read_only: bool,
    pub isolation: Option<IsolationLevel>,
    pub auto_commit: bool,
    pub application_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A raw, unwrapped physical connection. Implemented once per backend; the
/// pool never constructs one except through [`RawConnection::open`].
#[async_trait]
pub trait RawConnection: Send + Sized + 'static {
    type Statement: RawStatement;
    type Metadata: RawMetadata;
    type Error: DriverError;

    /// Open a new physical connection, honoring `login_timeout` as the
    /// driver-level login deadline.
    async fn open(
        url: &str,
        properties: &[(String, String)],
        login_timeout: Duration,
    ) -> Result<Self, Self::Error>;

    /// Apply `catalog`/`schema`/`read_only`/`isolation`/`auto_commit` and
    /// client identification. Unsupported-feature errors
    /// are the caller's responsibility to ignore, not this method's.
    async fn configure(&mut self, config: &ConnectionConfig) -> Result<(), Self::Error>;

    /// Probe liveness within `timeout`. Probed once at open time (spec §4.7
    /// step 3) to empirically decide whether validation is supported at all:
    /// a driver that cannot validate should fail this call with
    /// [`DriverError::is_unsupported_feature`] set, which the pool records
    /// on the [`crate::connection::Managed`] as "validation unsupported" so
    /// later borrows skip the probe instead of repeating the same failure.
    async fn is_valid(&mut self, timeout: Duration) -> Result<bool, Self::Error>;

    /// Prepare a statement from `text`. Bypassed by the statement cache for
    /// call-statement variants with a non-string first argument.
    async fn prepare(&mut self, text: &str) -> Result<Self::Statement, Self::Error>;

    /// Create an uncached, ad-hoc statement.
    async fn create_statement(&mut self) -> Result<Self::Statement, Self::Error>;

    async fn commit(&mut self) -> Result<(), Self::Error>;

    async fn rollback(&mut self) -> Result<(), Self::Error>;

    /// Best-effort; failures here are swallowed by the caller.
    async fn clear_warnings(&mut self) -> Result<(), Self::Error>;

    async fn metadata(&mut self) -> Result<Self::Metadata, Self::Error>;

    /// Close the underlying socket/handle. Errors are swallowed by every
    /// caller of this method.
    async fn close(self) -> Result<(), Self::Error>;
}

/// A raw, unwrapped physical statement.
#[async_trait]
pub trait RawStatement: Send + 'static {
    type ResultSet: Send + 'static;
    type Error: DriverError;

    /// Whether the driver considers this statement eligible to be pooled
    /// when it's closed rather than destroyed outright.
    fn is_poolable(&self) -> bool {
        true
    }

    /// Apply a per-execute timeout to the driver.
    fn set_query_timeout(&mut self, timeout: Option<Duration>);

    /// Execute a statement expected to return rows.
    async fn execute_query(&mut self) -> Result<Self::ResultSet, Self::Error>;

    /// Execute a statement with no result set (UPDATE/INSERT/DDL/…). Returns
    /// the affected row count.
    async fn execute_update(&mut self) -> Result<u64, Self::Error>;

    /// Release driver-side resources. Called on cache eviction (destroy) or
    /// on close when the statement is not poolable.
    async fn close(self) -> Result<(), Self::Error>;
}

/// Driver-side metadata object, wrapped by [`crate::metadata::MetadataProxy`].
#[async_trait]
pub trait RawMetadata: Send + 'static {
    type Error: DriverError;

    /// Invoke a metadata method by name with rendered arguments.
    /// Real drivers expose this as a family of concrete methods; the proxy
    /// models it as one dynamic dispatch point since the cache key is
    /// `method-name + "-" + join(args, "-")` regardless.
    async fn invoke(&mut self, method: &str, args: &[String]) -> Result<MetadataResult, Self::Error>;
}

/// What a metadata invocation can return: a scalar, or a live cursor that
/// must be materialized before caching.
pub enum MetadataResult {
    Scalar(String),
    Cursor(Box<dyn RowCursor>),
}

/// A live, driver-owned cursor that can be drained into a materialized
/// snapshot.
#[async_trait]
pub trait RowCursor: Send {
    async fn materialize(self: Box<Self>) -> Vec<Vec<String>>;
}
