//! A pooled database connection manager sitting in front of a low-level
//! driver: bounded connections, per-connection statement caching, and
//! failure-aware retirement.
//!
//! The driver itself is not part of this crate — implement [`driver::RawConnection`]
//! and friends against whatever wire protocol you're pooling.

pub mod classify;
pub mod connection;
pub mod driver;
pub mod error;
pub mod metadata;
pub mod pool;
pub mod session;
pub mod statement;
pub mod statement_cache;
pub mod time_delta;

pub use connection::{CallerContext, ConnectionWrapper, OpenSpec, StatementId};
pub use driver::{
    ConnectionConfig, DriverError, ErrorCategory, IsolationLevel, MetadataResult, RawConnection,
    RawMetadata, RawStatement, RowCursor,
};
pub use error::{Error, Result};
pub use metadata::{Invoked, MetadataProxy, RowSetProxy};
pub use pool::{Pool, PoolOptions, PoolSize};
pub use session::{SessionController, SessionData, StatementEnhancer};
pub use statement::{ArgumentBuffer, ExecuteOutcome, StatementWrapper};
pub use time_delta::TimeDelta;
