//! Proxy around a driver statement.
//!
//! The proxy itself holds no back-reference to its owning connection or
//! cache — those live on [`crate::connection::ConnectionWrapper`], which is
//! the single owner of both the connection and its statements. This keeps the
//! wrapper a plain forwarding shim, matching spec.md §9's "explicit wrapper
//! type... forwards operations 1-for-1", without an `Arc`/`Mutex` back-edge.

use std::time::{Duration, Instant};

use crate::driver::RawStatement;

/// A lazily-rendered record of `set*` calls, flushed to the log only when
/// `logArguments` is enabled.
#[derive(Default)]
pub struct ArgumentBuffer {
    entries: Vec<String>,
}

impl ArgumentBuffer {
    pub fn push(&mut self, rendered: impl Into<String>) {
        self.entries.push(rendered.into());
    }

    pub fn render(&self) -> String {
        self.entries.join(", ")
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Proxy around a driver statement, owned by exactly one
/// [`crate::connection::ConnectionWrapper`] at a time (either checked out to
/// a caller, or idle in that connection's [`crate::statement_cache::StatementCache`]).
pub struct StatementWrapper<S: RawStatement> {
    raw: S,
    key: String,
    log_arguments: bool,
    arguments: ArgumentBuffer,
}

/// What executing a non-query statement told the caller, so the owning
/// connection can set `commit_pending`.
pub struct ExecuteOutcome<R> {
    pub result: R,
    pub sets_commit_pending: bool,
}

impl<S: RawStatement> StatementWrapper<S> {
    pub(crate) fn new(raw: S, key: String, log_arguments: bool) -> Self {
        StatementWrapper { raw, key, log_arguments, arguments: ArgumentBuffer::default() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_poolable(&self) -> bool {
        self.raw.is_poolable()
    }

    /// `set*`-family: accumulate the rendered form if argument logging is
    /// enabled.
    pub fn record_set(&mut self, rendered: impl Into<String>) {
        if self.log_arguments {
            self.arguments.push(rendered);
        }
    }

    /// `execute*`-family for queries: apply the timeout, flush argument log,
    /// time the call.
    pub async fn execute_query(
        &mut self,
        request_timeout: Option<Duration>,
    ) -> Result<S::ResultSet, S::Error> {
        self.raw.set_query_timeout(request_timeout);
        let rendered = self.flush_arguments();
        let start = Instant::now();
        let outcome = self.raw.execute_query().await;
        log_execution(&self.key, rendered.as_deref(), start.elapsed(), outcome.is_ok());
        outcome
    }

    /// `execute*`-family for non-query statements: same timing/logging, plus
    /// reports whether the owning connection's `commit_pending` should be set
    ///.
    pub async fn execute_update(
        &mut self,
        request_timeout: Option<Duration>,
        auto_commit: bool,
    ) -> Result<ExecuteOutcome<u64>, S::Error> {
        self.raw.set_query_timeout(request_timeout);
        let rendered = self.flush_arguments();
        let start = Instant::now();
        let outcome = self.raw.execute_update().await;
        log_execution(&self.key, rendered.as_deref(), start.elapsed(), outcome.is_ok());
        outcome.map(|result| ExecuteOutcome { result, sets_commit_pending: !auto_commit })
    }

    fn flush_arguments(&mut self) -> Option<String> {
        if !self.log_arguments {
            return None;
        }
        let rendered = self.arguments.render();
        self.arguments.clear();
        Some(rendered)
    }

    /// Driver close + state release. Used both when a non-cacheable
    /// statement is closed directly and when an entry is evicted from the
    /// statement cache.
    pub async fn destroy(self) -> Result<(), S::Error> {
        self.raw.close().await
    }
}

fn log_execution(key: &str, arguments: Option<&str>, elapsed: Duration, ok: bool) {
    if let Some(args) = arguments {
        if !args.is_empty() {
            log::trace!("statement {:?} arguments: {}", key, args);
        }
    }
    if ok {
        log::debug!("statement {:?} executed in {:?}", key, elapsed);
    } else {
        log::debug!("statement {:?} failed after {:?}", key, elapsed);
    }
}
