//! The pool's internal view of a physical connection, and the caller-facing
//! proxy wrapped around it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::classify::{classify, Classification};
use crate::driver::{ConnectionConfig, DriverError, RawConnection, RawStatement};
use crate::error::{Error, Result};
use crate::metadata::MetadataProxy;
use crate::statement::StatementWrapper;
use crate::statement_cache::StatementCache;

/// Opaque handle to a statement checked out of a connection's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(u64);

/// The pool's internal view of a single physical connection: the raw driver
/// handle plus everything the pool tracks about it between borrows.
pub(crate) struct Managed<C: RawConnection> {
    pub raw: C,
    pub created: Instant,
    pub last_error: Option<Classification>,
    pub commit_pending: bool,
    pub cache: StatementCache<StatementWrapper<C::Statement>>,
    checked_out: HashMap<u64, StatementWrapper<C::Statement>>,
    next_stmt_id: AtomicU64,
    pub validation_supported: bool,
    pub session_id: Option<String>,
    /// Telemetry-only descriptor including session id and skew.
    pub descriptor: String,
}

impl<C: RawConnection> Managed<C> {
    pub fn new(raw: C, validation_supported: bool) -> Self {
        Managed {
            raw,
            created: Instant::now(),
            last_error: None,
            commit_pending: false,
            cache: StatementCache::new(0),
            checked_out: HashMap::new(),
            next_stmt_id: AtomicU64::new(1),
            validation_supported,
            session_id: None,
            descriptor: String::new(),
        }
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// A captured Communication/System error poisons the connection
    ///.
    pub fn is_poisoned(&self) -> bool {
        matches!(self.last_error, Some(Classification::Communication) | Some(Classification::System))
    }

    pub fn is_end_of_life(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|max| !max.is_zero() && self.age() > max)
    }

    fn capture<E: DriverError>(&mut self, err: E) -> Error {
        let classification = classify(&err);
        if matches!(classification, Classification::Communication | Classification::System) {
            self.last_error = Some(classification);
        }
        match classification {
            Classification::NoData => Error::NoData(Box::new(err)),
            other => Error::DataAccess { kind: other, source: Box::new(err) },
        }
    }
}

/// Proxy around a driver connection, handed to the caller by
/// [`crate::pool::Pool::acquire`]. Reentrant: nested borrows by the same
/// caller (tracked by [`crate::pool::inner::PoolInner`] via a task-local) get
/// a new handle over the *same* underlying [`Managed`] connection.
pub struct ConnectionWrapper<C: RawConnection> {
    pub(crate) managed: Arc<Mutex<Option<Managed<C>>>>,
    pub(crate) depth: Arc<AtomicU32>,
    pub(crate) ctx_slot: Option<Arc<Mutex<Option<ReentrantEntry<C>>>>>,
    pub(crate) release: Option<Arc<dyn Fn(Managed<C>) + Send + Sync>>,
    pub(crate) auto_commit: bool,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) log_arguments: bool,
    pub(crate) statement_cache_size: usize,
    pub(crate) cache_metadata: bool,
    pub(crate) released: bool,
}

/// What [`CallerContext`] stores between nested borrows: the underlying
/// connection and a depth counter shared by every handle issued for it.
pub(crate) struct ReentrantEntry<C: RawConnection> {
    pub managed: Arc<Mutex<Option<Managed<C>>>>,
    pub depth: Arc<AtomicU32>,
}

/// Caller-supplied correlation handle for reentrant borrows. Rather than a
/// thread/task-local (which would require wrapping arbitrary caller code in
/// a scoped future), callers that may need to borrow again before releasing
/// hold one of these across their own call stack and pass it to
/// [`crate::pool::Pool::acquire_with`] each time. Reused across nested
/// [`crate::pool::Pool::acquire_with`] calls on the same logical caller;
/// unrelated callers should each hold their own.
pub struct CallerContext<C: RawConnection> {
    pub(crate) slot: Arc<Mutex<Option<ReentrantEntry<C>>>>,
}

impl<C: RawConnection> CallerContext<C> {
    pub fn new() -> Self {
        CallerContext { slot: Arc::new(Mutex::new(None)) }
    }
}

impl<C: RawConnection> Default for CallerContext<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: RawConnection> Clone for CallerContext<C> {
    fn clone(&self) -> Self {
        CallerContext { slot: Arc::clone(&self.slot) }
    }
}

const GONE: &str = "(bug) connection used after close/release";

impl<C: RawConnection> ConnectionWrapper<C> {
    /// `prepareStatement`: cache hit returns the cached wrapper; miss
    /// delegates and wraps; `createStatement` bypasses the cache entirely
    ///.
    pub async fn prepare(&self, text: &str) -> Result<StatementId> {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);

        let wrapper = if self.statement_cache_size > 0 { managed.cache.remove(text) } else { None };

        let wrapper = match wrapper {
            Some(w) => w,
            None => {
                let raw = managed.raw.prepare(text).await.map_err(|e| managed.capture(e))?;
                StatementWrapper::new(raw, text.to_string(), self.log_arguments)
            }
        };

        Ok(check_in(managed, wrapper))
    }

    /// `createStatement`: always delegate, never cached.
    pub async fn create_statement(&self) -> Result<StatementId> {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);
        let raw = managed.raw.create_statement().await.map_err(|e| managed.capture(e))?;
        let wrapper = StatementWrapper::new(raw, String::new(), self.log_arguments);
        Ok(check_in(managed, wrapper))
    }

    pub async fn record_set(&self, id: StatementId, rendered: impl Into<String>) -> Result<()> {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);
        let stmt = managed.checked_out.get_mut(&id.0).ok_or(Error::UnknownStatement)?;
        stmt.record_set(rendered);
        Ok(())
    }

    /// `execute*`-family returning rows.
    pub async fn execute_query(
        &self,
        id: StatementId,
    ) -> Result<<C::Statement as RawStatement>::ResultSet> {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);
        let timeout = self.request_timeout;
        let stmt = managed.checked_out.get_mut(&id.0).ok_or(Error::UnknownStatement)?;
        let result = stmt.execute_query(timeout).await;
        match result {
            Ok(rs) => Ok(rs),
            Err(e) => Err(managed.capture(e)),
        }
    }

    /// `execute*`-family for updates: sets `commit_pending` when
    /// `auto_commit == false`.
    pub async fn execute_update(&self, id: StatementId) -> Result<u64> {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);
        let timeout = self.request_timeout;
        let auto_commit = self.auto_commit;
        let stmt = managed.checked_out.get_mut(&id.0).ok_or(Error::UnknownStatement)?;
        let outcome = stmt.execute_update(timeout, auto_commit).await;
        match outcome {
            Ok(outcome) => {
                if outcome.sets_commit_pending {
                    managed.commit_pending = true;
                }
                Ok(outcome.result)
            }
            Err(e) => Err(managed.capture(e)),
        }
    }

    /// `close()` on a statement: return to cache when bound, positive
    /// capacity, and poolable; otherwise destroy.
    pub async fn close_statement(&self, id: StatementId) -> Result<()> {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);
        let stmt = managed.checked_out.remove(&id.0).ok_or(Error::UnknownStatement)?;

        let poolable = stmt.is_poolable() && self.statement_cache_size > 0;
        if poolable {
            let key = stmt.key().to_string();
            if let Some((_, evicted)) = managed.cache.insert(key, stmt) {
                evicted.destroy().await.map_err(|e| managed.capture(e))?;
            }
            Ok(())
        } else {
            stmt.destroy().await.map_err(|e| managed.capture(e))
        }
    }

    /// `getMetaData()`: delegate, wrap, clear `commitPending`.
    pub async fn metadata(&self) -> Result<MetadataProxy<C::Metadata>> {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);
        let meta = managed.raw.metadata().await.map_err(|e| managed.capture(e))?;
        managed.commit_pending = false;
        Ok(MetadataProxy::new(meta, self.cache_metadata))
    }

    /// `commit()`: delegate, clear `commitPending`.
    pub async fn commit(&self) -> Result<()> {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);
        managed.raw.commit().await.map_err(|e| managed.capture(e))?;
        managed.commit_pending = false;
        Ok(())
    }

    /// `rollback()`: delegate, clear `commitPending`.
    pub async fn rollback(&self) -> Result<()> {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);
        managed.raw.rollback().await.map_err(|e| managed.capture(e))?;
        managed.commit_pending = false;
        Ok(())
    }

    /// `isValid(fullValidation)`.
    pub async fn is_valid(&self, full_validation: bool, validation_timeout: Duration) -> bool {
        let mut guard = self.managed.lock().await;
        let managed = guard.as_mut().expect(GONE);
        if managed.is_poisoned() {
            return false;
        }
        if full_validation && managed.validation_supported {
            return matches!(managed.raw.is_valid(validation_timeout).await, Ok(true));
        }
        true
    }

    pub async fn is_end_of_life(&self, max_lifetime: Option<Duration>) -> bool {
        let guard = self.managed.lock().await;
        guard.as_ref().expect(GONE).is_end_of_life(max_lifetime)
    }

    /// `close()`: a nested handle over a reentrant borrow just decrements
    /// the depth counter — the connection is still checked out by the outer
    /// caller, so its pending transaction is untouched. Only the outermost
    /// handle triggers the forced rollback (if a transaction is pending),
    /// best-effort warning clear, and release to the pool.
    pub async fn close(mut self) -> Result<()> {
        self.released = true;
        if self.depth.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Ok(());
        }

        if let Some(slot) = &self.ctx_slot {
            *slot.lock().await = None;
        }

        let had_pending = {
            let mut guard = self.managed.lock().await;
            let managed = guard.as_mut().expect(GONE);
            let pending = managed.commit_pending;
            if pending {
                let _ = managed.raw.rollback().await;
                managed.commit_pending = false;
            }
            let _ = managed.raw.clear_warnings().await;
            pending
        };

        if let Some(release) = self.release.take() {
            let mut guard = self.managed.lock().await;
            if let Some(managed) = guard.take() {
                release(managed);
            }
        }

        if had_pending {
            Err(Error::UncommittedTransactionForcedRollback)
        } else {
            Ok(())
        }
    }
}

impl<C: RawConnection> Drop for ConnectionWrapper<C> {
    fn drop(&mut self) {
        if self.released {
            // `close()` already decremented `depth` and released; nothing left to do.
            return;
        }
        if self.depth.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        if let Some(slot) = self.ctx_slot.clone() {
            tokio::spawn(async move { *slot.lock().await = None; });
        }

        let Some(release) = self.release.take() else { return };
        let managed = Arc::clone(&self.managed);

        // `close()` awaits the lock; `Drop` cannot await, so the forced
        // rollback and release are carried out on a spawned task. This
        // mirrors the spawn-on-drop pattern used for async cleanup when no
        // explicit `close()` was called.
        tokio::spawn(async move {
            let mut guard = managed.lock().await;
            if let Some(mut inner) = guard.take() {
                if inner.commit_pending {
                    if let Err(e) = inner.raw.rollback().await {
                        log::warn!("rollback-on-drop failed: {}", e);
                    }
                    inner.commit_pending = false;
                }
                let _ = inner.raw.clear_warnings().await;
                release(inner);
            }
        });
    }
}

fn check_in<C: RawConnection>(managed: &mut Managed<C>, wrapper: StatementWrapper<C::Statement>) -> StatementId {
    let id = managed.next_stmt_id.fetch_add(1, Ordering::Relaxed);
    managed.checked_out.insert(id, wrapper);
    StatementId(id)
}

/// Arguments the caller must supply for an open: URL, client properties, and
/// the per-connection configuration applied on open.
#[derive(Debug, Clone)]
pub struct OpenSpec {
    pub url: String,
    pub properties: Vec<(String, String)>,
    pub config: ConnectionConfig,
}
