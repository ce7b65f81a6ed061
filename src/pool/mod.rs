//! The connection pool: a bounded set of driver
//! connections sitting behind [`Pool`], with three background tasks
//! (opener, pruner, retirer) keeping supply matched to demand.

pub(crate) mod inner;
pub mod options;
pub(crate) mod queue;

use std::sync::Arc;

use crate::connection::{CallerContext, ConnectionWrapper, OpenSpec};
use crate::driver::RawConnection;
use crate::error::Result;
use crate::session::SessionController;

pub use inner::PoolSize;
pub use options::PoolOptions;

/// A pool of driver connections: bounded, statement-caching, failure-aware
///. Cheap to clone; clones share the same underlying state and
/// background tasks.
pub struct Pool<C: RawConnection> {
    inner: Arc<inner::PoolInner<C>>,
}

impl<C: RawConnection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Pool { inner: Arc::clone(&self.inner) }
    }
}

impl<C: RawConnection> Pool<C> {
    pub fn builder() -> PoolOptions {
        PoolOptions::new()
    }

    /// Build and start a pool with no [`SessionController`]. Background
    /// opener/pruner/retirer tasks are spawned immediately.
    pub fn connect(options: PoolOptions, open_spec: OpenSpec) -> Self {
        Self::connect_with(options, open_spec, None)
    }

    pub fn connect_with(
        options: PoolOptions,
        open_spec: OpenSpec,
        session_controller: Option<Arc<dyn SessionController<C>>>,
    ) -> Self {
        let (inner, retire_rx) = inner::PoolInner::new(options, open_spec, session_controller);

        tokio::spawn(inner::PoolInner::run_opener(Arc::clone(&inner)));
        tokio::spawn(inner::PoolInner::run_pruner(Arc::clone(&inner)));
        tokio::spawn(inner::PoolInner::run_retirer(Arc::clone(&inner), retire_rx));

        if inner.options.min_connections > 0 {
            inner.kick();
        }

        Pool { inner }
    }

    /// Borrow a connection. Not reentrancy-aware: a nested call
    /// from the same logical caller before releasing the first contends for
    /// a second slot instead of sharing one. Use [`Pool::acquire_with`] for
    /// callers that may borrow again before releasing.
    pub async fn acquire(&self) -> Result<ConnectionWrapper<C>> {
        self.inner.acquire(None).await
    }

    /// Borrow a connection, reentrant with any other call sharing `ctx`
    ///.
    pub async fn acquire_with(&self, ctx: &CallerContext<C>) -> Result<ConnectionWrapper<C>> {
        self.inner.acquire(Some(ctx)).await
    }

    pub fn size(&self) -> PoolSize {
        self.inner.size()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Stop accepting new demand and drain idle connections to the retirer.
    /// In-flight borrows still release normally; a released connection after
    /// `close()` is retired rather than returned to the available queue is
    /// not currently special-cased (see DESIGN.md).
    pub async fn close(&self) {
        self.inner.close().await;
    }
}
