//! Pool state and the three background tasks.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use event_listener::Event;
use tokio::sync::{mpsc, Mutex};

use crate::connection::{CallerContext, ConnectionWrapper, Managed, OpenSpec, ReentrantEntry};
use crate::driver::{DriverError, RawConnection};
use crate::error::{Error, Result};
use crate::pool::options::PoolOptions;
use crate::pool::queue::AvailableQueue;
use crate::session::SessionController;
use crate::statement_cache::StatementCache;
use crate::time_delta::TimeDelta;

pub(crate) struct PoolInner<C: RawConnection> {
    pub options: PoolOptions,
    open_spec: OpenSpec,
    session_controller: Option<Arc<dyn SessionController<C>>>,
    pub time_delta: Arc<TimeDelta>,

    available: AvailableQueue<C>,
    retire_tx: mpsc::UnboundedSender<Managed<C>>,

    total_count: AtomicU32,
    supply_counter: AtomicI64,
    active_high_water_mark: AtomicU32,
    churn_count: AtomicU64,
    closed: AtomicBool,

    demand_signal: Event,
    backoff: Mutex<BackoffState>,
    last_prune_at: Mutex<Instant>,
}

struct BackoffState {
    current: Duration,
    last_failure_at: Option<Instant>,
}

/// Point-in-time counters, mostly useful for tests and introspection.
#[derive(Debug, Clone, Copy)]
pub struct PoolSize {
    pub total: u32,
    pub available: u32,
    pub active: u32,
    pub churn_count: u64,
}

impl<C: RawConnection> PoolInner<C> {
    pub fn new(
        options: PoolOptions,
        open_spec: OpenSpec,
        session_controller: Option<Arc<dyn SessionController<C>>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Managed<C>>) {
        let (retire_tx, retire_rx) = mpsc::unbounded_channel();
        let inner = PoolInner {
            available: AvailableQueue::new(options.max_connections as usize),
            retire_tx,
            total_count: AtomicU32::new(0),
            supply_counter: AtomicI64::new(0),
            active_high_water_mark: AtomicU32::new(0),
            churn_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            demand_signal: Event::new(),
            backoff: Mutex::new(BackoffState { current: Duration::ZERO, last_failure_at: None }),
            last_prune_at: Mutex::new(Instant::now()),
            time_delta: Arc::new(TimeDelta::new()),
            session_controller,
            open_spec,
            options,
        };
        (Arc::new(inner), retire_rx)
    }

    pub fn size(&self) -> PoolSize {
        let total = self.total_count.load(Ordering::Acquire);
        let available = self.available.len() as u32;
        PoolSize {
            total,
            available,
            active: total.saturating_sub(available),
            churn_count: self.churn_count.load(Ordering::Acquire),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wake the opener without waiting for a borrow to do it, e.g. right
    /// after construction when `min_connections > 0`.
    pub(crate) fn kick(&self) {
        self.demand_signal.notify(1);
    }

    /// spec §4.2: borrow a connection, honoring reentrancy when `ctx` is given.
    pub async fn acquire(self: &Arc<Self>, ctx: Option<&CallerContext<C>>) -> Result<ConnectionWrapper<C>> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        if let Some(ctx) = ctx {
            let mut slot = ctx.slot.lock().await;
            if let Some(entry) = slot.as_ref() {
                entry.depth.fetch_add(1, Ordering::AcqRel);
                return Ok(self.wrap(Arc::clone(&entry.managed), Arc::clone(&entry.depth), Some(Arc::clone(&ctx.slot))));
            }
            // Falls through to a normal borrow below, with the slot still
            // locked so a concurrent nested call on the same context can't
            // race ahead of us; filled in once the borrow succeeds.
            let wrapper = self.acquire_fresh().await?;
            *slot = Some(ReentrantEntry { managed: Arc::clone(&wrapper.managed), depth: Arc::clone(&wrapper.depth) });
            return Ok(wrapper);
        }

        self.acquire_fresh().await
    }

    async fn acquire_fresh(self: &Arc<Self>) -> Result<ConnectionWrapper<C>> {
        self.supply_counter.fetch_sub(1, Ordering::AcqRel);
        let deadline = Instant::now() + self.options.effective_connection_timeout();

        loop {
            self.demand_signal.notify(1);

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.supply_counter.fetch_add(1, Ordering::AcqRel);
                return Err(Error::ConnectionTimeout);
            }

            let Some(mut managed) = self.available.pop_timeout(remaining).await else {
                self.supply_counter.fetch_add(1, Ordering::AcqRel);
                return Err(Error::ConnectionTimeout);
            };

            if managed.is_end_of_life(self.options.effective_max_lifetime()) {
                self.supply_counter.fetch_sub(1, Ordering::AcqRel);
                self.retire(managed).await;
                continue;
            }

            // spec §4.2c: a captured Communication/System error retires the
            // connection unconditionally, independent of `validate_on_borrow`.
            if managed.is_poisoned() {
                self.supply_counter.fetch_sub(1, Ordering::AcqRel);
                self.churn_count.fetch_add(1, Ordering::AcqRel);
                self.retire(managed).await;
                continue;
            }

            if self.options.validate_on_borrow {
                let timeout = self.options.effective_validation_timeout();
                let valid =
                    !managed.validation_supported || matches!(managed.raw.is_valid(timeout).await, Ok(true));
                if !valid {
                    self.supply_counter.fetch_sub(1, Ordering::AcqRel);
                    self.churn_count.fetch_add(1, Ordering::AcqRel);
                    self.retire(managed).await;
                    continue;
                }
            }

            let active = self.total_count.load(Ordering::Acquire).saturating_sub(self.available.len() as u32);
            self.active_high_water_mark.fetch_max(active, Ordering::AcqRel);

            let managed = Arc::new(Mutex::new(Some(managed)));
            let depth = Arc::new(AtomicU32::new(1));
            return Ok(self.wrap(managed, depth, None));
        }
    }

    fn wrap(
        self: &Arc<Self>,
        managed: Arc<Mutex<Option<Managed<C>>>>,
        depth: Arc<AtomicU32>,
        ctx_slot: Option<Arc<Mutex<Option<ReentrantEntry<C>>>>>,
    ) -> ConnectionWrapper<C> {
        let pool = Arc::clone(self);
        ConnectionWrapper {
            managed,
            depth,
            ctx_slot,
            release: Some(Arc::new(move |conn: Managed<C>| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.release(conn).await });
            })),
            auto_commit: self.open_spec.config.auto_commit,
            request_timeout: self.options.effective_request_timeout(),
            log_arguments: self.options.log_arguments,
            statement_cache_size: self.options.statement_cache_size,
            cache_metadata: self.options.cache_metadata,
            released: false,
        }
    }

    /// spec §4.3: release a connection back to the pool, or retire it if poisoned.
    async fn release(self: &Arc<Self>, managed: Managed<C>) {
        if managed.is_poisoned() {
            self.churn_count.fetch_add(1, Ordering::AcqRel);
            self.retire(managed).await;
        } else {
            self.supply_counter.fetch_add(1, Ordering::AcqRel);
            self.available.push(managed);
        }
    }

    /// Hand a connection to the retirer task, decrementing `total_count`
    /// immediately so the opener can react.
    async fn retire(&self, managed: Managed<C>) {
        self.total_count.fetch_sub(1, Ordering::AcqRel);
        if self.retire_tx.send(managed).is_err() {
            log::warn!("retirer task gone, dropping a connection without a clean close");
        }
    }

    fn opener_should_run(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let total = self.total_count.load(Ordering::Acquire);
        if total >= self.options.max_connections {
            return false;
        }
        self.supply_counter.load(Ordering::Acquire) < 0 || total < self.options.min_connections
    }

    /// spec §4.4: opener background task.
    pub async fn run_opener(self: Arc<Self>) {
        loop {
            while self.opener_should_run() {
                if let Some(wait) = self.backoff_wait().await {
                    tokio::time::sleep(wait).await;
                    if !self.opener_should_run() {
                        break;
                    }
                }

                match self.open_one().await {
                    Ok(managed) => {
                        self.total_count.fetch_add(1, Ordering::AcqRel);
                        self.supply_counter.fetch_add(1, Ordering::AcqRel);
                        self.available.push(managed);
                        let mut backoff = self.backoff.lock().await;
                        backoff.current = Duration::ZERO;
                        backoff.last_failure_at = None;
                    }
                    Err(e) => {
                        log::warn!("failed to open a pooled connection: {}", e);
                        let mut backoff = self.backoff.lock().await;
                        backoff.current = next_backoff(&self.options, backoff.current);
                        backoff.last_failure_at = Some(Instant::now());
                    }
                }
            }

            if self.is_closed() {
                return;
            }

            let listener = self.demand_signal.listen();
            if self.opener_should_run() {
                continue;
            }
            listener.await;
        }
    }

    async fn backoff_wait(&self) -> Option<Duration> {
        let backoff = self.backoff.lock().await;
        let last_failure_at = backoff.last_failure_at?;
        if backoff.current.is_zero() {
            return None;
        }
        let elapsed = last_failure_at.elapsed();
        Some(backoff.current.saturating_sub(elapsed)).filter(|d| !d.is_zero())
    }

    async fn open_one(&self) -> std::result::Result<Managed<C>, C::Error> {
        let login_timeout = self.options.effective_connection_timeout();
        let mut raw = C::open(&self.open_spec.url, &self.open_spec.properties, login_timeout).await?;

        if let Err(e) = raw.configure(&self.open_spec.config).await {
            if e.is_unsupported_feature() {
                log::debug!("connection configuration partially unsupported: {}", e);
            } else {
                let _ = raw.close().await;
                return Err(e);
            }
        }

        // spec §4.7 step 3: probe isValid once to empirically decide whether
        // validation is supported at all, rather than trusting a static
        // capability declared by the driver.
        let validation_supported =
            !matches!(raw.is_valid(self.options.effective_validation_timeout()).await, Err(e) if e.is_unsupported_feature());
        let mut managed = Managed::new(raw, validation_supported);
        managed.cache = StatementCache::new(self.options.statement_cache_size);

        if let Some(controller) = &self.session_controller {
            match controller.prepare_session(&self.open_spec.url, &mut managed.raw).await {
                Ok(session) => {
                    self.time_delta.update(session.time_delta_millis);
                    managed.descriptor =
                        format!("{} (skew {}ms)", session.session_id, self.time_delta.get());
                    managed.session_id = Some(session.session_id);
                }
                Err(e) => {
                    let _ = managed.raw.close().await;
                    return Err(e);
                }
            }
        }

        Ok(managed)
    }

    /// spec §4.5: inactivity pruning, converging total connections down to
    /// the high-water mark observed during the preceding window.
    pub async fn run_pruner(self: Arc<Self>) {
        if !self.options.pruning_enabled() {
            return;
        }
        let mut ticker = tokio::time::interval(self.options.prune_interval);
        loop {
            ticker.tick().await;
            if self.is_closed() {
                return;
            }

            let mut last_prune_at = self.last_prune_at.lock().await;
            if last_prune_at.elapsed() < self.options.inactivity_timeout {
                continue;
            }
            *last_prune_at = Instant::now();
            drop(last_prune_at);

            let floor = self.options.min_connections.max(self.active_high_water_mark.swap(0, Ordering::AcqRel));
            while self.total_count.load(Ordering::Acquire) > floor {
                let Some(managed) = self.available.try_pop() else { break };
                self.supply_counter.fetch_sub(1, Ordering::AcqRel);
                self.retire(managed).await;
            }
        }
    }

    /// spec §4.6: retirer background task, owns closing a retired connection
    /// and draining its statement cache.
    pub async fn run_retirer(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Managed<C>>) {
        while let Some(managed) = rx.recv().await {
            self.retire_one(managed).await;
        }
    }

    async fn retire_one(&self, mut managed: Managed<C>) {
        for (_, stmt) in managed.cache.drain() {
            if let Err(e) = stmt.destroy().await {
                log::warn!("failed to close a cached statement during retirement: {}", e);
            }
        }
        if let Err(e) = managed.raw.close().await {
            log::warn!("failed to close a retired connection: {}", e);
        }
    }

    pub async fn close(self: &Arc<Self>) {
        self.closed.store(true, Ordering::Release);
        self.demand_signal.notify(usize::MAX);
        while let Some(managed) = self.available.try_pop() {
            self.total_count.fetch_sub(1, Ordering::AcqRel);
            let _ = self.retire_tx.send(managed);
        }
    }
}

/// spec §4.4: `current == 0` seeds at `backoffBase`; otherwise multiply and
/// clamp to `backoffLimit` when one is configured.
fn next_backoff(options: &PoolOptions, current: Duration) -> Duration {
    let next = if current.is_zero() {
        options.backoff_base
    } else {
        current.saturating_mul(options.backoff_multiplier)
    };
    match options.backoff_limit {
        Some(limit) if !limit.is_zero() => next.min(limit),
        _ => next,
    }
}
