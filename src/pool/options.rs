//! Pool configuration with the fallback/clamp rules spelled out
//! there. Mirrors the builder shape of `sqlx_core::pool::options::PoolOptions`.

use std::time::Duration;

use crate::driver::ConnectionConfig;

/// Builder for [`crate::pool::Pool`]. Every field has a default; call the
/// setters to override.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub(crate) min_connections: u32,
    pub(crate) max_connections: u32,
    pub(crate) connection_timeout: Duration,
    pub(crate) validate_on_borrow: bool,
    pub(crate) validation_timeout: Option<Duration>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_multiplier: u32,
    pub(crate) backoff_limit: Option<Duration>,
    pub(crate) inactivity_timeout: Duration,
    pub(crate) max_lifetime: Option<Duration>,
    pub(crate) prune_interval: Duration,
    pub(crate) statement_cache_size: usize,
    pub(crate) cache_metadata: bool,
    pub(crate) log_arguments: bool,
    pub(crate) config: ConnectionConfig,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            min_connections: 0,
            // The spec describes an unbounded ceiling by default, but a fixed-
            // capacity available queue
            // needs a concrete number up front; sqlx-core's own default
            // (`PoolOptions::max_connections = 10`) is the closest real-world
            // analogue, so it's reused here rather than inventing "unbounded"
            // (see DESIGN.md, Open Questions).
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
            validate_on_borrow: false,
            validation_timeout: None,
            request_timeout: None,
            backoff_base: Duration::from_secs(1),
            backoff_multiplier: 2,
            backoff_limit: None,
            inactivity_timeout: Duration::from_secs(300),
            max_lifetime: None,
            prune_interval: Duration::from_secs(60),
            statement_cache_size: 100,
            cache_metadata: false,
            log_arguments: false,
            config: ConnectionConfig::default(),
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        assert!(n > 0, "max_connections must be at least 1");
        self.max_connections = n;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn validate_on_borrow(mut self, validate: bool) -> Self {
        self.validate_on_borrow = validate;
        self
    }

    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: u32) -> Self {
        assert!(multiplier >= 1, "backoff_multiplier must be at least 1");
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn backoff_limit(mut self, limit: Duration) -> Self {
        self.backoff_limit = Some(limit);
        self
    }

    /// `0` disables inactivity pruning.
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// `None`/unset means unbounded lifetime.
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// `0` disables the pruner entirely.
    pub fn prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    /// `0` disables per-connection statement caching.
    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    pub fn cache_metadata(mut self, cache: bool) -> Self {
        self.cache_metadata = cache;
        self
    }

    pub fn log_arguments(mut self, log: bool) -> Self {
        self.log_arguments = log;
        self
    }

    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// `connectionTimeout` falls back to `requestTimeout` when zero.
    pub(crate) fn effective_connection_timeout(&self) -> Duration {
        if !self.connection_timeout.is_zero() {
            self.connection_timeout
        } else {
            self.request_timeout.unwrap_or(self.connection_timeout)
        }
    }

    /// `validationTimeout` falls back to `connectionTimeout` when unset or
    /// zero.
    pub(crate) fn effective_validation_timeout(&self) -> Duration {
        match self.validation_timeout {
            Some(t) if !t.is_zero() => t,
            _ => self.effective_connection_timeout(),
        }
    }

    /// `requestTimeout` has no fallback in the spec table, but `None`/zero
    /// is read as "no request-level timeout" rather than an instant one.
    pub(crate) fn effective_request_timeout(&self) -> Option<Duration> {
        self.request_timeout.filter(|t| !t.is_zero())
    }

    pub(crate) fn effective_max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime.filter(|t| !t.is_zero())
    }

    pub(crate) fn pruning_enabled(&self) -> bool {
        !self.inactivity_timeout.is_zero() && !self.prune_interval.is_zero()
    }
}
