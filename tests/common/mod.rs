//! A mock implementation of the `driver` traits, registered by URL so
//! `MockConnection::open` (an associated function with no `self`) can find
//! the shared control state for the pool under test. No real database is
//! involved; everything here is in-memory and deterministic.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;

use poolkeeper::{
    ConnectionConfig, DriverError, ErrorCategory, MetadataResult, RawConnection, RawMetadata,
    RawStatement,
};

static REGISTRY: Lazy<Mutex<HashMap<String, Arc<MockControl>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Shared knobs for one mock "database": how many opens to fail before
/// succeeding, and running counters the test asserts against.
#[derive(Default)]
pub struct MockControl {
    pub fail_opens_remaining: AtomicU64,
    pub opens_attempted: AtomicU64,
    pub opens_succeeded: AtomicU64,
    pub closes: AtomicU64,
    pub rollbacks: AtomicU64,
    pub attempt_times: Mutex<Vec<Instant>>,
    next_conn_id: AtomicU64,
}

impl MockControl {
    pub fn record_attempt(&self) {
        self.opens_attempted.fetch_add(1, Ordering::AcqRel);
        self.attempt_times.lock().unwrap().push(Instant::now());
    }
}

/// Register a fresh control block under `url` and return it. Each test
/// should use a unique url so tests run concurrently without cross-talk.
pub fn register(url: &str) -> Arc<MockControl> {
    let control = Arc::new(MockControl::default());
    REGISTRY.lock().unwrap().insert(url.to_string(), Arc::clone(&control));
    control
}

fn lookup(url: &str) -> Arc<MockControl> {
    REGISTRY
        .lock()
        .unwrap()
        .get(url)
        .cloned()
        .unwrap_or_else(|| panic!("no MockControl registered for {url}, call common::register first"))
}

#[derive(Debug)]
pub struct MockError {
    pub state: Option<String>,
    pub message: String,
}

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MockError {}

impl DriverError for MockError {
    fn state_code(&self) -> Option<&str> {
        self.state.as_deref()
    }

    fn category(&self) -> Option<ErrorCategory> {
        None
    }
}

pub struct MockConnection {
    pub id: u64,
    control: Arc<MockControl>,
}

/// A statement text of the form `ERR:<state-code>` makes the next execute on
/// it fail with that classification instead of succeeding.
fn error_for(text: &str) -> Option<MockError> {
    text.strip_prefix("ERR:").map(|state| MockError {
        state: Some(state.to_string()),
        message: format!("simulated failure ({state})"),
    })
}

#[async_trait]
impl RawConnection for MockConnection {
    type Statement = MockStatement;
    type Metadata = MockMetadata;
    type Error = MockError;

    async fn open(
        url: &str,
        _properties: &[(String, String)],
        _login_timeout: Duration,
    ) -> Result<Self, Self::Error> {
        let control = lookup(url);
        control.record_attempt();

        let remaining = control.fail_opens_remaining.load(Ordering::Acquire);
        if remaining > 0 {
            control.fail_opens_remaining.fetch_sub(1, Ordering::AcqRel);
            return Err(MockError { state: Some("08001".into()), message: "simulated connect failure".into() });
        }

        control.opens_succeeded.fetch_add(1, Ordering::AcqRel);
        let id = control.next_conn_id.fetch_add(1, Ordering::AcqRel);
        Ok(MockConnection { id, control })
    }

    async fn configure(&mut self, _config: &ConnectionConfig) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn is_valid(&mut self, _timeout: Duration) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn prepare(&mut self, text: &str) -> Result<Self::Statement, Self::Error> {
        Ok(MockStatement { text: text.to_string(), control: Arc::clone(&self.control), timeout: None })
    }

    async fn create_statement(&mut self) -> Result<Self::Statement, Self::Error> {
        Ok(MockStatement { text: String::new(), control: Arc::clone(&self.control), timeout: None })
    }

    async fn commit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Self::Error> {
        self.control.rollbacks.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn clear_warnings(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn metadata(&mut self) -> Result<Self::Metadata, Self::Error> {
        Ok(MockMetadata)
    }

    async fn close(self) -> Result<(), Self::Error> {
        self.control.closes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

pub struct MockStatement {
    text: String,
    control: Arc<MockControl>,
    timeout: Option<Duration>,
}

#[async_trait]
impl RawStatement for MockStatement {
    type ResultSet = Vec<Vec<String>>;
    type Error = MockError;

    fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    async fn execute_query(&mut self) -> Result<Self::ResultSet, Self::Error> {
        if let Some(e) = error_for(&self.text) {
            return Err(e);
        }
        let _ = &self.control;
        Ok(vec![])
    }

    async fn execute_update(&mut self) -> Result<u64, Self::Error> {
        if let Some(e) = error_for(&self.text) {
            return Err(e);
        }
        Ok(1)
    }

    async fn close(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub struct MockMetadata;

#[async_trait]
impl RawMetadata for MockMetadata {
    type Error = MockError;

    async fn invoke(&mut self, _method: &str, _args: &[String]) -> Result<MetadataResult, Self::Error> {
        Ok(MetadataResult::Scalar("ok".into()))
    }
}
