//! Collaborator interfaces: hooks a caller can plug in for
//! sequence-number injection and session preamble. Implementations are
//! deliberately not provided here — only the contract.

use async_trait::async_trait;
use std::time::Duration;

use crate::driver::RawConnection;

/// What a [`SessionController`] reports back after preparing a session.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub session_id: String,
    pub time_delta_millis: i64,
}

/// Invoked once per successful open.
#[async_trait]
pub trait SessionController<C: RawConnection>: Send + Sync {
    async fn prepare_session(&self, url: &str, conn: &mut C) -> Result<SessionData, C::Error>;
}

/// Optional hook DAO-layer helpers prefer over a local clock + `TimeDelta`
/// when present. Out of scope to implement concretely; only the
/// contract is specified.
#[async_trait]
pub trait StatementEnhancer<C: RawConnection>: Send + Sync {
    async fn get_statement(
        &self,
        url: &str,
        conn: &mut C,
        text: &str,
        key_column_names: &[String],
    ) -> Result<Option<C::Statement>, C::Error>;

    async fn system_timestamp(&self, conn: &mut C) -> Option<Duration>;

    async fn system_date(&self, conn: &mut C) -> Option<Duration>;
}
