use async_trait::async_trait;

use crate::{LightningError, QueryResult, Value};

/// Connection surface the engine runs against.
///
/// `execute` may use any pooled connection; statements that must share one
/// server session (`LOCK TABLES`, `CREATE TRIGGER`, `UNLOCK TABLES`) go
/// through a [`Session`] obtained from [`Backend::session`].
#[async_trait]
pub trait Backend: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, LightningError>;

    /// Acquires a dedicated connection for the lock window.
    async fn session(&self) -> Result<Box<dyn Session>, LightningError>;
}

/// A single dedicated connection. Every statement executed here runs on the
/// same server session, so session-scoped state (table locks) carries across
/// calls until the session is dropped.
#[async_trait]
pub trait Session: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, LightningError>;
}
