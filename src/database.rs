// Connection pool and scoped transactional sessions.
use std::fmt;
use std::ops::AsyncFnOnce;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls, Row};
use uuid::Uuid;

use crate::config::DatabaseSettings;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    #[error("transaction aborted by an earlier failed statement")]
    Aborted,
    #[error("session already closed")]
    Closed,
    #[error("invalid database configuration: {0}")]
    Config(String),
}

/// Which constraint a failed statement tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintViolation {
    ForeignKey,
    NotNull,
    Unique,
}

impl StoreError {
    /// Classifies by SQLSTATE; the driver error itself stays untouched.
    pub fn constraint_violation(&self) -> Option<ConstraintViolation> {
        let StoreError::Db(e) = self else {
            return None;
        };
        let code = e.code()?;
        if *code == SqlState::FOREIGN_KEY_VIOLATION {
            Some(ConstraintViolation::ForeignKey)
        } else if *code == SqlState::NOT_NULL_VIOLATION {
            Some(ConstraintViolation::NotNull)
        } else if *code == SqlState::UNIQUE_VIOLATION {
            Some(ConstraintViolation::Unique)
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown isolation level: {0}")]
pub struct ParseIsolationLevelError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn begin_statement(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "BEGIN ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "BEGIN ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = ParseIsolationLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(ParseIsolationLevelError(s.to_string())),
        }
    }
}

/// Column defaults evaluated on every insert. Each field is a factory, so
/// every row gets its own id and its own timestamp.
#[derive(Clone)]
pub struct ColumnDefaults {
    new_id: Arc<dyn Fn() -> Uuid + Send + Sync>,
    now: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl Default for ColumnDefaults {
    fn default() -> Self {
        Self {
            new_id: Arc::new(Uuid::new_v4),
            now: Arc::new(Utc::now),
        }
    }
}

impl fmt::Debug for ColumnDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDefaults").finish_non_exhaustive()
    }
}

impl ColumnDefaults {
    pub fn with_clock<F>(mut self, now: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.now = Arc::new(now);
        self
    }

    pub fn with_id_generator<F>(mut self, new_id: F) -> Self
    where
        F: Fn() -> Uuid + Send + Sync + 'static,
    {
        self.new_id = Arc::new(new_id);
        self
    }

    pub fn new_id(&self) -> Uuid {
        (self.new_id)()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now)()
    }
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
}

impl PoolStatus {
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.available)
    }
}

/// The process-wide engine: one pool, created once and handed around by
/// clone. Connections are opened lazily on first checkout.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
    isolation: Option<IsolationLevel>,
    defaults: ColumnDefaults,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("status", &self.status())
            .field("isolation", &self.isolation)
            .finish()
    }
}

impl Database {
    pub fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let pg_config: PgConfig = settings.url.parse()?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(settings.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(Duration::from_secs(settings.acquire_timeout_secs)))
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        info!(
            "database pool ready: max_connections={}, acquire_timeout={}s, isolation={:?}",
            settings.max_connections, settings.acquire_timeout_secs, settings.isolation
        );

        Ok(Self {
            pool,
            isolation: settings.isolation,
            defaults: ColumnDefaults::default(),
        })
    }

    /// Swaps the insert-time defaults; mostly useful in tests.
    pub fn with_defaults(mut self, defaults: ColumnDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn status(&self) -> PoolStatus {
        let s = self.pool.status();
        PoolStatus {
            max_size: s.max_size,
            size: s.size,
            available: s.available,
        }
    }

    /// Checks out a connection and opens a transaction on it.
    pub async fn session(&self) -> Result<Session, StoreError> {
        let client = self.pool.get().await?;
        let begin = self.isolation.map_or("BEGIN", IsolationLevel::begin_statement);
        client.batch_execute(begin).await?;
        debug!("session opened ({begin})");
        Ok(Session {
            client: Some(client),
            open: true,
            failed: false,
            defaults: self.defaults.clone(),
        })
    }

    /// Runs `f` inside one session: commit on `Ok`, rollback on `Err`.
    pub async fn with_session<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: AsyncFnOnce(&mut Session) -> Result<T, StoreError>,
    {
        let mut session = self.session().await?;
        match f(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!("rollback after failed unit of work also failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}

/// One transaction on one pooled connection.
///
/// `commit`, `rollback` and `close` hand the connection back to the pool.
/// Dropping a session that is still open (early return, panic, cancelled
/// task) rolls it back in the background before the connection is reused;
/// without a runtime to do that on, the connection is closed instead.
pub struct Session {
    client: Option<Object>,
    open: bool,
    failed: bool,
    defaults: ColumnDefaults,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.open)
            .field("failed", &self.failed)
            .finish()
    }
}

impl Session {
    fn client(&self) -> Result<&Object, StoreError> {
        self.client.as_ref().ok_or(StoreError::Closed)
    }

    fn track<T>(&mut self, result: Result<T, tokio_postgres::Error>) -> Result<T, StoreError> {
        if result.is_err() {
            self.failed = true;
        }
        result.map_err(StoreError::from)
    }

    pub fn defaults(&self) -> &ColumnDefaults {
        &self.defaults
    }

    /// True once any statement in this transaction has failed.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        let result = self.client()?.execute(sql, params).await;
        self.track(result)
    }

    pub async fn query(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        let result = self.client()?.query(sql, params).await;
        self.track(result)
    }

    pub async fn query_one(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, StoreError> {
        let result = self.client()?.query_one(sql, params).await;
        self.track(result)
    }

    pub async fn query_opt(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, StoreError> {
        let result = self.client()?.query_opt(sql, params).await;
        self.track(result)
    }

    /// Runs several statements with the simple query protocol (DDL).
    pub async fn batch_execute(&mut self, sql: &str) -> Result<(), StoreError> {
        let result = self.client()?.batch_execute(sql).await;
        self.track(result)
    }

    /// Commits and releases the connection. A session with a failed
    /// statement is rolled back instead and reports `Aborted`.
    pub async fn commit(mut self) -> Result<(), StoreError> {
        if self.failed {
            self.finish("ROLLBACK").await?;
            return Err(StoreError::Aborted);
        }
        self.finish("COMMIT").await
    }

    pub async fn rollback(mut self) -> Result<(), StoreError> {
        self.finish("ROLLBACK").await
    }

    /// Ends the session without keeping its writes.
    pub async fn close(self) -> Result<(), StoreError> {
        self.rollback().await
    }

    async fn finish(&mut self, statement: &str) -> Result<(), StoreError> {
        self.client()?.batch_execute(statement).await?;
        self.open = false;
        debug!("session finished ({statement})");
        // dropping the object returns it to the pool
        self.client.take();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        if !self.open {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let mut pending = PendingRollback(Some(client));
                handle.spawn(async move { pending.run().await });
            }
            Err(_) => {
                warn!("session dropped outside a runtime; discarding its connection");
                discard(client);
            }
        }
    }
}

/// Rolls back an abandoned transaction. Whatever happens to the task, the
/// connection never goes back to the pool with the transaction still open.
struct PendingRollback(Option<Object>);

impl PendingRollback {
    async fn run(&mut self) {
        let Some(client) = self.0.as_ref() else {
            return;
        };
        match client.batch_execute("ROLLBACK").await {
            Ok(()) => {
                debug!("abandoned session rolled back");
                self.0.take();
            }
            Err(e) => warn!("rollback of abandoned session failed: {e}"),
        }
    }
}

impl Drop for PendingRollback {
    fn drop(&mut self) {
        if let Some(client) = self.0.take() {
            discard(client);
        }
    }
}

/// Detaches the connection from the pool and closes it; the server aborts
/// any transaction still open on it.
fn discard(client: Object) {
    drop(Object::take(client));
}
