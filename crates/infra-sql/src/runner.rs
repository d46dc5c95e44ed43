// Query Runner
//
// A capability object over either the pool or one transactional
// connection. Which one is decided by the `Runner` variant:
//
//   Plain        idle, every statement checks a connection out of the pool
//   Transaction  scoped to one BEGIN ... COMMIT/ROLLBACK on a dedicated connection
//   Sandboxed    outer transaction that is never committed; `savepoint` is
//                None for the sandbox root and Some inside a transaction() scope
//   Traced       decorator that wraps every call in a tracing span

use crate::connection::create_pool;
use crate::dialect::Dialect;
use crate::error::map_sqlx_error;
use crate::value::{bind_all, SqlValue};
use futures::future::BoxFuture;
use keel_core::config::{sanitize_url, DatabaseConfig};
use keel_core::error::{AppError, Result};
use sqlx::any::AnyRow;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, AnyPool, Executor};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, Instrument, Span};
use uuid::Uuid;

/// Transaction shared between a `transaction()` call and its scoped runner
///
/// `None` once the transaction has been committed or rolled back.
pub(crate) type SharedTx = Arc<Mutex<Option<sqlx::Transaction<'static, Any>>>>;

#[derive(Debug, Clone)]
pub(crate) struct Savepoint {
    pub(crate) id: String,
    pub(crate) rolled_back: Arc<AtomicBool>,
}

impl Savepoint {
    pub(crate) fn new() -> Self {
        Self {
            id: format!("sp_{}", Uuid::new_v4().simple()),
            rolled_back: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn is_rolled_back(&self) -> bool {
        self.rolled_back.load(Ordering::SeqCst)
    }
}

pub(crate) enum Runner {
    Plain(AnyPool),
    Transaction(SharedTx),
    Sandboxed {
        tx: SharedTx,
        savepoint: Option<Savepoint>,
    },
    Traced(Box<Runner>),
}

/// Transaction state of a runner, with `Traced` layers looked through
pub(crate) enum State<'a> {
    Idle(&'a AnyPool),
    InTransaction(&'a SharedTx),
    SandboxIdle(&'a SharedTx),
    InSandboxTransaction(&'a SharedTx, &'a Savepoint),
}

impl Runner {
    fn state(&self) -> State<'_> {
        match self {
            Runner::Plain(pool) => State::Idle(pool),
            Runner::Transaction(tx) => State::InTransaction(tx),
            Runner::Sandboxed {
                tx,
                savepoint: None,
            } => State::SandboxIdle(tx),
            Runner::Sandboxed {
                tx,
                savepoint: Some(sp),
            } => State::InSandboxTransaction(tx, sp),
            Runner::Traced(inner) => inner.state(),
        }
    }
}

/// Connection checked out for a single statement
enum Checkout<'a> {
    Pooled(PoolConnection<Any>),
    Held(MutexGuard<'a, Option<sqlx::Transaction<'static, Any>>>),
}

impl Checkout<'_> {
    fn conn(&mut self) -> Result<&mut AnyConnection> {
        match self {
            Checkout::Pooled(conn) => Ok(&mut **conn),
            Checkout::Held(guard) => Option::as_mut(&mut **guard)
                .map(|tx| &mut **tx)
                .ok_or_else(finished),
        }
    }
}

pub(crate) fn finished() -> AppError {
    AppError::illegal_state("transaction already finished; this runner can no longer be used")
}

pub struct QueryRunner {
    pub(crate) runner: Runner,
    pub(crate) dialect: Dialect,
}

impl QueryRunner {
    /// Connect using the configured URL or discrete fields
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.connection_url()?;
        let dialect = Dialect::from_url(&url)?;

        info!(url = %sanitize_url(&url), "Connecting to database");
        let pool = create_pool(&url, config.max_connections).await?;

        Ok(Self::from_pool(pool, dialect))
    }

    pub fn from_pool(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            runner: Runner::Plain(pool),
            dialect,
        }
    }

    /// Runner whose outer transaction is never committed
    ///
    /// Each `transaction()` on it becomes a savepoint; `close()` rolls the
    /// whole thing back. Used to isolate tests against a shared database.
    pub async fn sandbox(pool: &AnyPool, dialect: Dialect) -> Result<Self> {
        let tx = pool.begin().await.map_err(map_sqlx_error)?;
        debug!("BEGIN (sandbox)");
        Ok(Self {
            runner: Runner::Sandboxed {
                tx: Arc::new(Mutex::new(Some(tx))),
                savepoint: None,
            },
            dialect,
        })
    }

    /// Wrap this runner so every call emits a span
    pub fn traced(self) -> Self {
        if self.is_traced() {
            return self;
        }
        Self {
            runner: Runner::Traced(Box::new(self.runner)),
            dialect: self.dialect,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_traced(&self) -> bool {
        matches!(self.runner, Runner::Traced(_))
    }

    /// True inside a `transaction()` scope (plain or sandboxed)
    pub fn is_in_transaction(&self) -> bool {
        matches!(
            self.state(),
            State::InTransaction(_) | State::InSandboxTransaction(..)
        )
    }

    pub(crate) fn state(&self) -> State<'_> {
        self.runner.state()
    }

    /// Runner for a transaction scope, keeping the tracing decorator
    pub(crate) fn scoped(&self, runner: Runner) -> QueryRunner {
        let runner = if self.is_traced() {
            Runner::Traced(Box::new(runner))
        } else {
            runner
        };
        QueryRunner {
            runner,
            dialect: self.dialect,
        }
    }

    /// Run a statement and return its rows
    pub fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<AnyRow>>> {
        Box::pin(async move {
            self.reject_raw_rollback(sql)?;
            let work = async {
                let mut checkout = self.checkout().await?;
                checkout
                    .conn()?
                    .fetch_all(bind_all(sqlx::query(sql), params))
                    .await
                    .map_err(map_sqlx_error)
            };
            self.traced_call("query", Some(sql), work).await
        })
    }

    /// Run a statement and return the number of affected rows
    pub fn execute<'a>(&'a self, sql: &'a str, params: &'a [SqlValue]) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.reject_raw_rollback(sql)?;
            let work = async {
                let mut checkout = self.checkout().await?;
                checkout
                    .conn()?
                    .execute(bind_all(sqlx::query(sql), params))
                    .await
                    .map(|done| done.rows_affected())
                    .map_err(map_sqlx_error)
            };
            self.traced_call("execute", Some(sql), work).await
        })
    }

    /// Run a multi-statement script without parameters (migration bodies)
    pub fn execute_script<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.reject_raw_rollback(sql)?;
            let work = async {
                let mut checkout = self.checkout().await?;
                checkout
                    .conn()?
                    .execute(sqlx::raw_sql(sql))
                    .await
                    .map(|done| done.rows_affected())
                    .map_err(map_sqlx_error)
            };
            self.traced_call("script", Some(sql), work).await
        })
    }

    /// Release the pool, or roll back and release a sandbox connection
    pub async fn close(&self) -> Result<()> {
        match self.state() {
            State::Idle(pool) => {
                pool.close().await;
                info!("Connection pool closed");
                Ok(())
            }
            State::SandboxIdle(shared) => {
                if let Some(tx) = shared.lock().await.take() {
                    tx.rollback().await.map_err(map_sqlx_error)?;
                    debug!("ROLLBACK (sandbox)");
                }
                Ok(())
            }
            State::InTransaction(_) | State::InSandboxTransaction(..) => Err(
                AppError::illegal_state("close inside transaction is not allowed"),
            ),
        }
    }

    /// Abort the enclosing transaction
    ///
    /// Always returns `Err`. On success the error is
    /// `AppError::ManualRollback`, which the enclosing `transaction()`
    /// swallows, so a body can `runner.rollback().await?` to unwind without
    /// the caller seeing a failure.
    pub async fn rollback(&self) -> Result<()> {
        match self.state() {
            State::InTransaction(shared) => {
                let tx = shared.lock().await.take().ok_or_else(finished)?;
                tx.rollback().await.map_err(map_sqlx_error)?;
                debug!("ROLLBACK (manual)");
                Err(AppError::ManualRollback)
            }
            State::InSandboxTransaction(shared, savepoint) => {
                if savepoint.is_rolled_back() {
                    return Err(finished());
                }
                exec_control(shared, &format!("ROLLBACK TO SAVEPOINT {}", savepoint.id)).await?;
                savepoint.rolled_back.store(true, Ordering::SeqCst);
                debug!(savepoint = %savepoint.id, "ROLLBACK TO SAVEPOINT (manual)");
                Err(AppError::ManualRollback)
            }
            State::Idle(_) | State::SandboxIdle(_) => Err(AppError::illegal_state(
                "rollback() called outside of a transaction",
            )),
        }
    }

    async fn checkout(&self) -> Result<Checkout<'_>> {
        match self.state() {
            State::Idle(pool) => Ok(Checkout::Pooled(
                pool.acquire().await.map_err(map_sqlx_error)?,
            )),
            State::InSandboxTransaction(_, savepoint) if savepoint.is_rolled_back() => {
                Err(finished())
            }
            State::InTransaction(shared)
            | State::SandboxIdle(shared)
            | State::InSandboxTransaction(shared, _) => Ok(Checkout::Held(shared.lock().await)),
        }
    }

    /// Raw ROLLBACK would desync the driver's transaction tracking from ours
    fn reject_raw_rollback(&self, sql: &str) -> Result<()> {
        let holds_transaction = !matches!(self.state(), State::Idle(_));
        if holds_transaction && contains_rollback(sql) {
            return Err(AppError::illegal_state(
                "ROLLBACK statements are not allowed inside a transaction; use rollback() instead",
            ));
        }
        Ok(())
    }

    pub(crate) async fn traced_call<F, T>(&self, op: &'static str, sql: Option<&str>, work: F) -> T
    where
        F: Future<Output = T>,
    {
        match self.span(op, sql) {
            Some(span) => work.instrument(span).await,
            None => work.await,
        }
    }

    fn span(&self, op: &'static str, sql: Option<&str>) -> Option<Span> {
        if !self.is_traced() {
            return None;
        }
        Some(tracing::info_span!(
            "db.query",
            db.system = self.dialect.system(),
            db.operation = op,
            db.statement = sql.unwrap_or_default(),
        ))
    }
}

/// Run a control statement (SAVEPOINT and friends) on a held transaction
pub(crate) async fn exec_control(shared: &SharedTx, sql: &str) -> Result<()> {
    let mut guard = shared.lock().await;
    let tx = Option::as_mut(&mut *guard).ok_or_else(finished)?;
    let conn: &mut AnyConnection = &mut **tx;
    conn.execute(sqlx::raw_sql(sql))
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

/// Does any statement in `sql` start with ROLLBACK (comments skipped)?
fn contains_rollback(sql: &str) -> bool {
    blank_literals(sql).split(';').any(|statement| {
        let head = statement.trim_start();
        head.get(..8)
            .is_some_and(|word| word.eq_ignore_ascii_case("rollback"))
            && !head[8..].starts_with(|c: char| c.is_alphanumeric() || c == '_')
    })
}

/// `sql` with comments turned into whitespace and every quoted region
/// (strings, quoted identifiers, dollar-quoted bodies) collapsed to `''`
fn blank_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(c) = rest.chars().next() {
        let skip = if rest.starts_with("--") {
            out.push(' ');
            rest.find('\n').unwrap_or(rest.len())
        } else if rest.starts_with("/*") {
            out.push(' ');
            block_comment_len(rest)
        } else if c == '\'' || c == '"' {
            out.push_str("''");
            rest[1..].find(c).map_or(rest.len(), |i| i + 2)
        } else if let Some(tag) = dollar_tag(rest) {
            out.push_str("''");
            rest[tag.len()..]
                .find(tag)
                .map_or(rest.len(), |i| i + 2 * tag.len())
        } else {
            out.push(c);
            c.len_utf8()
        };
        rest = &rest[skip..];
    }
    out
}

/// Length of a (possibly nested) block comment at the start of `s`
fn block_comment_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"/*") {
            depth += 1;
            i += 2;
        } else if bytes[i..].starts_with(b"*/") {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// Opening `$tag$` of a dollar-quoted string; `$1` placeholders don't qualify
fn dollar_tag(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('$')?;
    let close = inner.find('$')?;
    let tag = &inner[..close];
    let valid = tag
        .chars()
        .next()
        .map_or(true, |c| c.is_alphabetic() || c == '_')
        && tag.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then(|| &s[..close + 2])
}
