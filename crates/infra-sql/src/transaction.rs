// Transaction Coordinator
//
// `transaction()` opens a scope on the current runner and hands the body a
// scoped runner bound to it:
//
//   Idle         BEGIN on a dedicated pooled connection, COMMIT/ROLLBACK
//   SandboxIdle  SAVEPOINT on the sandbox connection, RELEASE/ROLLBACK TO
//   in a scope   refused, nothing is acquired

use crate::error::map_sqlx_error;
use crate::runner::{exec_control, QueryRunner, Runner, Savepoint, SharedTx, State};
use futures::future::BoxFuture;
use keel_core::error::{AppError, Result};
use sqlx::AnyPool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

impl QueryRunner {
    /// Run `f` inside a transaction
    ///
    /// Returns `Ok(Some(v))` when the body succeeded and was committed,
    /// `Ok(None)` when the body rolled back through [`QueryRunner::rollback`],
    /// and `Err(AppError::Transaction(cause))` when the body failed and the
    /// transaction was rolled back on its behalf.
    ///
    /// The body receives its own runner; statements issued through it run on
    /// the transaction's connection.
    ///
    /// ```ignore
    /// let id = runner
    ///     .transaction(|tx| {
    ///         Box::pin(async move {
    ///             tx.execute("INSERT INTO users (name) VALUES ($1)", &["ada".into()])
    ///                 .await?;
    ///             Ok(1)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub fn transaction<'a, T, F>(&'a self, f: F) -> BoxFuture<'a, Result<Option<T>>>
    where
        T: Send + 'a,
        F: for<'r> FnOnce(&'r QueryRunner) -> BoxFuture<'r, Result<T>> + Send + 'a,
    {
        Box::pin(async move {
            let work = async move {
                match self.state() {
                    State::Idle(pool) => self.plain_transaction(pool, f).await,
                    State::SandboxIdle(shared) => self.savepoint_transaction(shared, f).await,
                    State::InTransaction(_) | State::InSandboxTransaction(..) => {
                        Err(AppError::illegal_state(
                            "nested transaction is not supported; use the runner passed to the transaction body",
                        ))
                    }
                }
            };
            self.traced_call("transaction", None, work).await
        })
    }

    async fn plain_transaction<T, F>(&self, pool: &AnyPool, f: F) -> Result<Option<T>>
    where
        F: for<'r> FnOnce(&'r QueryRunner) -> BoxFuture<'r, Result<T>>,
    {
        let tx = pool.begin().await.map_err(map_sqlx_error)?;
        debug!("BEGIN");

        let shared: SharedTx = Arc::new(Mutex::new(Some(tx)));
        let scoped = self.scoped(Runner::Transaction(shared.clone()));

        let outcome = f(&scoped).await;
        let tx = shared.lock().await.take();

        match (outcome, tx) {
            (Ok(value), Some(tx)) => {
                tx.commit()
                    .await
                    .map_err(|e| AppError::transaction(map_sqlx_error(e)))?;
                debug!("COMMIT");
                Ok(Some(value))
            }
            // rollback() already ran
            (Ok(_), None) => Ok(None),
            (Err(err), tx) => {
                if let Some(tx) = tx {
                    match tx.rollback().await {
                        Ok(()) => debug!("ROLLBACK"),
                        Err(e) => warn!(error = %e, "Rollback failed, connection discarded"),
                    }
                }
                if err.is_manual_rollback() {
                    Ok(None)
                } else {
                    Err(AppError::transaction(err))
                }
            }
        }
    }

    async fn savepoint_transaction<T, F>(&self, shared: &SharedTx, f: F) -> Result<Option<T>>
    where
        F: for<'r> FnOnce(&'r QueryRunner) -> BoxFuture<'r, Result<T>>,
    {
        let savepoint = Savepoint::new();
        exec_control(shared, &format!("SAVEPOINT {}", savepoint.id)).await?;
        debug!(savepoint = %savepoint.id, "SAVEPOINT");

        let scoped = self.scoped(Runner::Sandboxed {
            tx: shared.clone(),
            savepoint: Some(savepoint.clone()),
        });

        let outcome = f(&scoped).await;

        if savepoint.is_rolled_back() {
            release(shared, &savepoint).await;
            return match outcome {
                Err(err) if !err.is_manual_rollback() => Err(AppError::transaction(err)),
                _ => Ok(None),
            };
        }

        match outcome {
            Ok(value) => {
                exec_control(shared, &format!("RELEASE SAVEPOINT {}", savepoint.id))
                    .await
                    .map_err(AppError::transaction)?;
                debug!(savepoint = %savepoint.id, "RELEASE SAVEPOINT");
                Ok(Some(value))
            }
            Err(err) => {
                let undo = format!("ROLLBACK TO SAVEPOINT {}", savepoint.id);
                match exec_control(shared, &undo).await {
                    Ok(()) => debug!(savepoint = %savepoint.id, "ROLLBACK TO SAVEPOINT"),
                    Err(e) => warn!(savepoint = %savepoint.id, error = %e, "Savepoint rollback failed"),
                }
                release(shared, &savepoint).await;
                if err.is_manual_rollback() {
                    Ok(None)
                } else {
                    Err(AppError::transaction(err))
                }
            }
        }
    }
}

/// Drop a savepoint that has already been rolled back to
async fn release(shared: &SharedTx, savepoint: &Savepoint) {
    if let Err(e) = exec_control(shared, &format!("RELEASE SAVEPOINT {}", savepoint.id)).await {
        warn!(savepoint = %savepoint.id, error = %e, "Savepoint release failed");
    }
}
