//! The transaction bound to one unit of work.

use crate::context::{self, ContextKey};
use asupersync::{Cx, Outcome};
use sqlscope_core::{Connection, Error, Result, TransactionErrorKind};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Context slot holding the transaction of the innermost active unit of work.
pub const CURRENT_TRANSACTION: ContextKey = ContextKey::new("sqlscope.current_transaction");

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Is any unit of work active on the current call path, whatever its connection type?
pub fn in_unit_of_work() -> bool {
    context::has_key(CURRENT_TRANSACTION)
}

/// Binds one connection to one unit of work.
///
/// Created fresh by [`with_transaction`](crate::with_transaction) for every
/// unit of work and published as the ambient current transaction while the
/// unit of work's action runs. The connection is shared, not owned: the pool
/// lease (or, for nested units of work, the outer transaction) keeps ownership.
///
/// With `use_transaction` off, no BEGIN/COMMIT/ROLLBACK is ever issued and every
/// statement takes effect immediately. Nested units of work run that way on the
/// outer transaction's connection; applications may also use it while debugging.
pub struct Transaction<C: Connection> {
    id: u64,
    connection: Arc<C>,
    use_transaction: bool,
    committed: AtomicBool,
    rolled_back: AtomicBool,
}

impl<C: Connection> Transaction<C> {
    pub fn new(connection: Arc<C>, use_transaction: bool) -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            connection,
            use_transaction,
            committed: AtomicBool::new(false),
            rolled_back: AtomicBool::new(false),
        }
    }

    /// The transaction of the innermost active unit of work.
    ///
    /// Fails with [`TransactionErrorKind::NoActiveTransaction`] outside any unit
    /// of work. The handle must not be kept past the end of the unit of work.
    pub fn current() -> Result<Arc<Self>> {
        if let Some(tx) = context::lookup::<Self>(CURRENT_TRANSACTION) {
            return Ok(tx);
        }
        let message = if in_unit_of_work() {
            "the active unit of work runs on a different connection type"
        } else {
            "no unit of work is active on this call path"
        };
        Err(Error::transaction(
            TransactionErrorKind::NoActiveTransaction,
            message,
        ))
    }

    /// Diagnostic id, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Are BEGIN/COMMIT/ROLLBACK issued for this transaction?
    pub fn use_transaction(&self) -> bool {
        self.use_transaction
    }

    /// Has the unit of work's action completed successfully?
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    /// Has [`rollback`](Transaction::rollback) aborted this transaction?
    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back.load(Ordering::Acquire)
    }

    fn rolled_back_error(&self) -> Error {
        Error::transaction(
            TransactionErrorKind::RolledBack,
            format!("transaction {} was rolled back", self.id),
        )
    }

    /// Run `action` as this transaction's unit of work.
    ///
    /// With `use_transaction` the connection's
    /// [`run_in_transaction`](Connection::run_in_transaction) wraps the action;
    /// otherwise the action runs directly. A successful outcome marks the
    /// transaction committed. If the action called [`rollback`](Transaction::rollback)
    /// a successful outcome becomes a [`TransactionErrorKind::RolledBack`] error,
    /// so the connection rolls back instead of committing.
    pub async fn run<T, F, Fut>(&self, cx: &Cx, action: F) -> Outcome<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<T, Error>>,
    {
        if self.is_rolled_back() {
            return Outcome::Err(self.rolled_back_error());
        }

        let outcome = if self.use_transaction {
            let this = self;
            self.connection
                .run_in_transaction(cx, move || async move {
                    match action().await {
                        Outcome::Ok(_) if this.is_rolled_back() => {
                            Outcome::Err(this.rolled_back_error())
                        }
                        other => other,
                    }
                })
                .await
        } else {
            action().await
        };

        if matches!(outcome, Outcome::Ok(_)) {
            self.committed.store(true, Ordering::Release);
            tracing::trace!(transaction_id = self.id, "transaction committed");
        }
        outcome
    }

    /// Abort the transaction.
    ///
    /// A no-op when `use_transaction` is off. Fails with
    /// [`TransactionErrorKind::AlreadyCommitted`] once the unit of work has
    /// completed successfully. Otherwise the unit of work can no longer commit:
    /// the connection rolls back when the action returns, discarding every
    /// statement of the transaction, including those issued after this call.
    pub fn rollback(&self) -> Result<()> {
        if !self.use_transaction {
            tracing::trace!(transaction_id = self.id, "rollback ignored; transaction suppressed");
            return Ok(());
        }
        if self.is_committed() {
            return Err(Error::transaction(
                TransactionErrorKind::AlreadyCommitted,
                format!("transaction {} has already been committed", self.id),
            ));
        }
        if !self.rolled_back.swap(true, Ordering::AcqRel) {
            tracing::debug!(transaction_id = self.id, "transaction marked for rollback");
        }
        Ok(())
    }
}

impl<C: Connection> fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("use_transaction", &self.use_transaction)
            .field("committed", &self.is_committed())
            .field("rolled_back", &self.is_rolled_back())
            .finish_non_exhaustive()
    }
}
