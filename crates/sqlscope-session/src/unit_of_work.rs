//! The unit-of-work entry point.
//!
//! [`with_transaction`] decides, per [`Nesting`] policy, which connection a unit
//! of work runs on, publishes a fresh [`Transaction`] as the ambient current
//! transaction while the action runs, and hands an owned pooled connection back
//! to the pool however the unit of work ends.

use crate::context;
use crate::transaction::{CURRENT_TRANSACTION, Transaction, in_unit_of_work};
use asupersync::{Cx, Outcome};
use sqlscope_core::{Connection, Error, PoolErrorKind, TransactionErrorKind};
use sqlscope_pool::{Pool, PooledConnection};
use std::future::Future;
use std::sync::Arc;

/// What to do when a unit of work starts while another one is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Nesting {
    /// Fail with [`TransactionErrorKind::NestingViolation`].
    #[default]
    NotAllowed,
    /// Join the active unit of work: share its connection and leave
    /// BEGIN/COMMIT/ROLLBACK to it.
    Nested,
    /// Run independently on a connection of its own.
    ///
    /// Both transactions hold a connection at once; a pool with a single
    /// connection can never serve the detached one.
    Detached,
}

/// Options for [`with_transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Nesting policy
    pub nesting: Nesting,
    /// Issue BEGIN/COMMIT/ROLLBACK (default: true)
    pub use_transaction: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            nesting: Nesting::NotAllowed,
            use_transaction: true,
        }
    }
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join an active unit of work instead of failing.
    pub fn nested() -> Self {
        Self::default().nesting(Nesting::Nested)
    }

    /// Always run on a connection of its own.
    pub fn detached() -> Self {
        Self::default().nesting(Nesting::Detached)
    }

    pub fn nesting(mut self, nesting: Nesting) -> Self {
        self.nesting = nesting;
        self
    }

    /// Turn real transaction statements on or off.
    ///
    /// With `false` every statement takes effect immediately and nothing can be
    /// rolled back; meant for debugging.
    pub fn use_transaction(mut self, enabled: bool) -> Self {
        self.use_transaction = enabled;
        self
    }
}

/// The connection a unit of work runs on.
struct Resolved<C: Connection> {
    /// Present when this unit of work obtained the connection itself.
    lease: Option<PooledConnection<C>>,
    connection: Arc<C>,
    use_transaction: bool,
}

async fn obtain<C: Connection>(
    cx: &Cx,
    pool: &Pool<C>,
    use_transaction: bool,
) -> Outcome<Resolved<C>, Error> {
    match pool.obtain(cx).await {
        Outcome::Ok(lease) => Outcome::Ok(Resolved {
            connection: Arc::clone(lease.connection()),
            lease: Some(lease),
            use_transaction,
        }),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

async fn resolve<C: Connection>(
    cx: &Cx,
    pool: &Pool<C>,
    options: TransactionOptions,
) -> Outcome<Resolved<C>, Error> {
    match options.nesting {
        Nesting::Detached => obtain(cx, pool, options.use_transaction).await,
        Nesting::NotAllowed => {
            if in_unit_of_work() {
                return Outcome::Err(Error::transaction(
                    TransactionErrorKind::NestingViolation,
                    "a unit of work is already active on this call path",
                ));
            }
            obtain(cx, pool, options.use_transaction).await
        }
        Nesting::Nested => {
            let Some(outer) = context::lookup::<Transaction<C>>(CURRENT_TRANSACTION) else {
                if in_unit_of_work() {
                    return Outcome::Err(Error::transaction(
                        TransactionErrorKind::NestingViolation,
                        "the active unit of work runs on a different connection type",
                    ));
                }
                return obtain(cx, pool, options.use_transaction).await;
            };
            if pool.is_closed() {
                return Outcome::Err(Error::pool(
                    PoolErrorKind::Closed,
                    "connection pool closed while the outer unit of work was running",
                ));
            }
            tracing::trace!(outer_transaction_id = outer.id(), "joining active unit of work");
            Outcome::Ok(Resolved {
                lease: None,
                connection: Arc::clone(outer.connection()),
                use_transaction: false,
            })
        }
    }
}

/// Run `action` as a unit of work.
///
/// The action finds its transaction with [`Transaction::current`] rather than
/// receiving it as a parameter, so code arbitrarily deep inside it can do the
/// same. Its value and its errors are returned unchanged.
///
/// A connection this call obtained from `pool` goes back to the pool on every
/// exit path, including when the returned future is dropped before it
/// completes. A connection shared with an outer unit of work is left to it.
///
/// # Errors
///
/// - [`TransactionErrorKind::NestingViolation`] when another unit of work is
///   active and `options.nesting` is [`Nesting::NotAllowed`]; no connection is
///   obtained in that case
/// - [`PoolErrorKind::Closed`] when the pool is closed
/// - [`TransactionErrorKind::RolledBack`] when the action called
///   [`Transaction::rollback`]
/// - whatever the action, BEGIN or COMMIT fails with
///
/// # Example
///
/// ```rust,ignore
/// let updated = with_transaction(&cx, &pool, TransactionOptions::default(), || async {
///     match Transaction::<PgConnection>::current() {
///         Ok(tx) => tx.connection().execute(&cx, "UPDATE stock SET qty = qty - 1 WHERE sku = $1", &[sku]).await,
///         Err(e) => Outcome::Err(e),
///     }
/// })
/// .await;
/// ```
#[tracing::instrument(level = "debug", skip_all, fields(nesting = ?options.nesting))]
pub async fn with_transaction<C, T, F, Fut>(
    cx: &Cx,
    pool: &Pool<C>,
    options: TransactionOptions,
    action: F,
) -> Outcome<T, Error>
where
    C: Connection,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Outcome<T, Error>>,
{
    let Resolved {
        lease,
        connection,
        use_transaction,
    } = match resolve(cx, pool, options).await {
        Outcome::Ok(resolved) => resolved,
        Outcome::Err(e) => {
            tracing::debug!(error = %e, "unit of work not started");
            return Outcome::Err(e);
        }
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    // Must be gone before the lease is released: a connection still referenced
    // at check-in is discarded instead of reused.
    let tx = Arc::new(Transaction::new(connection, use_transaction));
    tracing::debug!(
        transaction_id = tx.id(),
        connection_id = lease.as_ref().map(PooledConnection::id),
        use_transaction,
        "unit of work started"
    );

    let outcome = context::run_scoped(CURRENT_TRANSACTION, Arc::clone(&tx), tx.run(cx, action)).await;

    match &outcome {
        Outcome::Ok(_) => tracing::debug!(transaction_id = tx.id(), "unit of work completed"),
        Outcome::Err(e) => {
            tracing::debug!(transaction_id = tx.id(), error = %e, "unit of work failed");
        }
        Outcome::Cancelled(_) => tracing::debug!(transaction_id = tx.id(), "unit of work cancelled"),
        Outcome::Panicked(_) => tracing::warn!(transaction_id = tx.id(), "unit of work panicked"),
    }

    drop(tx);
    if let Some(lease) = lease {
        pool.release(lease);
    }
    outcome
}
