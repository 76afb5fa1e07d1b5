//! sqlscope - ambient transaction scopes and connection pooling for async Rust.
//!
//! sqlscope sits between application code and a database driver. It provides:
//!
//! - A bounded connection [`Pool`] that suspends callers while it is at capacity
//! - Units of work started with [`with_transaction`], each bound to one connection
//! - An ambient current [`Transaction`], visible to everything the unit of work
//!   calls without being passed as a parameter
//! - A [`Nesting`] policy deciding what happens when units of work stack up
//!
//! Drivers plug in by implementing [`Connection`] and [`ConnectionFactory`].
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlscope::prelude::*;
//!
//! async fn transfer(cx: &Cx, from: i64, to: i64, amount: i64) -> Outcome<u64, Error> {
//!     let tx = match Transaction::<PgConnection>::current() {
//!         Ok(tx) => tx,
//!         Err(e) => return Outcome::Err(e),
//!     };
//!     let conn = tx.connection();
//!     match conn
//!         .execute(cx, "UPDATE accounts SET balance = balance - $1 WHERE id = $2", &[amount.into(), from.into()])
//!         .await
//!     {
//!         Outcome::Ok(_) => {}
//!         Outcome::Err(e) => return Outcome::Err(e),
//!         Outcome::Cancelled(r) => return Outcome::Cancelled(r),
//!         Outcome::Panicked(p) => return Outcome::Panicked(p),
//!     }
//!     conn.execute(cx, "UPDATE accounts SET balance = balance + $1 WHERE id = $2", &[amount.into(), to.into()])
//!         .await
//! }
//!
//! let pool = Pool::from_settings("sqlscope.json", PgFactory::new(settings.connection))?;
//! with_transaction(&cx, &pool, TransactionOptions::default(), || transfer(&cx, 1, 2, 100)).await;
//! pool.close(&cx).await?;
//! ```

pub use sqlscope_core::{
    Connection, ConnectionConfig, ConnectionFactory, Cx, Error, Outcome, PoolErrorKind, Result,
    Row, TransactionErrorKind, Value,
};

pub use sqlscope_pool::{ConnectionId, Pool, PoolConfig, PoolStats, PooledConnection, Settings};

pub use sqlscope_session::context::{self, ContextKey};
pub use sqlscope_session::{
    CURRENT_TRANSACTION, Nesting, Transaction, TransactionOptions, in_unit_of_work,
    with_transaction,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Connection, ConnectionFactory, Cx, Error, Nesting, Outcome, Pool, PoolConfig, Result,
        Row, Transaction, TransactionOptions, Value, with_transaction,
    };
}
