//! Ambient transactions and units of work for sqlscope.
//!
//! A unit of work is started with [`with_transaction`]. While its action runs,
//! the unit of work's [`Transaction`] is published in the ambient [`context`],
//! so any code inside the action, however deep, finds it with
//! [`Transaction::current`] instead of having it passed down.
//!
//! ```rust,ignore
//! async fn reserve(cx: &Cx, sku: i64) -> Outcome<u64, Error> {
//!     let tx = match Transaction::<PgConnection>::current() {
//!         Ok(tx) => tx,
//!         Err(e) => return Outcome::Err(e),
//!     };
//!     tx.connection()
//!         .execute(cx, "UPDATE stock SET reserved = reserved + 1 WHERE sku = $1", &[Value::BigInt(sku)])
//!         .await
//! }
//!
//! let reserved = with_transaction(&cx, &pool, TransactionOptions::default(), || reserve(&cx, 42)).await;
//! ```
//!
//! Starting a second unit of work on a call path that already has one is
//! governed by [`Nesting`].

pub mod context;
pub mod transaction;
pub mod unit_of_work;

#[cfg(test)]
mod test_support;

pub use context::ContextKey;
pub use transaction::{CURRENT_TRANSACTION, Transaction, in_unit_of_work};
pub use unit_of_work::{Nesting, TransactionOptions, with_transaction};
