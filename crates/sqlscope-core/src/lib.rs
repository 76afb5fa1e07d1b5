//! Core types and traits for sqlscope.
//!
//! This crate provides the foundational abstractions shared by the pool and
//! the transaction layer:
//!
//! - `Connection` trait: the capabilities consumed from a database driver
//! - `ConnectionFactory` trait: how a pool opens new connections
//! - `Error` taxonomy for pool, transaction and query failures
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod row;
pub mod value;

pub use connection::{Connection, ConnectionConfig, ConnectionFactory};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, PoolError, PoolErrorKind,
    QueryError, QueryErrorKind, Result, TransactionError, TransactionErrorKind,
};
pub use row::Row;
pub use value::Value;
