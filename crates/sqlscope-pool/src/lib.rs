//! Connection pooling for sqlscope.
//!
//! The pool hands out [`PooledConnection`]s, creating connections through a
//! [`ConnectionFactory`](sqlscope_core::ConnectionFactory) up to
//! `max_connections` and suspending callers (never blocking a thread) once
//! that capacity is checked out. A connection returns to the idle set when its
//! `PooledConnection` is released or dropped.
//!
//! Pools are built explicitly, either from a [`PoolConfig`] or from a settings
//! file via [`Pool::from_settings`], and shut down explicitly with
//! [`Pool::close`].

pub mod config;
pub mod pool;
pub mod settings;

pub use config::PoolConfig;
pub use pool::{ConnectionId, Pool, PoolStats, PooledConnection};
pub use settings::Settings;
