//! Database connection traits.
//!
//! This module defines the capabilities the transaction layer consumes from a
//! database driver:
//!
//! - [`Connection`] - query execution plus the raw BEGIN/COMMIT/ROLLBACK primitives
//! - [`ConnectionFactory`] - opens new connections for the pool
//! - [`ConnectionConfig`] - where and how to connect
//!
//! All operations integrate with asupersync's structured concurrency via `Cx` context
//! for proper cancellation and timeout handling.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A database connection capable of executing queries.
///
/// All operations are async and take a `Cx` context for cancellation/timeout support.
/// Implementations must be `Send + Sync` because a connection is shared between
/// stacked transactions of one nested unit of work.
///
/// # Transaction Support
///
/// Drivers expose the raw [`begin`](Connection::begin), [`commit`](Connection::commit)
/// and [`rollback`](Connection::rollback) primitives. The coupled
/// [`run_in_transaction`](Connection::run_in_transaction) operation is provided on top
/// of them and may be overridden by drivers with a native equivalent.
///
/// # Example
///
/// ```rust,ignore
/// let n = conn
///     .run_in_transaction(&cx, || async {
///         conn.execute(&cx, "UPDATE accounts SET balance = balance - 10 WHERE id = $1", &[Value::BigInt(1)])
///             .await
///     })
///     .await;
/// ```
pub trait Connection: Send + Sync + 'static {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Issue BEGIN.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Issue COMMIT.
    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Issue ROLLBACK.
    ///
    /// Callable outside [`run_in_transaction`](Connection::run_in_transaction) to
    /// abort the transaction that is currently open on this connection.
    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Check if the connection is still valid by sending a ping.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Check if the connection is still valid (alias for ping that returns bool).
    fn is_valid(&self, cx: &Cx) -> impl Future<Output = bool> + Send {
        async {
            match self.ping(cx).await {
                Outcome::Ok(()) => true,
                Outcome::Err(_) | Outcome::Cancelled(_) | Outcome::Panicked(_) => false,
            }
        }
    }

    /// Close the connection gracefully.
    fn close(self, cx: &Cx) -> impl Future<Output = Result<()>> + Send;

    /// Run `action` inside BEGIN ... COMMIT.
    ///
    /// COMMIT is issued when the action returns `Outcome::Ok`; any other outcome
    /// issues ROLLBACK and is returned unchanged, whatever the error. A failing
    /// ROLLBACK is logged and does not replace the action's error.
    fn run_in_transaction<T, F, Fut>(
        &self,
        cx: &Cx,
        action: F,
    ) -> impl Future<Output = Outcome<T, Error>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<T, Error>>,
    {
        async move {
            match self.begin(cx).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }

            let outcome = action().await;
            match outcome {
                Outcome::Ok(value) => match self.commit(cx).await {
                    Outcome::Ok(()) => Outcome::Ok(value),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                },
                other => {
                    if let Outcome::Err(rollback_err) = self.rollback(cx).await {
                        tracing::warn!(error = %rollback_err, "ROLLBACK failed after aborted transaction");
                    }
                    other
                }
            }
        }
    }
}

/// Opens new connections on behalf of a pool.
///
/// The returned future is boxed so pools can hold the factory as a trait object.
pub trait ConnectionFactory<C>: Send + Sync + 'static {
    /// Establish a new connection.
    fn connect<'a>(
        &'a self,
        cx: &'a Cx,
    ) -> Pin<Box<dyn Future<Output = Outcome<C, Error>> + Send + 'a>>;
}

/// Configuration for database connections.
///
/// Usually loaded from the `connection` section of a settings file.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// User name
    pub user: String,
    /// Password
    pub password: Option<String>,
    /// Database name
    pub database: String,
    /// Application name for connection identification
    pub application_name: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: None,
            database: String::new(),
            application_name: None,
            connect_timeout_ms: 30_000,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config for the given host and database.
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the credentials.
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = Some(password.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// `host:port/database`, safe to log.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("application_name", &self.application_name)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}
