//! Shared fixtures for the unit tests of this crate.

#![allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use sqlscope_core::{Connection, ConnectionFactory, Error, Result, Row, Value};
use sqlscope_pool::{Pool, PoolConfig};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// Drive `future` to completion on a fresh current-thread runtime.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

pub(crate) fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(_) => panic!("unexpected cancellation"),
        Outcome::Panicked(_) => panic!("unexpected panic"),
    }
}

/// Suspends exactly once, giving sibling futures a turn.
pub(crate) struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    pub(crate) fn new() -> Self {
        Self { yielded: false }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Every statement issued by any mock connection, as `"<serial>: <statement>"`.
#[derive(Clone, Default)]
pub(crate) struct StatementLog(Arc<Mutex<Vec<String>>>);

impl StatementLog {
    fn push(&self, serial: usize, stmt: &str) {
        self.0
            .lock()
            .expect("lock poisoned")
            .push(format!("{serial}: {stmt}"));
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.0.lock().expect("lock poisoned").clone()
    }

    /// Statements issued by one connection, without the serial prefix.
    pub(crate) fn for_connection(&self, serial: usize) -> Vec<String> {
        let prefix = format!("{serial}: ");
        self.statements()
            .into_iter()
            .filter_map(|s| s.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

pub(crate) struct MockConnection {
    pub(crate) serial: usize,
    log: StatementLog,
}

impl MockConnection {
    pub(crate) fn new(serial: usize, log: StatementLog) -> Self {
        Self { serial, log }
    }
}

impl Connection for MockConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.log.push(self.serial, sql);
        async { Outcome::Ok(vec![]) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        self.log.push(self.serial, sql);
        async { Outcome::Ok(None) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.log.push(self.serial, sql);
        async { Outcome::Ok(1) }
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.log.push(self.serial, "BEGIN");
        async { Outcome::Ok(()) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.log.push(self.serial, "COMMIT");
        async { Outcome::Ok(()) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.log.push(self.serial, "ROLLBACK");
        async { Outcome::Ok(()) }
    }

    fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn close(self, _cx: &Cx) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

pub(crate) struct MockFactory {
    opened: Arc<AtomicUsize>,
    log: StatementLog,
}

impl ConnectionFactory<MockConnection> for MockFactory {
    fn connect<'a>(
        &'a self,
        _cx: &'a Cx,
    ) -> Pin<Box<dyn Future<Output = Outcome<MockConnection, Error>> + Send + 'a>> {
        Box::pin(async move {
            let serial = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
            Outcome::Ok(MockConnection::new(serial, self.log.clone()))
        })
    }
}

/// A pool of at most `max_connections` mock connections, their shared log, and
/// a counter of connections opened so far.
pub(crate) fn mock_pool(
    max_connections: usize,
) -> (Pool<MockConnection>, StatementLog, Arc<AtomicUsize>) {
    let log = StatementLog::default();
    let opened = Arc::new(AtomicUsize::new(0));
    let pool = Pool::new(
        PoolConfig::new(max_connections).min_connections(0),
        MockFactory {
            opened: Arc::clone(&opened),
            log: log.clone(),
        },
    )
    .expect("valid pool config");
    (pool, log, opened)
}
