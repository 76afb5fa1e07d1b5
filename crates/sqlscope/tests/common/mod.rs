//! An in-memory key/value "database" with real transaction semantics.
//!
//! `PUT` with `[key, value]` parameters writes a key; `GET` with `[key]`
//! returns a row with a `value` column. Writes made between BEGIN and COMMIT
//! are staged on the connection and only become visible on COMMIT.

#![allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures
#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use sqlscope::prelude::*;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

pub fn block_on<F: Future>(future: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        _ => panic!("expected an error"),
    }
}

/// Suspends exactly once, giving sibling futures a turn.
pub struct YieldNow(bool);

impl YieldNow {
    pub fn new() -> Self {
        Self(false)
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            return Poll::Ready(());
        }
        self.0 = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[derive(Clone, Default)]
pub struct MemoryDb {
    data: Arc<Mutex<BTreeMap<String, i64>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MemoryDb {
    pub fn get(&self, key: &str) -> Option<i64> {
        self.data.lock().expect("lock poisoned").get(key).copied()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.lock().expect("lock poisoned").keys().cloned().collect()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn factory(&self) -> MemoryFactory {
        MemoryFactory { db: self.clone() }
    }

    pub fn pool(&self, max_connections: usize) -> Pool<MemoryConnection> {
        Pool::new(PoolConfig::new(max_connections), self.factory()).expect("valid pool config")
    }
}

pub struct MemoryConnection {
    pub serial: usize,
    db: MemoryDb,
    staged: Mutex<Option<Vec<(String, i64)>>>,
}

fn bad_statement(sql: &str) -> Error {
    Error::Custom(format!("unsupported statement: {sql}"))
}

impl MemoryConnection {
    fn read(&self, sql: &str, params: &[Value]) -> std::result::Result<Option<Row>, Error> {
        let key = match (sql, params) {
            ("GET", [Value::Text(key)]) => key,
            _ => return Err(bad_statement(sql)),
        };
        let staged = self.staged.lock().expect("lock poisoned");
        let value = staged
            .iter()
            .flatten()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .or_else(|| self.db.get(key));
        Ok(value.map(|v| Row::new(vec!["value".to_string()], vec![Value::BigInt(v)])))
    }

    fn write(&self, sql: &str, params: &[Value]) -> std::result::Result<u64, Error> {
        let (key, value) = match (sql, params) {
            ("PUT", [Value::Text(key), Value::BigInt(value)]) => (key.clone(), *value),
            _ => return Err(bad_statement(sql)),
        };
        let mut staged = self.staged.lock().expect("lock poisoned");
        match staged.as_mut() {
            Some(writes) => writes.push((key, value)),
            None => {
                self.db.data.lock().expect("lock poisoned").insert(key, value);
            }
        }
        Ok(1)
    }
}

fn to_outcome<T>(result: std::result::Result<T, Error>) -> Outcome<T, Error> {
    match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    }
}

impl Connection for MemoryConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.read(sql, params).map(|row| row.into_iter().collect());
        async move { to_outcome(result) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let result = self.read(sql, params);
        async move { to_outcome(result) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.write(sql, params);
        async move { to_outcome(result) }
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let mut staged = self.staged.lock().expect("lock poisoned");
        let result = if staged.is_some() {
            Err(Error::Custom("transaction already open".to_string()))
        } else {
            *staged = Some(Vec::new());
            Ok(())
        };
        async move { to_outcome(result) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let writes = self.staged.lock().expect("lock poisoned").take();
        let result = match writes {
            Some(writes) => {
                self.db.data.lock().expect("lock poisoned").extend(writes);
                Ok(())
            }
            None => Err(Error::Custom("no open transaction".to_string())),
        };
        async move { to_outcome(result) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.staged.lock().expect("lock poisoned").take();
        async { Outcome::Ok(()) }
    }

    fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn close(self, _cx: &Cx) -> impl Future<Output = Result<()>> + Send {
        self.db.closed.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    }
}

pub struct MemoryFactory {
    db: MemoryDb,
}

impl ConnectionFactory<MemoryConnection> for MemoryFactory {
    fn connect<'a>(
        &'a self,
        _cx: &'a Cx,
    ) -> Pin<Box<dyn Future<Output = Outcome<MemoryConnection, Error>> + Send + 'a>> {
        Box::pin(async move {
            let serial = self.db.opened.fetch_add(1, Ordering::SeqCst) + 1;
            Outcome::Ok(MemoryConnection {
                serial,
                db: self.db.clone(),
                staged: Mutex::new(None),
            })
        })
    }
}

/// Write `key` through the ambient transaction.
pub async fn put(cx: &Cx, key: &str, value: i64) -> Outcome<u64, Error> {
    let tx = match Transaction::<MemoryConnection>::current() {
        Ok(tx) => tx,
        Err(e) => return Outcome::Err(e),
    };
    tx.connection()
        .execute(cx, "PUT", &[Value::Text(key.to_string()), Value::BigInt(value)])
        .await
}

/// Read `key` through the ambient transaction.
pub async fn get(cx: &Cx, key: &str) -> Outcome<Option<i64>, Error> {
    let tx = match Transaction::<MemoryConnection>::current() {
        Ok(tx) => tx,
        Err(e) => return Outcome::Err(e),
    };
    match tx
        .connection()
        .query_one(cx, "GET", &[Value::Text(key.to_string())])
        .await
    {
        Outcome::Ok(row) => Outcome::Ok(row.and_then(|r| r.get_by_name("value").and_then(Value::as_i64))),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}
