//! Ambient, call-tree scoped context values.
//!
//! [`run_scoped`] binds a value to a [`ContextKey`] for the dynamic extent of a
//! future. Code running anywhere inside that future, across any number of
//! `.await` points, can find the value with [`lookup`] without it being passed
//! down as a parameter. Bindings nest: the innermost one for a key wins, and
//! the enclosing binding is visible again once the inner future completes.
//!
//! Bindings live in a task-local frame chain that is installed while the
//! scoped future is being polled, so unrelated futures driven by the same
//! executor thread, including siblings in a `join`, never observe each other's
//! bindings. A future spawned as a separate task starts with no bindings.
//!
//! # Example
//!
//! ```rust,ignore
//! const TENANT: ContextKey = ContextKey::new("tenant");
//!
//! context::run_scoped(TENANT, Arc::new(Tenant(7)), async {
//!     load_orders().await; // calls context::lookup::<Tenant>(TENANT) deep inside
//! })
//! .await;
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

/// A well-known slot in the ambient context.
///
/// Keys compare by name, so every key in a process needs a distinct name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey {
    name: &'static str,
}

impl ContextKey {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

struct Frame {
    key: ContextKey,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Frame>>,
}

tokio::task_local! {
    static INNERMOST: Arc<Frame>;
}

fn innermost() -> Option<Arc<Frame>> {
    INNERMOST.try_with(Arc::clone).ok()
}

fn find(key: ContextKey) -> Option<Arc<dyn Any + Send + Sync>> {
    let mut frame = innermost();
    while let Some(current) = frame {
        if current.key == key {
            return Some(Arc::clone(&current.value));
        }
        frame = current.parent.clone();
    }
    None
}

/// Run `body` with `key` bound to `value` for its whole dynamic extent.
pub async fn run_scoped<T, F>(key: ContextKey, value: Arc<T>, body: F) -> F::Output
where
    T: Any + Send + Sync,
    F: Future,
{
    let frame = Arc::new(Frame {
        key,
        value,
        parent: innermost(),
    });
    INNERMOST.scope(frame, body).await
}

/// Is any binding for `key` active on the current call path?
pub fn has_key(key: ContextKey) -> bool {
    find(key).is_some()
}

/// The innermost value bound to `key`.
///
/// Returns `None` outside any scope for `key`, or when the innermost binding
/// holds a value of another type.
pub fn lookup<T: Any + Send + Sync>(key: ContextKey) -> Option<Arc<T>> {
    find(key).and_then(|value| value.downcast::<T>().ok())
}

/// How many bindings for `key` are stacked on the current call path.
pub fn depth(key: ContextKey) -> usize {
    let mut count = 0;
    let mut frame = innermost();
    while let Some(current) = frame {
        if current.key == key {
            count += 1;
        }
        frame = current.parent.clone();
    }
    count
}
