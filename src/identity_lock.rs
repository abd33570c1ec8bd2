use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;
type Acquire = Pin<Box<dyn Future<Output = OwnedMutexGuard<()>> + Send>>;

/// Serializes work on a single browser identity.
///
/// A key exchange and a payload request for the same identity never
/// interleave; requests for different identities never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct IdentityLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, browser_id: &str) -> PendingLock {
        let entry = {
            let mut locks = self.inner.lock();
            locks
                .entry(browser_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        PendingLock {
            acquire: Some(Box::pin(entry.lock_owned())),
            browser_id: browser_id.to_string(),
            locks: self.inner.clone(),
        }
    }

    /// Number of identities currently locked or waited on.
    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }
}

// Drop the map entry once only the map itself refers to the mutex
fn prune(locks: &Mutex<LockMap>, browser_id: &str) {
    let mut locks = locks.lock();
    let idle = locks
        .get(browser_id)
        .is_some_and(|entry| Arc::strong_count(entry) == 1);
    if idle {
        locks.remove(browser_id);
    }
}

/// A lock request still waiting on another holder.
///
/// Dropping it before it resolves (a cancelled request) releases its claim
/// on the map entry the same way a released guard does.
pub struct PendingLock {
    acquire: Option<Acquire>,
    browser_id: String,
    locks: Arc<Mutex<LockMap>>,
}

impl Future for PendingLock {
    type Output = IdentityGuard;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(acquire) = this.acquire.as_mut() else {
            panic!("PendingLock polled after completion");
        };

        match acquire.as_mut().poll(cx) {
            Poll::Ready(guard) => {
                this.acquire = None;
                Poll::Ready(IdentityGuard {
                    guard: Some(guard),
                    browser_id: std::mem::take(&mut this.browser_id),
                    locks: this.locks.clone(),
                })
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingLock {
    fn drop(&mut self) {
        if let Some(acquire) = self.acquire.take() {
            drop(acquire);
            prune(&self.locks, &self.browser_id);
        }
    }
}

/// Held for the duration of one request's work on an identity.
#[derive(Debug)]
pub struct IdentityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    browser_id: String,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        self.guard.take();
        prune(&self.locks, &self.browser_id);
    }
}
