//! Driving an instance: the blocking wait, the blocking lookup built on it,
//! and their async counterparts for callers that live on a tokio runtime.

use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, mpsc};

use tokio::runtime::Runtime;
use tracing::debug;

use crate::dict::{LdapDict, LookupResult};
use crate::error::{DictError, Result};

/// Exclusive claim on an instance's wait; released when dropped, also while
/// unwinding.
struct WaitClaim<'a>(&'a AtomicBool);

impl<'a> WaitClaim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Self {
        let claimed = flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        assert!(claimed, "dict wait re-entered while the instance is already waiting");
        WaitClaim(flag)
    }
}

impl Drop for WaitClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LdapDict {
    /// Drive the instance until every dispatched lookup has completed and its
    /// callback has run. Returns immediately when nothing is pending.
    ///
    /// # Panics
    ///
    /// When called while the same instance is already waiting, e.g. from a
    /// lookup callback, and when called from inside an async context (use
    /// [`drain`](Self::drain) there). A panic raised by a lookup callback
    /// while this wait drives the instance is resumed here.
    pub fn wait(&self) {
        let _claim = WaitClaim::acquire(&self.waiting);
        let Some(runtime) = self.take_runtime() else {
            return;
        };
        debug!(uri = %self.uri, pending = self.pending(), "waiting for lookups");
        runtime.block_on(self.in_flight.idle());
        self.restore_runtime(runtime);
        if let Some(payload) = self.in_flight.take_panic() {
            panic::resume_unwind(payload);
        }
    }

    /// Blocking lookup: dispatch, wait, return the result.
    pub fn lookup(&self, key: &str) -> LookupResult {
        let (sender, receiver) = mpsc::channel();
        self.lookup_async(
            key,
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        );
        self.wait();
        receiver.recv().unwrap_or(LookupResult::Failed(DictError::Closed))
    }

    /// [`wait`](Self::wait) for async callers; the wait runs on the blocking
    /// pool of the caller's runtime. A panicking wait resumes here.
    pub async fn drain(self: &Arc<Self>) -> Result<()> {
        let dict = Arc::clone(self);
        match tokio::task::spawn_blocking(move || dict.wait()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(DictError::Invariant(format!("drain task did not finish: {e}"))),
        }
    }

    /// Async lookup: submit, drain, return the result. Concurrent callers on
    /// one instance must share a single driver instead, see
    /// [`crate::server`].
    pub async fn fetch(self: &Arc<Self>, key: &str) -> Result<LookupResult> {
        let handle = self.submit(key);
        self.drain().await?;
        Ok(handle.await)
    }

    fn take_runtime(&self) -> Option<Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn restore_runtime(&self, runtime: Runtime) {
        let mut slot = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        // closed while we were driving it
        if self.is_closed() {
            drop(slot);
            runtime.shutdown_background();
        } else {
            *slot = Some(runtime);
        }
    }
}
