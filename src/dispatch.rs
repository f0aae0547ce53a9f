//! Lookup dispatch: one operation per lookup, resolved exactly once.
//!
//! A lookup that matches no map is answered inline, before the call
//! returns, with [`DictError::NoSuchKey`]; no search is issued. Otherwise the
//! operation is counted as pending, its search is spawned onto the
//! instance's runtime, and on completion the pending count is released
//! *before* the caller's callback runs, so a waiter can stop as soon as the
//! last directory round-trip is in.
//!
//! An operation that is dropped before it completes (its runtime was shut
//! down) still releases its pending slot and answers [`DictError::Closed`].
//!
//! A callback that panics does not take the runtime's task down quietly: the
//! panic is parked on the instance and re-raised by the wait that was
//! driving it.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};

use crate::dict::{DictMap, LdapDict, LookupResult};
use crate::directory::{DirectoryEntry, SearchFuture, SearchInput};
use crate::error::{DictError, Result};
use crate::pattern;
use crate::query;

pub type LookupCallback = Box<dyn FnOnce(LookupResult) + Send + 'static>;

/// Pending-operation counter of one instance, plus the signal its waiter
/// sleeps on.
#[derive(Debug, Default)]
pub struct InFlight {
    pending: AtomicUsize,
    idle: Notify,
    panicked: Mutex<Option<Box<dyn Any + Send>>>,
}

impl InFlight {
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn begin(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn end(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_one();
        }
    }

    /// Resolves once nothing is pending, or as soon as a callback panicked.
    pub async fn idle(&self) {
        while self.pending() > 0 && !self.has_panicked() {
            self.idle.notified().await;
        }
    }

    fn raise(&self, payload: Box<dyn Any + Send>) {
        let mut slot = self.panicked.lock().unwrap_or_else(PoisonError::into_inner);
        // the first panic is the one reported
        if slot.is_none() {
            *slot = Some(payload);
        }
        drop(slot);
        self.idle.notify_one();
    }

    fn has_panicked(&self) -> bool {
        self.panicked.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Take the payload of a callback panic, if one happened since the last call.
    pub fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panicked.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Per-lookup state. Everything it allocates is owned here and released when
/// it is dropped, right after the callback returns.
struct Operation {
    txid: u64,
    callback: Option<LookupCallback>,
    map: Option<Arc<DictMap>>,
    in_flight: Option<Arc<InFlight>>,
}

impl Operation {
    fn new(txid: u64, callback: LookupCallback) -> Self {
        Self { txid, callback: Some(callback), map: None, in_flight: None }
    }

    fn dispatched(mut self, map: Arc<DictMap>, in_flight: &Arc<InFlight>) -> Self {
        in_flight.begin();
        self.map = Some(map);
        self.in_flight = Some(Arc::clone(in_flight));
        self
    }

    async fn complete(mut self, search: SearchFuture) {
        let outcome = search.await;
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        in_flight.end();
        let result = match self.map.as_deref() {
            Some(map) => resolve(self.txid, map, outcome),
            None => LookupResult::Failed(DictError::Invariant("dispatched lookup without a map".into())),
        };
        if let Some(callback) = self.callback.take() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(result))) {
                warn!(txid = self.txid, "lookup callback panicked");
                in_flight.raise(payload);
            }
        }
    }

    fn finish(&mut self, result: LookupResult) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.end();
        }
        if self.callback.is_some() {
            debug!(txid = self.txid, "lookup abandoned before completion");
            self.finish(LookupResult::Failed(DictError::Closed));
        }
    }
}

/// Turn a finished search into the lookup result for `map`.
fn resolve(txid: u64, map: &DictMap, outcome: Result<Vec<DirectoryEntry>>) -> LookupResult {
    let entries = match outcome {
        Ok(entries) => entries,
        Err(e) => {
            warn!(txid, error = %e, "directory search failed");
            return LookupResult::Failed(e);
        }
    };
    let Some(entry) = entries.first() else {
        debug!(txid, "search matched no entry");
        return LookupResult::NotFound;
    };
    debug!(txid, dn = %entry.dn, "lookup got entry");
    match entry.attribute(&map.value_attribute).and_then(|values| values.first()) {
        Some(value) => {
            debug!(txid, attribute = %map.value_attribute, "lookup got attribute");
            LookupResult::Found(value.clone())
        }
        None => {
            debug!(txid, attribute = %map.value_attribute, "entry lacks value attribute");
            LookupResult::Null
        }
    }
}

/// Receives the result of one [`LdapDict::submit`].
///
/// The handle resolves only once the instance has been driven past the
/// lookup's completion, e.g. by [`LdapDict::wait`].
#[derive(Debug)]
pub struct LookupHandle {
    txid: u64,
    receiver: oneshot::Receiver<LookupResult>,
}

impl LookupHandle {
    pub fn txid(&self) -> u64 {
        self.txid
    }

    /// The result, if it has been delivered already.
    pub fn try_result(&mut self) -> Option<LookupResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(LookupResult::Failed(DictError::Closed)),
        }
    }
}

impl Future for LookupHandle {
    type Output = LookupResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<LookupResult> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(LookupResult::Failed(DictError::Closed)))
    }
}

impl LdapDict {
    /// Start a lookup of `key`; `callback` runs exactly once with the result.
    ///
    /// When no map matches, the callback runs before this returns.
    pub fn lookup_async(&self, key: &str, callback: LookupCallback) {
        self.dispatch(key, callback);
    }

    /// Handle-returning form of [`lookup_async`](Self::lookup_async).
    pub fn submit(&self, key: &str) -> LookupHandle {
        let (sender, receiver) = oneshot::channel();
        let txid = self.dispatch(
            key,
            Box::new(move |result| {
                // the handle may have been dropped; nobody is left to tell
                let _ = sender.send(result);
            }),
        );
        LookupHandle { txid, receiver }
    }

    fn allocate_txid(&self) -> u64 {
        self.last_txid.fetch_add(1, Ordering::Relaxed)
    }

    fn dispatch(&self, key: &str, callback: LookupCallback) -> u64 {
        let txid = self.allocate_txid();
        let mut op = Operation::new(txid, callback);

        let Some((map, captures)) = pattern::find_match(&self.maps, key, |m| &m.pattern) else {
            warn!(txid, key, "no map matches key");
            op.finish(LookupResult::Failed(DictError::NoSuchKey(key.to_string())));
            return txid;
        };
        if self.is_closed() {
            op.finish(LookupResult::Failed(DictError::Closed));
            return txid;
        }

        let input = SearchInput {
            base: map.base_dn.clone(),
            scope: map.scope,
            filter: query::build(map, &captures, &self.username, query::is_private(key)),
            attributes: vec![map.value_attribute.clone()],
            timeout: self.settings.timeout(),
        };
        debug!(txid, key, pattern = %map.pattern, base = %input.base, scope = %input.scope, filter = %input.filter, "dispatching lookup");

        let op = op.dispatched(Arc::clone(map), &self.in_flight);
        let search = self.client.search(input);
        self.handle.spawn(op.complete(search));
        txid
    }
}
