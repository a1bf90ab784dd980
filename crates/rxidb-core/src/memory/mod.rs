//! In-memory provider
//!
//! `MemoryProvider` implements the provider protocol without a browser. It
//! keeps every database in process memory and reproduces the host event
//! loop, so auto-commit, transaction ordering, version-change notifications
//! and aborts behave the way they do against IndexedDB.
//!
//! Work only advances inside [`MemoryProvider::block_on`]. Each iteration
//! polls the future until it stops waking itself (the microtask
//! checkpoint), ends the turn, then dispatches one host event.

mod data;
mod engine;
mod handles;

use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::task::{waker, ArcWake};
use tracing::trace;

use crate::error::{DbError, Result};
use crate::provider::{Provider, RawDeleteRequest, RawOpenRequest};
use engine::Engine;

/// Provider keeping databases in memory.
///
/// Clones share the same databases.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    engine: Rc<Engine>,
}

struct WakeFlag(AtomicBool);

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::SeqCst);
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// This provider as the trait object [`crate::OpenConfig`] takes.
    pub fn provider(&self) -> Rc<dyn Provider> {
        Rc::new(self.clone())
    }

    /// Drive `future` to completion, running host work in between polls.
    ///
    /// Host work queued when the future completes is run before returning.
    ///
    /// # Panics
    ///
    /// Panics if the future is pending while no host work is left, such as
    /// an open that stays blocked forever.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = std::pin::pin!(future);
        let flag = Arc::new(WakeFlag(AtomicBool::new(true)));
        let waker = waker(flag.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            if flag.0.swap(false, Ordering::SeqCst) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    self.run_until_idle();
                    return output;
                }
                continue;
            }
            self.engine.end_turn();
            if !self.engine.step() && !flag.0.load(Ordering::SeqCst) {
                panic!("memory provider stalled: the future is pending and no host work is queued");
            }
        }
    }

    /// Run host work until nothing is left to do.
    pub fn run_until_idle(&self) {
        loop {
            self.engine.end_turn();
            if !self.engine.step() {
                break;
            }
        }
    }

    /// Resolves after the current turn has ended and one more host event
    /// has been dispatched.
    pub fn next_turn(&self) -> impl Future<Output = ()> {
        let (tx, rx) = oneshot::channel::<()>();
        self.engine.schedule(Box::new(move || {
            let _ = tx.send(());
        }));
        async move {
            let _ = rx.await;
        }
    }

    /// Names of the databases that exist, in ascending order.
    pub fn database_names(&self) -> Vec<String> {
        self.engine.database_names()
    }

    /// Close every connection to `name` the way a host does on its own,
    /// aborting their transactions and firing their `close` event.
    pub fn force_close(&self, name: &str) {
        trace!(db = name, "forcing connections closed");
        self.engine.force_close(name);
    }
}

impl Provider for MemoryProvider {
    fn open(&self, name: &str, version: u32) -> Result<Rc<dyn RawOpenRequest>> {
        if version == 0 {
            return Err(DbError::InvalidAccess("version must be positive".into()));
        }
        trace!(db = name, version, "open queued");
        Ok(self.engine.queue_open(name, version))
    }

    fn delete_database(&self, name: &str) -> Result<Rc<dyn RawDeleteRequest>> {
        trace!(db = name, "delete queued");
        Ok(self.engine.queue_delete(name))
    }
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("databases", &self.engine.database_names())
            .finish()
    }
}
