//! Low-level web-sys plumbing
//!
//! IndexedDB reports results through `on*` handler properties. A handler is
//! a `Closure` that must stay alive until the host is done calling it, even
//! after every Rust handle to the request is gone. [`Listeners`] holds the
//! closures of one request (or transaction) and is itself captured by them,
//! so the set keeps itself alive until [`Listeners::release`] runs, at the
//! latest when the owning transaction finishes.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Function;
use rxidb_core::{DbError, Result};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, EventTarget, IdbFactory, IdbTransaction};

type Handler = Closure<dyn FnMut(Event)>;

/// Get the global IndexedDB factory.
pub(crate) fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| DbError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(DbError::NotAvailable("indexedDB is null/undefined".into()));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| DbError::NotAvailable("indexedDB is not IdbFactory".into()))
}

/// Event handlers kept alive until their target settles.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    handlers: Rc<RefCell<Vec<Handler>>>,
    /// `addEventListener` registrations undone on release.
    attached: Rc<RefCell<Vec<(EventTarget, &'static str, Function)>>>,
}

impl Listeners {
    /// Wrap `f` as a JS function owned by this set.
    pub(crate) fn handler(&self, f: impl FnMut(Event) + 'static) -> Function {
        let closure = Closure::wrap(Box::new(f) as Box<dyn FnMut(Event)>);
        let function: Function = closure.as_ref().unchecked_ref::<Function>().clone();
        self.handlers.borrow_mut().push(closure);
        function
    }

    /// Release the set when `tx` completes or aborts.
    ///
    /// A request abandoned before its last event (a cursor the consumer
    /// stopped reading) gets no further events once its transaction ends.
    pub(crate) fn release_with(&self, tx: &IdbTransaction) {
        let done = self.clone();
        let finished = self.handler(move |_event| done.release());
        for kind in ["complete", "abort"] {
            if tx.add_event_listener_with_callback(kind, &finished).is_ok() {
                self.attached
                    .borrow_mut()
                    .push((tx.clone().into(), kind, finished.clone()));
            }
        }
    }

    /// Drop every handler once the current event has finished dispatching.
    ///
    /// The closures are freed from a microtask, never while one is running.
    pub(crate) fn release(&self) {
        for (target, kind, function) in self.attached.borrow_mut().drain(..) {
            let _ = target.remove_event_listener_with_callback(kind, &function);
        }
        let handlers = std::mem::take(&mut *self.handlers.borrow_mut());
        if handlers.is_empty() {
            return;
        }
        wasm_bindgen_futures::spawn_local(async move {
            drop(handlers);
        });
    }
}

/// Set the string `key` on a parameters object.
pub(crate) fn set_prop(target: &JsValue, key: &str, value: &JsValue) -> Result<()> {
    js_sys::Reflect::set(target, &key.into(), value)
        .map_err(|_| DbError::InvalidAccess(format!("failed to set property: {}", key)))?;
    Ok(())
}
