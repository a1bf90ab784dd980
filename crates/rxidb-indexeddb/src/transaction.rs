//! `IDBTransaction` as a provider transaction

use std::rc::Rc;

use rxidb_core::provider::{Callback, RawStore, RawTransaction};
use rxidb_core::{DbError, Result, TransactionMode};
use tracing::trace;
use wasm_bindgen::JsCast;
use web_sys::{Event, IdbRequest, IdbTransaction};

use crate::convert::{js_to_mode, string_list};
use crate::error::{dom_error, exception_error, missing_error};
use crate::idb::Listeners;
use crate::request::request_error;
use crate::source::IdbStoreHandle;

/// A host transaction. Its handlers live until `complete` or `abort`.
pub(crate) struct IdbTransactionHandle {
    tx: IdbTransaction,
    listeners: Listeners,
}

impl IdbTransactionHandle {
    pub(crate) fn new(tx: IdbTransaction) -> Self {
        Self {
            tx,
            listeners: Listeners::default(),
        }
    }
}

/// The request an `error` event bubbled up from.
fn failed_request(event: &Event) -> Option<IdbRequest> {
    event.target()?.dyn_into::<IdbRequest>().ok()
}

impl RawTransaction for IdbTransactionHandle {
    fn mode(&self) -> TransactionMode {
        self.tx
            .mode()
            .map(js_to_mode)
            .unwrap_or(TransactionMode::ReadOnly)
    }

    fn object_store_names(&self) -> Vec<String> {
        string_list(&self.tx.object_store_names())
    }

    fn object_store(&self, name: &str) -> Result<Rc<dyn RawStore>> {
        let store = self.tx.object_store(name).map_err(dom_error)?;
        Ok(Rc::new(IdbStoreHandle::new(store)))
    }

    fn error(&self) -> Option<DbError> {
        self.tx.error().map(|exception| exception_error(&exception))
    }

    fn abort(&self) -> Result<()> {
        trace!("aborting transaction");
        self.tx.abort().map_err(dom_error)
    }

    fn set_on_complete(&self, mut callback: Callback<()>) {
        let done = self.listeners.clone();
        let handler = self.listeners.handler(move |_event| {
            callback(());
            done.release();
        });
        self.tx.set_oncomplete(Some(&handler));
    }

    fn set_on_abort(&self, mut callback: Callback<DbError>) {
        let tx = self.tx.clone();
        let done = self.listeners.clone();
        let handler = self.listeners.handler(move |_event| {
            let reason = tx
                .error()
                .map(|exception| exception_error(&exception))
                .unwrap_or_else(|| DbError::Abort("transaction was aborted".into()));
            callback(reason);
            done.release();
        });
        self.tx.set_onabort(Some(&handler));
    }

    fn set_on_error(&self, mut callback: Callback<DbError>) {
        let handler = self.listeners.handler(move |event: Event| {
            let err = match failed_request(&event) {
                Some(request) => request_error(&request),
                None => missing_error("transaction"),
            };
            callback(err);
        });
        self.tx.set_onerror(Some(&handler));
    }
}
