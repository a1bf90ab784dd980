//! Connections and the open/delete requests that produce them

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Function};
use rxidb_core::provider::{
    Callback, RawDatabase, RawDeleteRequest, RawOpenRequest, RawStore, RawTransaction,
    StoreParameters, UpgradeNeeded, VersionChange,
};
use rxidb_core::{DbError, Result, TransactionMode};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Event, IdbDatabase, IdbObjectStoreParameters, IdbOpenDbRequest, IdbVersionChangeEvent,
};

use crate::convert::{key_path_to_js, mode_to_js, string_list};
use crate::error::dom_error;
use crate::idb::{set_prop, Listeners};
use crate::request::{deliver, request_error};
use crate::source::IdbStoreHandle;
use crate::transaction::IdbTransactionHandle;

type Handler = Closure<dyn FnMut(Event)>;

fn version_change(event: Event) -> VersionChange {
    let event: IdbVersionChangeEvent = event.unchecked_into();
    VersionChange {
        old_version: event.old_version() as u32,
        new_version: event.new_version().map(|version| version as u32),
    }
}

/// An open connection.
pub(crate) struct IdbConnection {
    db: IdbDatabase,
    on_version_change: RefCell<Option<Handler>>,
    on_close: RefCell<Option<Handler>>,
}

impl IdbConnection {
    pub(crate) fn new(db: IdbDatabase) -> Self {
        Self {
            db,
            on_version_change: RefCell::new(None),
            on_close: RefCell::new(None),
        }
    }
}

impl RawDatabase for IdbConnection {
    fn name(&self) -> String {
        self.db.name()
    }

    fn version(&self) -> u32 {
        self.db.version() as u32
    }

    fn object_store_names(&self) -> Vec<String> {
        string_list(&self.db.object_store_names())
    }

    fn transaction(
        &self,
        names: &[String],
        mode: TransactionMode,
    ) -> Result<Rc<dyn RawTransaction>> {
        let scope: Array = names.iter().map(|name| JsValue::from_str(name)).collect();
        let tx = self
            .db
            .transaction_with_str_sequence_and_mode(&scope, mode_to_js(mode))
            .map_err(dom_error)?;
        Ok(Rc::new(IdbTransactionHandle::new(tx)))
    }

    fn close(&self) {
        debug!(db = %self.db.name(), "closing connection");
        self.db.close();
    }

    fn create_object_store(
        &self,
        name: &str,
        params: &StoreParameters,
    ) -> Result<Rc<dyn RawStore>> {
        let parameters = IdbObjectStoreParameters::new();
        if let Some(key_path) = &params.key_path {
            set_prop(&parameters, "keyPath", &key_path_to_js(key_path))?;
        }
        set_prop(
            &parameters,
            "autoIncrement",
            &JsValue::from_bool(params.auto_increment),
        )?;

        let store = self
            .db
            .create_object_store_with_optional_parameters(name, &parameters)
            .map_err(dom_error)?;
        Ok(Rc::new(IdbStoreHandle::new(store)))
    }

    fn delete_object_store(&self, name: &str) -> Result<()> {
        self.db.delete_object_store(name).map_err(dom_error)
    }

    fn set_on_version_change(&self, callback: Option<Callback<VersionChange>>) {
        let handler = callback.map(|mut callback| {
            Closure::wrap(
                Box::new(move |event: Event| callback(version_change(event)))
                    as Box<dyn FnMut(Event)>,
            )
        });
        self.db
            .set_onversionchange(handler.as_ref().map(|h| h.as_ref().unchecked_ref()));
        *self.on_version_change.borrow_mut() = handler;
    }

    fn set_on_close(&self, callback: Option<Callback<()>>) {
        let handler = callback.map(|mut callback| {
            Closure::wrap(Box::new(move |_event: Event| callback(())) as Box<dyn FnMut(Event)>)
        });
        self.db
            .set_onclose(handler.as_ref().map(|h| h.as_ref().unchecked_ref()));
        *self.on_close.borrow_mut() = handler;
    }
}

impl Drop for IdbConnection {
    fn drop(&mut self) {
        // Another wrapper of the same connection may own the handlers.
        if self.on_version_change.get_mut().is_some() {
            self.db.set_onversionchange(None);
        }
        if self.on_close.get_mut().is_some() {
            self.db.set_onclose(None);
        }
    }
}

fn blocked_handler(listeners: &Listeners, mut callback: Callback<VersionChange>) -> Function {
    listeners.handler(move |event| callback(version_change(event)))
}

/// A pending `indexedDB.open`. Its handlers live until `success` or `error`.
pub(crate) struct IdbOpenRequest {
    request: IdbOpenDbRequest,
    listeners: Listeners,
}

impl IdbOpenRequest {
    pub(crate) fn new(request: IdbOpenDbRequest) -> Self {
        Self {
            request,
            listeners: Listeners::default(),
        }
    }
}

impl RawOpenRequest for IdbOpenRequest {
    fn set_on_upgrade_needed(&self, mut callback: Callback<UpgradeNeeded>) {
        let request = self.request.clone();
        let handler = self.listeners.handler(move |event: Event| {
            let event: IdbVersionChangeEvent = event.unchecked_into();
            let db = request
                .result()
                .ok()
                .and_then(|result| result.dyn_into::<IdbDatabase>().ok());
            let (Some(db), Some(tx)) = (db, request.transaction()) else {
                warn!("upgradeneeded without a connection or transaction");
                return;
            };
            callback(UpgradeNeeded {
                database: Rc::new(IdbConnection::new(db)),
                transaction: Rc::new(IdbTransactionHandle::new(tx)),
                old_version: event.old_version() as u32,
                new_version: event.new_version().unwrap_or_default() as u32,
            });
        });
        self.request.set_onupgradeneeded(Some(&handler));
    }

    fn set_on_blocked(&self, callback: Callback<VersionChange>) {
        let handler = blocked_handler(&self.listeners, callback);
        self.request.set_onblocked(Some(&handler));
    }

    fn set_callbacks(
        &self,
        mut on_success: Callback<Rc<dyn RawDatabase>>,
        on_error: Callback<DbError>,
    ) {
        let on_error = Rc::new(RefCell::new(on_error));

        let request = self.request.clone();
        let failed = on_error.clone();
        let done = self.listeners.clone();
        let success = self.listeners.handler(move |_event| {
            let opened = request.result().map_err(dom_error).and_then(|result| {
                result
                    .dyn_into::<IdbDatabase>()
                    .map_err(|_| DbError::InvalidState("open result is not IdbDatabase".into()))
            });
            match opened {
                Ok(db) => on_success(Rc::new(IdbConnection::new(db))),
                Err(err) => deliver(&failed, err),
            }
            done.release();
        });

        let request = self.request.clone();
        let done = self.listeners.clone();
        let error = self.listeners.handler(move |_event| {
            deliver(&on_error, request_error(&request));
            done.release();
        });

        self.request.set_onsuccess(Some(&success));
        self.request.set_onerror(Some(&error));
    }
}

/// A pending `indexedDB.deleteDatabase`.
pub(crate) struct IdbDeleteRequest {
    request: IdbOpenDbRequest,
    listeners: Listeners,
}

impl IdbDeleteRequest {
    pub(crate) fn new(request: IdbOpenDbRequest) -> Self {
        Self {
            request,
            listeners: Listeners::default(),
        }
    }
}

impl RawDeleteRequest for IdbDeleteRequest {
    fn set_on_blocked(&self, callback: Callback<VersionChange>) {
        let handler = blocked_handler(&self.listeners, callback);
        self.request.set_onblocked(Some(&handler));
    }

    fn set_callbacks(&self, mut on_success: Callback<()>, mut on_error: Callback<DbError>) {
        let done = self.listeners.clone();
        let success = self.listeners.handler(move |_event| {
            on_success(());
            done.release();
        });

        let request = self.request.clone();
        let done = self.listeners.clone();
        let error = self.listeners.handler(move |_event| {
            on_error(request_error(&request));
            done.release();
        });

        self.request.set_onsuccess(Some(&success));
        self.request.set_onerror(Some(&error));
    }
}
