//! `IDBRequest` as a provider request

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Array;
use rxidb_core::provider::{Callback, RawRequest};
use rxidb_core::{DbError, Key, Result};
use serde_json::Value;
use wasm_bindgen::JsValue;
use web_sys::IdbRequest;

use crate::convert::{js_to_key, js_to_optional_key, js_to_value};
use crate::error::{dom_error, exception_error, missing_error};
use crate::idb::Listeners;

type Read<T> = Rc<dyn Fn(JsValue) -> Result<T>>;

/// A host request whose `result` is read through `read`.
pub(crate) struct IdbRawRequest<T> {
    request: IdbRequest,
    read: Read<T>,
    /// True for the result after which the host fires no more events.
    settles: fn(&T) -> bool,
}

impl<T: 'static> IdbRawRequest<T> {
    pub(crate) fn new(request: IdbRequest, read: impl Fn(JsValue) -> Result<T> + 'static) -> Self {
        Self {
            request,
            read: Rc::new(read),
            settles: |_| true,
        }
    }

    /// A request whose success event fires again until `settles` holds.
    pub(crate) fn repeating(
        request: IdbRequest,
        read: impl Fn(JsValue) -> Result<T> + 'static,
        settles: fn(&T) -> bool,
    ) -> Self {
        Self {
            request,
            read: Rc::new(read),
            settles,
        }
    }
}

impl<T: 'static> RawRequest<T> for IdbRawRequest<T> {
    fn set_callbacks(&self, mut on_success: Callback<T>, on_error: Callback<DbError>) {
        let listeners = Listeners::default();
        let on_error = Rc::new(RefCell::new(on_error));

        let request = self.request.clone();
        let read = self.read.clone();
        let settles = self.settles;
        let failed = on_error.clone();
        let done = listeners.clone();
        let success = listeners.handler(move |_event| {
            match request.result().map_err(dom_error).and_then(|value| read(value)) {
                Ok(value) => {
                    let last = settles(&value);
                    on_success(value);
                    if last {
                        done.release();
                    }
                }
                Err(err) => {
                    deliver(&failed, err);
                    done.release();
                }
            }
        });

        let request = self.request.clone();
        let done = listeners.clone();
        let error = listeners.handler(move |_event| {
            deliver(&on_error, request_error(&request));
            done.release();
        });

        self.request.set_onsuccess(Some(&success));
        self.request.set_onerror(Some(&error));
        if let Some(tx) = self.request.transaction() {
            listeners.release_with(&tx);
        }
    }
}

pub(crate) fn deliver<T>(slot: &RefCell<Callback<T>>, value: T) {
    let mut callback = slot.borrow_mut();
    (*callback)(value);
}

/// The `error` attribute of a request that fired `error`.
pub(crate) fn request_error(request: &IdbRequest) -> DbError {
    match request.error() {
        Ok(Some(exception)) => exception_error(&exception),
        Ok(None) => missing_error("request"),
        Err(thrown) => dom_error(thrown),
    }
}

pub(crate) fn unit(request: IdbRequest) -> Rc<dyn RawRequest<()>> {
    Rc::new(IdbRawRequest::new(request, |_| Ok(())))
}

pub(crate) fn key(request: IdbRequest) -> Rc<dyn RawRequest<Key>> {
    Rc::new(IdbRawRequest::new(request, |value| js_to_key(&value)))
}

pub(crate) fn optional_key(request: IdbRequest) -> Rc<dyn RawRequest<Option<Key>>> {
    Rc::new(IdbRawRequest::new(request, |value| js_to_optional_key(&value)))
}

pub(crate) fn optional_value(request: IdbRequest) -> Rc<dyn RawRequest<Option<Value>>> {
    Rc::new(IdbRawRequest::new(request, |value| {
        if value.is_undefined() {
            Ok(None)
        } else {
            js_to_value(&value).map(Some)
        }
    }))
}

pub(crate) fn values(request: IdbRequest) -> Rc<dyn RawRequest<Vec<Value>>> {
    Rc::new(IdbRawRequest::new(request, |value| {
        Array::from(&value)
            .iter()
            .map(|item| js_to_value(&item))
            .collect::<Result<Vec<_>>>()
    }))
}

pub(crate) fn keys(request: IdbRequest) -> Rc<dyn RawRequest<Vec<Key>>> {
    Rc::new(IdbRawRequest::new(request, |value| {
        Array::from(&value)
            .iter()
            .map(|item| js_to_key(&item))
            .collect::<Result<Vec<_>>>()
    }))
}

pub(crate) fn count(request: IdbRequest) -> Rc<dyn RawRequest<u64>> {
    Rc::new(IdbRawRequest::new(request, |value| {
        value
            .as_f64()
            .map(|n| n as u64)
            .ok_or_else(|| DbError::Data(format!("{:?} is not a count", value)))
    }))
}
