//! `IDBCursor` positions

use std::rc::Rc;

use rxidb_core::provider::{CursorRequest, RawCursor, RawRequest};
use rxidb_core::{Direction, Key, Result};
use serde_json::Value;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{IdbCursor, IdbCursorWithValue, IdbRequest};

use crate::convert::{js_to_direction, js_to_key, js_to_value, key_to_js, value_to_js};
use crate::error::dom_error;
use crate::request::{self, IdbRawRequest};

/// One position of a host cursor, read when the success event fired.
struct IdbPosition {
    cursor: IdbCursor,
    key: Key,
    primary_key: Key,
    value: Option<Value>,
}

impl IdbPosition {
    fn read(result: JsValue, with_value: bool) -> Result<Option<Rc<dyn RawCursor>>> {
        if result.is_null() || result.is_undefined() {
            return Ok(None);
        }
        let value = if with_value {
            let cursor: &IdbCursorWithValue = result.unchecked_ref();
            Some(js_to_value(&cursor.value().map_err(dom_error)?)?)
        } else {
            None
        };
        let cursor: IdbCursor = result.unchecked_into();
        let key = js_to_key(&cursor.key().map_err(dom_error)?)?;
        let primary_key = js_to_key(&cursor.primary_key().map_err(dom_error)?)?;
        let position: Rc<dyn RawCursor> = Rc::new(IdbPosition {
            cursor,
            key,
            primary_key,
            value,
        });
        Ok(Some(position))
    }
}

impl RawCursor for IdbPosition {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn primary_key(&self) -> Key {
        self.primary_key.clone()
    }

    fn value(&self) -> Option<Value> {
        self.value.clone()
    }

    fn direction(&self) -> Direction {
        js_to_direction(self.cursor.direction())
    }

    fn advance(&self, count: u32) -> Result<()> {
        self.cursor.advance(count).map_err(dom_error)
    }

    fn continue_(&self, key: Option<&Key>) -> Result<()> {
        let moved = match key {
            Some(key) => self.cursor.continue_with_key(&key_to_js(key)),
            None => self.cursor.continue_(),
        };
        moved.map_err(dom_error)
    }

    fn update(&self, value: Value) -> Result<Rc<dyn RawRequest<Key>>> {
        let value = value_to_js(&value)?;
        let request = self.cursor.update(&value).map_err(dom_error)?;
        Ok(request::key(request))
    }

    fn delete(&self) -> Result<Rc<dyn RawRequest<()>>> {
        let request = self.cursor.delete().map_err(dom_error)?;
        Ok(request::unit(request))
    }
}

/// Wrap the request of `openCursor` or `openKeyCursor`.
pub(crate) fn cursor_request(request: IdbRequest, with_value: bool) -> CursorRequest {
    Rc::new(IdbRawRequest::repeating(
        request,
        move |result| IdbPosition::read(result, with_value),
        Option::is_none,
    ))
}
