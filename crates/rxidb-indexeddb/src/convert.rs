//! Conversions between rxidb values and their JS forms

use js_sys::{Array, ArrayBuffer, Date, Uint8Array};
use rxidb_core::{DbError, Direction, Key, KeyPath, KeyRange, Query, Result, TransactionMode};
use serde_json::Value;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{IdbCursorDirection, IdbKeyRange, IdbTransactionMode};

use crate::error::dom_error;

pub fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::Date(ms) => Date::new(&JsValue::from_f64(*ms)).into(),
        Key::String(s) => JsValue::from_str(s),
        Key::Binary(bytes) => Uint8Array::from(bytes.as_slice()).into(),
        Key::Array(items) => items.iter().map(key_to_js).collect::<Array>().into(),
    }
}

/// Read a key the host produced.
pub fn js_to_key(value: &JsValue) -> Result<Key> {
    if let Some(n) = value.as_f64() {
        return Ok(Key::Number(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(Key::String(s));
    }
    if let Some(date) = value.dyn_ref::<Date>() {
        return Ok(Key::Date(date.get_time()));
    }
    if Array::is_array(value) {
        return Array::from(value)
            .iter()
            .map(|item| js_to_key(&item))
            .collect::<Result<Vec<_>>>()
            .map(Key::Array);
    }
    if let Some(buffer) = value.dyn_ref::<ArrayBuffer>() {
        return Ok(Key::Binary(Uint8Array::new(buffer).to_vec()));
    }
    if let Some(bytes) = value.dyn_ref::<Uint8Array>() {
        return Ok(Key::Binary(bytes.to_vec()));
    }
    Err(DbError::Data(format!("{:?} is not a valid key", value)))
}

/// `undefined` reads as `None`.
pub fn js_to_optional_key(value: &JsValue) -> Result<Option<Key>> {
    if value.is_undefined() {
        return Ok(None);
    }
    js_to_key(value).map(Some)
}

pub fn value_to_js(value: &Value) -> Result<JsValue> {
    let json = serde_json::to_string(value)?;
    js_sys::JSON::parse(&json).map_err(dom_error)
}

/// Read a record value. Dates come back as their JSON string form.
pub fn js_to_value(value: &JsValue) -> Result<Value> {
    if value.is_undefined() {
        return Ok(Value::Null);
    }
    let json = js_sys::JSON::stringify(value).map_err(dom_error)?;
    let json = json
        .as_string()
        .ok_or_else(|| DbError::Serialization("value has no JSON form".into()))?;
    Ok(serde_json::from_str(&json)?)
}

pub fn key_path_to_js(key_path: &KeyPath) -> JsValue {
    match key_path {
        KeyPath::Single(path) => JsValue::from_str(path),
        KeyPath::Compound(paths) => paths
            .iter()
            .map(|path| JsValue::from_str(path))
            .collect::<Array>()
            .into(),
    }
}

/// `null` reads as `None` (out-of-line keys).
pub fn js_to_key_path(value: &JsValue) -> Option<KeyPath> {
    if let Some(path) = value.as_string() {
        return Some(KeyPath::Single(path));
    }
    if Array::is_array(value) {
        let paths = Array::from(value)
            .iter()
            .filter_map(|item| item.as_string())
            .collect();
        return Some(KeyPath::Compound(paths));
    }
    None
}

pub fn range_to_js(range: &KeyRange) -> Result<JsValue> {
    range.validate()?;
    let created = match (&range.lower, &range.upper) {
        (Some(lower), Some(upper)) => IdbKeyRange::bound_with_lower_open_and_upper_open(
            &key_to_js(lower),
            &key_to_js(upper),
            range.lower_open,
            range.upper_open,
        ),
        (Some(lower), None) => {
            IdbKeyRange::lower_bound_with_open(&key_to_js(lower), range.lower_open)
        }
        (None, Some(upper)) => {
            IdbKeyRange::upper_bound_with_open(&key_to_js(upper), range.upper_open)
        }
        (None, None) => return Ok(JsValue::UNDEFINED),
    };
    created.map(JsValue::from).map_err(dom_error)
}

/// `Query::All` becomes `undefined`, which the host reads as every key.
pub fn query_to_js(query: &Query) -> Result<JsValue> {
    match query {
        Query::All => Ok(JsValue::UNDEFINED),
        Query::Key(key) => Ok(key_to_js(key)),
        Query::Range(range) => range_to_js(range),
    }
}

pub fn direction_to_js(direction: Direction) -> IdbCursorDirection {
    match direction {
        Direction::Next => IdbCursorDirection::Next,
        Direction::NextUnique => IdbCursorDirection::Nextunique,
        Direction::Prev => IdbCursorDirection::Prev,
        Direction::PrevUnique => IdbCursorDirection::Prevunique,
    }
}

pub fn js_to_direction(direction: IdbCursorDirection) -> Direction {
    match direction {
        IdbCursorDirection::Nextunique => Direction::NextUnique,
        IdbCursorDirection::Prev => Direction::Prev,
        IdbCursorDirection::Prevunique => Direction::PrevUnique,
        _ => Direction::Next,
    }
}

pub fn mode_to_js(mode: TransactionMode) -> IdbTransactionMode {
    match mode {
        TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
        TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        TransactionMode::VersionChange => IdbTransactionMode::Versionchange,
    }
}

pub fn js_to_mode(mode: IdbTransactionMode) -> TransactionMode {
    match mode {
        IdbTransactionMode::Readwrite => TransactionMode::ReadWrite,
        IdbTransactionMode::Versionchange => TransactionMode::VersionChange,
        _ => TransactionMode::ReadOnly,
    }
}

/// Collect a `DOMStringList` into a sorted `Vec`.
pub(crate) fn string_list(list: &web_sys::DomStringList) -> Vec<String> {
    let mut names: Vec<String> = (0..list.length()).filter_map(|i| list.item(i)).collect();
    names.sort();
    names
}
