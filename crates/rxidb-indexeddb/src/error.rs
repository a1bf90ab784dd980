//! Host exceptions as `DbError`

use rxidb_core::DbError;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::DomException;

/// Classify a value thrown by an IndexedDB call.
///
/// `DOMException`s map by name. Anything else keeps its JS error name, or
/// `Error` when it has none, under [`DbError::Unknown`].
pub fn dom_error(thrown: JsValue) -> DbError {
    if let Some(exception) = thrown.dyn_ref::<DomException>() {
        return exception_error(exception);
    }
    if let Some(error) = thrown.dyn_ref::<js_sys::Error>() {
        return DbError::from_dom(&String::from(error.name()), String::from(error.message()));
    }
    let message = js_sys::JSON::stringify(&thrown)
        .map(String::from)
        .unwrap_or_else(|_| format!("{:?}", thrown));
    DbError::Unknown {
        name: "Error".into(),
        message,
    }
}

/// Classify the `error` attribute of a request or transaction.
pub(crate) fn exception_error(exception: &DomException) -> DbError {
    DbError::from_dom(&exception.name(), exception.message())
}

/// Error reported for a failed request with no `error` attribute set.
pub(crate) fn missing_error(what: &str) -> DbError {
    DbError::Unknown {
        name: "UnknownError".into(),
        message: format!("{} failed without an error", what),
    }
}
