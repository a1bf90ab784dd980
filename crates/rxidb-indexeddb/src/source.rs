//! Object stores and indexes

use std::rc::Rc;

use rxidb_core::provider::{
    CursorRequest, IndexParameters, RawIndex, RawRequest, RawSource, RawStore,
};
use rxidb_core::{Direction, Key, KeyPath, Query, Result};
use serde_json::Value;
use wasm_bindgen::JsValue;
use web_sys::{IdbIndex, IdbIndexParameters, IdbObjectStore};

use crate::convert::{
    direction_to_js, js_to_key_path, key_path_to_js, key_to_js, query_to_js, string_list,
    value_to_js,
};
use crate::cursor::cursor_request;
use crate::error::dom_error;
use crate::idb::set_prop;
use crate::request;

pub(crate) struct IdbStoreHandle {
    store: IdbObjectStore,
}

impl IdbStoreHandle {
    pub(crate) fn new(store: IdbObjectStore) -> Self {
        Self { store }
    }
}

pub(crate) struct IdbIndexHandle {
    index: IdbIndex,
}

// `IDBObjectStore` and `IDBIndex` share their read surface.
macro_rules! raw_source {
    ($handle:ty, $field:ident) => {
        impl RawSource for $handle {
            fn get(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Value>>>> {
                let request = self.$field.get(&query_to_js(query)?).map_err(dom_error)?;
                Ok(request::optional_value(request))
            }

            fn get_key(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Key>>>> {
                let request = self
                    .$field
                    .get_key(&query_to_js(query)?)
                    .map_err(dom_error)?;
                Ok(request::optional_key(request))
            }

            fn get_all(
                &self,
                query: &Query,
                count: Option<u32>,
            ) -> Result<Rc<dyn RawRequest<Vec<Value>>>> {
                let range = query_to_js(query)?;
                let request = match count {
                    Some(count) => self.$field.get_all_with_key_and_limit(&range, count),
                    None => self.$field.get_all_with_key(&range),
                }
                .map_err(dom_error)?;
                Ok(request::values(request))
            }

            fn get_all_keys(
                &self,
                query: &Query,
                count: Option<u32>,
            ) -> Result<Rc<dyn RawRequest<Vec<Key>>>> {
                let range = query_to_js(query)?;
                let request = match count {
                    Some(count) => self.$field.get_all_keys_with_key_and_limit(&range, count),
                    None => self.$field.get_all_keys_with_key(&range),
                }
                .map_err(dom_error)?;
                Ok(request::keys(request))
            }

            fn count(&self, query: &Query) -> Result<Rc<dyn RawRequest<u64>>> {
                let request = self
                    .$field
                    .count_with_key(&query_to_js(query)?)
                    .map_err(dom_error)?;
                Ok(request::count(request))
            }

            fn open_cursor(&self, query: &Query, direction: Direction) -> Result<CursorRequest> {
                let request = self
                    .$field
                    .open_cursor_with_range_and_direction(
                        &query_to_js(query)?,
                        direction_to_js(direction),
                    )
                    .map_err(dom_error)?;
                Ok(cursor_request(request, true))
            }

            fn open_key_cursor(
                &self,
                query: &Query,
                direction: Direction,
            ) -> Result<CursorRequest> {
                let request = self
                    .$field
                    .open_key_cursor_with_range_and_direction(
                        &query_to_js(query)?,
                        direction_to_js(direction),
                    )
                    .map_err(dom_error)?;
                Ok(cursor_request(request, false))
            }
        }
    };
}

raw_source!(IdbStoreHandle, store);
raw_source!(IdbIndexHandle, index);

impl RawStore for IdbStoreHandle {
    fn name(&self) -> String {
        self.store.name()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.store
            .key_path()
            .ok()
            .and_then(|path| js_to_key_path(&path))
    }

    fn auto_increment(&self) -> bool {
        self.store.auto_increment()
    }

    fn index_names(&self) -> Vec<String> {
        string_list(&self.store.index_names())
    }

    fn add(&self, value: Value, key: Option<Key>) -> Result<Rc<dyn RawRequest<Key>>> {
        let value = value_to_js(&value)?;
        let request = match key {
            Some(key) => self.store.add_with_key(&value, &key_to_js(&key)),
            None => self.store.add(&value),
        }
        .map_err(dom_error)?;
        Ok(request::key(request))
    }

    fn put(&self, value: Value, key: Option<Key>) -> Result<Rc<dyn RawRequest<Key>>> {
        let value = value_to_js(&value)?;
        let request = match key {
            Some(key) => self.store.put_with_key(&value, &key_to_js(&key)),
            None => self.store.put(&value),
        }
        .map_err(dom_error)?;
        Ok(request::key(request))
    }

    fn delete(&self, query: &Query) -> Result<Rc<dyn RawRequest<()>>> {
        let request = self
            .store
            .delete(&query_to_js(query)?)
            .map_err(dom_error)?;
        Ok(request::unit(request))
    }

    fn clear(&self) -> Result<Rc<dyn RawRequest<()>>> {
        let request = self.store.clear().map_err(dom_error)?;
        Ok(request::unit(request))
    }

    fn index(&self, name: &str) -> Result<Rc<dyn RawIndex>> {
        let index = self.store.index(name).map_err(dom_error)?;
        Ok(Rc::new(IdbIndexHandle { index }))
    }

    fn create_index(
        &self,
        name: &str,
        key_path: &KeyPath,
        params: &IndexParameters,
    ) -> Result<Rc<dyn RawIndex>> {
        let parameters = IdbIndexParameters::new();
        set_prop(&parameters, "unique", &JsValue::from_bool(params.unique))?;
        set_prop(&parameters, "multiEntry", &JsValue::from_bool(params.multi_entry))?;

        let created = match key_path {
            KeyPath::Single(path) => self
                .store
                .create_index_with_str_and_optional_parameters(name, path, &parameters),
            KeyPath::Compound(_) => {
                self.store.create_index_with_str_sequence_and_optional_parameters(
                    name,
                    &key_path_to_js(key_path),
                    &parameters,
                )
            }
        };
        let index = created.map_err(dom_error)?;
        Ok(Rc::new(IdbIndexHandle { index }))
    }

    fn delete_index(&self, name: &str) -> Result<()> {
        self.store.delete_index(name).map_err(dom_error)
    }
}

impl RawIndex for IdbIndexHandle {
    fn name(&self) -> String {
        self.index.name()
    }

    fn key_path(&self) -> KeyPath {
        self.index
            .key_path()
            .ok()
            .and_then(|path| js_to_key_path(&path))
            .unwrap_or_else(|| KeyPath::Single(String::new()))
    }

    fn unique(&self) -> bool {
        self.index.unique()
    }

    fn multi_entry(&self) -> bool {
        self.index.multi_entry()
    }
}
