//! Object store handle

use std::fmt;
use std::rc::Rc;

use crate::codec::{Codec, Identity};
use crate::cursor::CursorStream;
use crate::error::Result;
use crate::index::Index;
use crate::key::{Direction, Key, KeyPath, Query};
use crate::provider::RawStore;
use crate::request::Request;
use crate::schema::{self, IndexDefinition};
use crate::source;
use crate::transaction::Transaction;

/// A store inside a transaction.
///
/// Every accessor issues exactly one host request when its result is first
/// polled. Items pass through the handle's codec on the way in and out.
pub struct ObjectStore<C: Codec = Identity> {
    raw: Rc<dyn RawStore>,
    tx: Transaction,
    codec: Rc<C>,
}

impl<C: Codec> Clone for ObjectStore<C> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            tx: self.tx.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<C: Codec> ObjectStore<C> {
    pub(crate) fn new(raw: Rc<dyn RawStore>, tx: Transaction, codec: C) -> Self {
        Self {
            raw,
            tx,
            codec: Rc::new(codec),
        }
    }

    pub fn name(&self) -> String {
        self.raw.name()
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.raw.key_path()
    }

    pub fn auto_increment(&self) -> bool {
        self.raw.auto_increment()
    }

    /// Index names in ascending order.
    pub fn index_names(&self) -> Vec<String> {
        self.raw.index_names()
    }

    /// The transaction this handle belongs to.
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// The same store read and written through another codec.
    pub fn with_codec<D: Codec>(&self, codec: D) -> ObjectStore<D> {
        ObjectStore {
            raw: self.raw.clone(),
            tx: self.tx.clone(),
            codec: Rc::new(codec),
        }
    }

    /// Insert `item`, failing with a constraint error if its key exists.
    ///
    /// `key` is required for stores without a key path or key generator and
    /// must be `None` for stores with a key path.
    pub fn add(&self, item: C::Item, key: Option<Key>) -> Request<Key> {
        let value = match self.codec.serialize(item) {
            Ok(value) => value,
            Err(err) => return Request::failed(err),
        };
        let raw = self.raw.clone();
        Request::from_raw(move || raw.add(value, key), Ok)
    }

    /// Insert or replace `item`.
    pub fn put(&self, item: C::Item, key: Option<Key>) -> Request<Key> {
        let value = match self.codec.serialize(item) {
            Ok(value) => value,
            Err(err) => return Request::failed(err),
        };
        let raw = self.raw.clone();
        Request::from_raw(move || raw.put(value, key), Ok)
    }

    /// The first record selected by `query`.
    pub fn get(&self, query: impl Into<Query>) -> Request<Option<C::Item>> {
        source::get(&self.raw, query.into(), &self.codec)
    }

    pub fn get_key(&self, query: impl Into<Query>) -> Request<Option<Key>> {
        source::get_key(&self.raw, query.into())
    }

    /// Up to `count` records in key order.
    pub fn get_all(&self, query: impl Into<Query>, count: Option<u32>) -> Request<Vec<C::Item>> {
        source::get_all(&self.raw, query.into(), count, &self.codec)
    }

    pub fn get_all_keys(&self, query: impl Into<Query>, count: Option<u32>) -> Request<Vec<Key>> {
        source::get_all_keys(&self.raw, query.into(), count)
    }

    /// Delete every record selected by `query`. Deleting nothing succeeds.
    pub fn delete(&self, query: impl Into<Query>) -> Request<()> {
        let raw = self.raw.clone();
        let query = query.into();
        Request::from_raw(move || raw.delete(&query), Ok)
    }

    pub fn clear(&self) -> Request<()> {
        let raw = self.raw.clone();
        Request::from_raw(move || raw.clear(), Ok)
    }

    pub fn count(&self, query: impl Into<Query>) -> Request<u64> {
        source::count(&self.raw, query.into())
    }

    pub fn open_cursor(&self, query: impl Into<Query>, direction: Direction) -> CursorStream<C> {
        source::open_cursor(&self.raw, query.into(), direction, &self.codec)
    }

    /// Cursor over keys only; [`crate::Cursor::value`] is always `None`.
    pub fn open_key_cursor(
        &self,
        query: impl Into<Query>,
        direction: Direction,
    ) -> CursorStream<C> {
        source::open_key_cursor(&self.raw, query.into(), direction, &self.codec)
    }

    /// Handle on one of this store's indexes, sharing the store's codec.
    pub fn index(&self, name: &str) -> Result<Index<C>> {
        let raw = self.raw.index(name)?;
        Ok(Index::new(raw, self.codec.clone()))
    }

    /// Add an index over the records already stored. Only valid inside an
    /// upgrade.
    pub fn create_index(&self, definition: &IndexDefinition) -> Result<Index<C>> {
        let raw = schema::create_index(&*self.raw, definition)?;
        Ok(Index::new(raw, self.codec.clone()))
    }

    /// Only valid inside an upgrade.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        self.raw.delete_index(name)
    }
}

impl<C: Codec> fmt::Debug for ObjectStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("name", &self.raw.name())
            .field("key_path", &self.raw.key_path())
            .field("auto_increment", &self.raw.auto_increment())
            .finish()
    }
}
