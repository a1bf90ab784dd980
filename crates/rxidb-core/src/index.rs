//! Index handle

use std::fmt;
use std::rc::Rc;

use crate::codec::{Codec, Identity};
use crate::cursor::CursorStream;
use crate::key::{Direction, Key, KeyPath, Query};
use crate::provider::RawIndex;
use crate::request::Request;
use crate::source;

/// A secondary ordering over a store's records.
///
/// Queries and cursor keys are index keys. `get_key`, `get_all_keys` and
/// [`crate::Cursor::primary_key`] report primary keys.
pub struct Index<C: Codec = Identity> {
    raw: Rc<dyn RawIndex>,
    codec: Rc<C>,
}

impl<C: Codec> Clone for Index<C> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<C: Codec> Index<C> {
    pub(crate) fn new(raw: Rc<dyn RawIndex>, codec: Rc<C>) -> Self {
        Self { raw, codec }
    }

    pub fn name(&self) -> String {
        self.raw.name()
    }

    pub fn key_path(&self) -> KeyPath {
        self.raw.key_path()
    }

    pub fn unique(&self) -> bool {
        self.raw.unique()
    }

    pub fn multi_entry(&self) -> bool {
        self.raw.multi_entry()
    }

    pub fn get(&self, query: impl Into<Query>) -> Request<Option<C::Item>> {
        source::get(&self.raw, query.into(), &self.codec)
    }

    pub fn get_key(&self, query: impl Into<Query>) -> Request<Option<Key>> {
        source::get_key(&self.raw, query.into())
    }

    pub fn get_all(&self, query: impl Into<Query>, count: Option<u32>) -> Request<Vec<C::Item>> {
        source::get_all(&self.raw, query.into(), count, &self.codec)
    }

    pub fn get_all_keys(&self, query: impl Into<Query>, count: Option<u32>) -> Request<Vec<Key>> {
        source::get_all_keys(&self.raw, query.into(), count)
    }

    pub fn count(&self, query: impl Into<Query>) -> Request<u64> {
        source::count(&self.raw, query.into())
    }

    pub fn open_cursor(&self, query: impl Into<Query>, direction: Direction) -> CursorStream<C> {
        source::open_cursor(&self.raw, query.into(), direction, &self.codec)
    }

    pub fn open_key_cursor(
        &self,
        query: impl Into<Query>,
        direction: Direction,
    ) -> CursorStream<C> {
        source::open_key_cursor(&self.raw, query.into(), direction, &self.codec)
    }
}

impl<C: Codec> fmt::Debug for Index<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.raw.name())
            .field("key_path", &self.raw.key_path())
            .field("unique", &self.raw.unique())
            .field("multi_entry", &self.raw.multi_entry())
            .finish()
    }
}
