//! The host store protocol
//!
//! These traits mirror the request/callback surface of an IndexedDB-style
//! factory. A provider implements them once (the memory provider in this
//! crate, the web-sys bindings in `rxidb-indexeddb`) and the façade drives
//! them without knowing which host it talks to.
//!
//! Every method that touches data returns a request handle immediately.
//! Results arrive later through the callbacks installed on that handle,
//! never synchronously from inside the call. A method returning `Err` is the
//! host refusing the call outright (what a browser reports by throwing).

use std::rc::Rc;

use serde_json::Value;

use crate::error::{DbError, Result};
use crate::key::{Direction, Key, KeyPath, Query, TransactionMode};

/// Boxed host callback. May be called more than once (cursor requests).
pub type Callback<T> = Box<dyn FnMut(T)>;

/// Request yielding a cursor position, or `None` once the range is exhausted.
pub type CursorRequest = Rc<dyn RawRequest<Option<Rc<dyn RawCursor>>>>;

/// A pending host request with a success and an error slot.
pub trait RawRequest<T> {
    /// Install both callback slots, replacing any previous ones.
    fn set_callbacks(&self, on_success: Callback<T>, on_error: Callback<DbError>);
}

/// Payload of `versionchange` and `blocked` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    pub old_version: u32,
    /// `None` when the database is being deleted.
    pub new_version: Option<u32>,
}

/// Payload of the `upgradeneeded` notification.
///
/// The transaction is the exclusive version-change transaction; it is
/// active for the duration of the callback.
pub struct UpgradeNeeded {
    pub database: Rc<dyn RawDatabase>,
    pub transaction: Rc<dyn RawTransaction>,
    pub old_version: u32,
    pub new_version: u32,
}

/// A pending open request.
pub trait RawOpenRequest {
    fn set_on_upgrade_needed(&self, callback: Callback<UpgradeNeeded>);
    fn set_on_blocked(&self, callback: Callback<VersionChange>);
    fn set_callbacks(
        &self,
        on_success: Callback<Rc<dyn RawDatabase>>,
        on_error: Callback<DbError>,
    );
}

/// A pending delete-database request.
pub trait RawDeleteRequest {
    fn set_on_blocked(&self, callback: Callback<VersionChange>);
    fn set_callbacks(&self, on_success: Callback<()>, on_error: Callback<DbError>);
}

/// The host store factory.
pub trait Provider {
    /// Open `name` at `version`, creating it if it does not exist.
    fn open(&self, name: &str, version: u32) -> Result<Rc<dyn RawOpenRequest>>;

    /// Delete `name` and everything in it.
    fn delete_database(&self, name: &str) -> Result<Rc<dyn RawDeleteRequest>>;
}

/// Options for creating an object store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreParameters {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
}

/// Options for creating an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexParameters {
    pub unique: bool,
    pub multi_entry: bool,
}

/// An open connection.
pub trait RawDatabase {
    fn name(&self) -> String;
    fn version(&self) -> u32;
    /// Store names in ascending order.
    fn object_store_names(&self) -> Vec<String>;
    fn transaction(
        &self,
        names: &[String],
        mode: TransactionMode,
    ) -> Result<Rc<dyn RawTransaction>>;
    /// Close once every transaction of this connection has finished.
    fn close(&self);

    /// Only valid inside an active version-change transaction.
    fn create_object_store(
        &self,
        name: &str,
        params: &StoreParameters,
    ) -> Result<Rc<dyn RawStore>>;
    /// Only valid inside an active version-change transaction.
    fn delete_object_store(&self, name: &str) -> Result<()>;

    fn set_on_version_change(&self, callback: Option<Callback<VersionChange>>);
    /// Fires when the host closes the connection on its own.
    fn set_on_close(&self, callback: Option<Callback<()>>);
}

/// A transaction over a fixed set of stores.
pub trait RawTransaction {
    fn mode(&self) -> TransactionMode;
    fn object_store_names(&self) -> Vec<String>;
    fn object_store(&self, name: &str) -> Result<Rc<dyn RawStore>>;
    fn error(&self) -> Option<DbError>;
    fn abort(&self) -> Result<()>;

    fn set_on_complete(&self, callback: Callback<()>);
    fn set_on_abort(&self, callback: Callback<DbError>);
    fn set_on_error(&self, callback: Callback<DbError>);
}

/// Read operations shared by object stores and indexes.
///
/// For an index, `key` arguments and cursor keys are index keys while
/// `get_key`, `get_all_keys` and `primary_key` report primary keys.
pub trait RawSource {
    fn get(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Value>>>>;
    fn get_key(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Key>>>>;
    fn get_all(
        &self,
        query: &Query,
        count: Option<u32>,
    ) -> Result<Rc<dyn RawRequest<Vec<Value>>>>;
    fn get_all_keys(
        &self,
        query: &Query,
        count: Option<u32>,
    ) -> Result<Rc<dyn RawRequest<Vec<Key>>>>;
    fn count(&self, query: &Query) -> Result<Rc<dyn RawRequest<u64>>>;
    fn open_cursor(&self, query: &Query, direction: Direction) -> Result<CursorRequest>;
    fn open_key_cursor(&self, query: &Query, direction: Direction) -> Result<CursorRequest>;
}

/// An object store within a transaction.
pub trait RawStore: RawSource {
    fn name(&self) -> String;
    fn key_path(&self) -> Option<KeyPath>;
    fn auto_increment(&self) -> bool;
    fn index_names(&self) -> Vec<String>;

    /// Insert; fails with a constraint error if the key exists.
    fn add(&self, value: Value, key: Option<Key>) -> Result<Rc<dyn RawRequest<Key>>>;
    /// Insert or replace.
    fn put(&self, value: Value, key: Option<Key>) -> Result<Rc<dyn RawRequest<Key>>>;
    fn delete(&self, query: &Query) -> Result<Rc<dyn RawRequest<()>>>;
    fn clear(&self) -> Result<Rc<dyn RawRequest<()>>>;

    fn index(&self, name: &str) -> Result<Rc<dyn RawIndex>>;
    /// Only valid inside an active version-change transaction.
    fn create_index(
        &self,
        name: &str,
        key_path: &KeyPath,
        params: &IndexParameters,
    ) -> Result<Rc<dyn RawIndex>>;
    /// Only valid inside an active version-change transaction.
    fn delete_index(&self, name: &str) -> Result<()>;
}

/// A secondary ordering over a store's records.
pub trait RawIndex: RawSource {
    fn name(&self) -> String;
    fn key_path(&self) -> KeyPath;
    fn unique(&self) -> bool;
    fn multi_entry(&self) -> bool;
}

/// A cursor positioned on one record.
///
/// The same cursor object is delivered again through its request's success
/// slot after each move.
pub trait RawCursor {
    fn key(&self) -> Key;
    fn primary_key(&self) -> Key;
    /// `None` for key cursors.
    fn value(&self) -> Option<Value>;
    fn direction(&self) -> Direction;

    fn advance(&self, count: u32) -> Result<()>;
    /// Move to the next position, or to the first position at or past `key`.
    fn continue_(&self, key: Option<&Key>) -> Result<()>;
    fn update(&self, value: Value) -> Result<Rc<dyn RawRequest<Key>>>;
    fn delete(&self) -> Result<Rc<dyn RawRequest<()>>>;
}
