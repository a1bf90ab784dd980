//! Provider trait implementations over the engine
//!
//! Handles validate each call synchronously, the way a browser throws, and
//! queue the work as an [`Op`] on the owning transaction. Results come back
//! through the request's callback slots on a later turn.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde_json::Value;

use super::data::{seek, IndexMeta, Source, StoreData, StoredDb};
use super::engine::{fire, fire_once, ConnShared, Deliver, Engine, Op, Phase, TxShared};
use crate::error::{DbError, Result};
use crate::key::{Direction, Key, KeyPath, Query, TransactionMode};
use crate::provider::{
    Callback, CursorRequest, IndexParameters, RawCursor, RawDatabase, RawDeleteRequest,
    RawIndex, RawOpenRequest, RawRequest, RawSource, RawStore, RawTransaction,
    StoreParameters, UpgradeNeeded, VersionChange,
};

fn deliver(f: impl FnOnce() + 'static) -> Deliver {
    Box::new(f)
}

fn check_active(tx: &TxShared) -> Result<()> {
    match tx.phase.get() {
        Phase::Active => Ok(()),
        Phase::Finished => Err(DbError::TransactionInactive(
            "transaction has finished".into(),
        )),
        Phase::Starting | Phase::Inactive => Err(DbError::TransactionInactive(
            "transaction is not active".into(),
        )),
    }
}

fn check_open(tx: &TxShared) -> Result<()> {
    if tx.phase.get() == Phase::Finished {
        return Err(DbError::InvalidState("transaction has finished".into()));
    }
    Ok(())
}

fn require_key(query: &Query) -> Result<()> {
    if *query == Query::All {
        return Err(DbError::Data("a key or key range is required".into()));
    }
    query.validate()
}

// ============================================================================
// Requests
// ============================================================================

pub(crate) struct MemRequest<T> {
    slots: RefCell<Option<(Callback<T>, Callback<DbError>)>>,
}

impl<T> Default for MemRequest<T> {
    fn default() -> Self {
        Self {
            slots: RefCell::new(None),
        }
    }
}

impl<T> MemRequest<T> {
    pub(crate) fn succeed(&self, value: T) {
        let taken = self.slots.borrow_mut().take();
        if let Some((mut on_success, on_error)) = taken {
            on_success(value);
            self.restore(on_success, on_error);
        }
    }

    pub(crate) fn fail(&self, err: DbError) {
        let taken = self.slots.borrow_mut().take();
        if let Some((on_success, mut on_error)) = taken {
            on_error(err);
            self.restore(on_success, on_error);
        }
    }

    fn restore(&self, on_success: Callback<T>, on_error: Callback<DbError>) {
        let mut slots = self.slots.borrow_mut();
        if slots.is_none() {
            *slots = Some((on_success, on_error));
        }
    }
}

impl<T> RawRequest<T> for MemRequest<T> {
    fn set_callbacks(&self, on_success: Callback<T>, on_error: Callback<DbError>) {
        *self.slots.borrow_mut() = Some((on_success, on_error));
    }
}

#[derive(Default)]
pub(crate) struct MemOpenRequest {
    upgrade: RefCell<Option<Callback<UpgradeNeeded>>>,
    blocked: RefCell<Option<Callback<VersionChange>>>,
    result: MemRequest<Rc<dyn RawDatabase>>,
}

impl MemOpenRequest {
    pub(crate) fn upgrade_needed(&self, event: UpgradeNeeded) {
        fire_once(&self.upgrade, event);
    }

    pub(crate) fn blocked(&self, change: VersionChange) {
        fire(&self.blocked, change);
    }

    pub(crate) fn succeed(&self, db: Rc<dyn RawDatabase>) {
        self.result.succeed(db);
    }

    pub(crate) fn fail(&self, err: DbError) {
        self.result.fail(err);
    }
}

impl RawOpenRequest for MemOpenRequest {
    fn set_on_upgrade_needed(&self, callback: Callback<UpgradeNeeded>) {
        *self.upgrade.borrow_mut() = Some(callback);
    }

    fn set_on_blocked(&self, callback: Callback<VersionChange>) {
        *self.blocked.borrow_mut() = Some(callback);
    }

    fn set_callbacks(
        &self,
        on_success: Callback<Rc<dyn RawDatabase>>,
        on_error: Callback<DbError>,
    ) {
        self.result.set_callbacks(on_success, on_error);
    }
}

#[derive(Default)]
pub(crate) struct MemDeleteRequest {
    blocked: RefCell<Option<Callback<VersionChange>>>,
    result: MemRequest<()>,
}

impl MemDeleteRequest {
    pub(crate) fn blocked(&self, change: VersionChange) {
        fire(&self.blocked, change);
    }

    pub(crate) fn succeed(&self) {
        self.result.succeed(());
    }
}

impl RawDeleteRequest for MemDeleteRequest {
    fn set_on_blocked(&self, callback: Callback<VersionChange>) {
        *self.blocked.borrow_mut() = Some(callback);
    }

    fn set_callbacks(&self, on_success: Callback<()>, on_error: Callback<DbError>) {
        self.result.set_callbacks(on_success, on_error);
    }
}

// ============================================================================
// Connection and transaction
// ============================================================================

pub(crate) struct MemDatabase {
    engine: Rc<Engine>,
    conn: Rc<ConnShared>,
}

impl MemDatabase {
    pub(crate) fn new(engine: Rc<Engine>, conn: Rc<ConnShared>) -> Self {
        Self { engine, conn }
    }

    /// The running upgrade transaction, if it is active.
    fn upgrade_tx(&self) -> Result<Rc<TxShared>> {
        let tx = self.conn.upgrade.borrow().clone().ok_or_else(|| {
            DbError::InvalidState("not inside a version change transaction".into())
        })?;
        check_active(&tx)?;
        Ok(tx)
    }
}

impl RawDatabase for MemDatabase {
    fn name(&self) -> String {
        self.conn.name.clone()
    }

    fn version(&self) -> u32 {
        self.conn.version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.engine
            .read(&self.conn.name, |db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(
        &self,
        names: &[String],
        mode: TransactionMode,
    ) -> Result<Rc<dyn RawTransaction>> {
        if self.conn.close_pending.get() {
            return Err(DbError::InvalidState("connection is closing".into()));
        }
        if self.conn.upgrade.borrow().is_some() {
            return Err(DbError::InvalidState(
                "a version change transaction is running".into(),
            ));
        }
        if mode == TransactionMode::VersionChange {
            return Err(DbError::InvalidAccess(
                "version change transactions cannot be created directly".into(),
            ));
        }
        if names.is_empty() {
            return Err(DbError::InvalidAccess("transaction scope is empty".into()));
        }
        let existing = self.object_store_names();
        if let Some(missing) = names.iter().find(|name| !existing.contains(name)) {
            return Err(DbError::NotFound(format!("no object store named {}", missing)));
        }

        let mut scope = names.to_vec();
        scope.sort();
        scope.dedup();
        let tx = self.engine.begin(&self.conn, scope, mode);
        Ok(Rc::new(MemTransaction::new(self.engine.clone(), tx)))
    }

    fn close(&self) {
        self.engine.close(&self.conn);
    }

    fn create_object_store(
        &self,
        name: &str,
        params: &StoreParameters,
    ) -> Result<Rc<dyn RawStore>> {
        let tx = self.upgrade_tx()?;
        if let Some(path) = &params.key_path {
            if !path.is_valid() {
                return Err(DbError::Data(format!("{} is not a valid key path", path)));
            }
            let generated_unusable = match path {
                KeyPath::Single(single) => single.is_empty(),
                KeyPath::Compound(_) => true,
            };
            if params.auto_increment && generated_unusable {
                return Err(DbError::InvalidAccess(format!(
                    "a key generator cannot be used with key path {}",
                    path
                )));
            }
        }

        self.engine.write(&self.conn.name, |db| {
            if db.stores.contains_key(name) {
                return Err(DbError::Constraint(format!(
                    "object store {} already exists",
                    name
                )));
            }
            db.stores.insert(
                name.to_string(),
                StoreData::new(params.key_path.clone(), params.auto_increment),
            );
            Ok(())
        })?;
        Ok(Rc::new(MemStore::new(self.engine.clone(), tx, name)))
    }

    fn delete_object_store(&self, name: &str) -> Result<()> {
        self.upgrade_tx()?;
        self.engine.write(&self.conn.name, |db| {
            db.stores
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| DbError::NotFound(format!("no object store named {}", name)))
        })
    }

    fn set_on_version_change(&self, callback: Option<Callback<VersionChange>>) {
        *self.conn.on_version_change.borrow_mut() = callback;
    }

    fn set_on_close(&self, callback: Option<Callback<()>>) {
        *self.conn.on_close.borrow_mut() = callback;
    }
}

pub(crate) struct MemTransaction {
    engine: Rc<Engine>,
    tx: Rc<TxShared>,
}

impl MemTransaction {
    pub(crate) fn new(engine: Rc<Engine>, tx: Rc<TxShared>) -> Self {
        Self { engine, tx }
    }
}

impl RawTransaction for MemTransaction {
    fn mode(&self) -> TransactionMode {
        self.tx.mode
    }

    fn object_store_names(&self) -> Vec<String> {
        if self.tx.mode == TransactionMode::VersionChange {
            return self
                .engine
                .read(&self.tx.conn.name, |db| db.stores.keys().cloned().collect())
                .unwrap_or_default();
        }
        self.tx.scope.clone()
    }

    fn object_store(&self, name: &str) -> Result<Rc<dyn RawStore>> {
        check_open(&self.tx)?;
        if !self.object_store_names().iter().any(|scoped| scoped == name) {
            return Err(DbError::NotFound(format!(
                "object store {} is not in this transaction's scope",
                name
            )));
        }
        Ok(Rc::new(MemStore::new(self.engine.clone(), self.tx.clone(), name)))
    }

    fn error(&self) -> Option<DbError> {
        self.tx.error.borrow().clone()
    }

    fn abort(&self) -> Result<()> {
        check_open(&self.tx)?;
        self.engine
            .abort(&self.tx, DbError::Abort("transaction was aborted".into()));
        Ok(())
    }

    fn set_on_complete(&self, callback: Callback<()>) {
        *self.tx.on_complete.borrow_mut() = Some(callback);
    }

    fn set_on_abort(&self, callback: Callback<DbError>) {
        *self.tx.on_abort.borrow_mut() = Some(callback);
    }

    fn set_on_error(&self, callback: Callback<DbError>) {
        *self.tx.on_error.borrow_mut() = Some(callback);
    }
}

// ============================================================================
// Stores, indexes and cursors
// ============================================================================

/// Read requests over one store or index.
struct Reader {
    engine: Rc<Engine>,
    tx: Rc<TxShared>,
    source: Source,
}

impl Reader {
    fn check(&self) -> Result<()> {
        check_active(&self.tx)?;
        self.engine
            .read(&self.tx.conn.name, |db| db.entries(&self.source).map(|_| ()))
            .unwrap_or_else(|| Err(DbError::InvalidState("database was deleted".into())))
    }

    fn queue<T: 'static>(
        &self,
        writes: Option<String>,
        run: impl FnOnce(&mut StoredDb, &Source) -> Result<T> + 'static,
    ) -> Rc<MemRequest<T>> {
        let request = Rc::new(MemRequest::default());
        let (on_success, on_error) = (request.clone(), request.clone());
        let source = self.source.clone();
        self.engine.enqueue(
            &self.tx,
            Op {
                writes,
                run: Box::new(move |db: &mut StoredDb| -> Result<Deliver> {
                    let value = run(db, &source)?;
                    Ok(deliver(move || on_success.succeed(value)))
                }),
                fail: Box::new(move |err| on_error.fail(err)),
            },
        );
        request
    }

    fn get(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Value>>>> {
        self.check()?;
        require_key(query)?;
        let query = query.clone();
        Ok(self.queue(None, move |db, source| {
            let first = db.matching(source, &query)?.into_iter().next();
            Ok(first.and_then(|(_, primary)| db.value(source, &primary)))
        }))
    }

    fn get_key(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Key>>>> {
        self.check()?;
        require_key(query)?;
        let query = query.clone();
        Ok(self.queue(None, move |db, source| {
            let first = db.matching(source, &query)?.into_iter().next();
            Ok(first.map(|(_, primary)| primary))
        }))
    }

    fn get_all(
        &self,
        query: &Query,
        count: Option<u32>,
    ) -> Result<Rc<dyn RawRequest<Vec<Value>>>> {
        self.check()?;
        query.validate()?;
        let query = query.clone();
        Ok(self.queue(None, move |db, source| {
            let entries = db.matching(source, &query)?;
            Ok(limit(entries, count)
                .filter_map(|(_, primary)| db.value(source, &primary))
                .collect())
        }))
    }

    fn get_all_keys(
        &self,
        query: &Query,
        count: Option<u32>,
    ) -> Result<Rc<dyn RawRequest<Vec<Key>>>> {
        self.check()?;
        query.validate()?;
        let query = query.clone();
        Ok(self.queue(None, move |db, source| {
            let entries = db.matching(source, &query)?;
            Ok(limit(entries, count).map(|(_, primary)| primary).collect())
        }))
    }

    fn count(&self, query: &Query) -> Result<Rc<dyn RawRequest<u64>>> {
        self.check()?;
        query.validate()?;
        let query = query.clone();
        Ok(self.queue(None, move |db, source| {
            Ok(db.matching(source, &query)?.len() as u64)
        }))
    }

    fn open_cursor(
        &self,
        query: &Query,
        direction: Direction,
        key_only: bool,
    ) -> Result<CursorRequest> {
        self.check()?;
        query.validate()?;

        let request: Rc<MemRequest<Option<Rc<dyn RawCursor>>>> =
            Rc::new(MemRequest::default());
        let on_error = request.clone();
        let cursor = CursorSeed {
            engine: self.engine.clone(),
            tx: self.tx.clone(),
            source: self.source.clone(),
            query: query.clone(),
            direction,
            key_only,
            request: request.clone(),
        };
        self.engine.enqueue(
            &self.tx,
            Op {
                writes: None,
                run: Box::new(move |db: &mut StoredDb| -> Result<Deliver> {
                    let entries = db.entries(&cursor.source)?;
                    let first = seek(&entries, &cursor.query, direction, None, None);
                    let value = cursor.value_at(db, first.as_ref());
                    Ok(deliver(move || cursor.deliver_first(first, value)))
                }),
                fail: Box::new(move |err| on_error.fail(err)),
            },
        );
        Ok(request)
    }
}

fn limit(entries: Vec<(Key, Key)>, count: Option<u32>) -> impl Iterator<Item = (Key, Key)> {
    let take = match count {
        Some(0) | None => usize::MAX,
        Some(n) => n as usize,
    };
    entries.into_iter().take(take)
}

pub(crate) struct MemStore {
    reader: Reader,
    name: String,
}

impl MemStore {
    fn new(engine: Rc<Engine>, tx: Rc<TxShared>, name: &str) -> Self {
        Self {
            reader: Reader {
                engine,
                tx,
                source: Source::Store(name.to_string()),
            },
            name: name.to_string(),
        }
    }

    fn with_store<R>(&self, f: impl FnOnce(&StoreData) -> R) -> Result<R> {
        self.reader
            .engine
            .read(&self.reader.tx.conn.name, |db| db.store(&self.name).map(f))
            .unwrap_or_else(|| Err(DbError::InvalidState("database was deleted".into())))
    }

    fn check_write(&self) -> Result<()> {
        check_active(&self.reader.tx)?;
        if !self.reader.tx.mode.can_write() {
            return Err(DbError::ReadOnly(format!(
                "cannot write to {} in a readonly transaction",
                self.name
            )));
        }
        self.with_store(|_| ())
    }

    fn check_schema_change(&self) -> Result<()> {
        if self.reader.tx.mode != TransactionMode::VersionChange {
            return Err(DbError::InvalidState(
                "indexes can only change inside a version change transaction".into(),
            ));
        }
        check_active(&self.reader.tx)
    }

    fn write(
        &self,
        value: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> Result<Rc<dyn RawRequest<Key>>> {
        self.check_write()?;
        self.with_store(|store| store.check_write(&value, key.as_ref()))??;
        let name = self.name.clone();
        Ok(self.reader.queue(Some(self.name.clone()), move |db, _| {
            db.store_mut(&name)?.write(value, key, overwrite)
        }))
    }

    fn index_handle(&self, name: &str) -> MemIndex {
        MemIndex {
            reader: Reader {
                engine: self.reader.engine.clone(),
                tx: self.reader.tx.clone(),
                source: Source::Index {
                    store: self.name.clone(),
                    index: name.to_string(),
                },
            },
            name: name.to_string(),
        }
    }
}

impl RawSource for MemStore {
    fn get(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Value>>>> {
        self.reader.get(query)
    }

    fn get_key(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Key>>>> {
        self.reader.get_key(query)
    }

    fn get_all(
        &self,
        query: &Query,
        count: Option<u32>,
    ) -> Result<Rc<dyn RawRequest<Vec<Value>>>> {
        self.reader.get_all(query, count)
    }

    fn get_all_keys(
        &self,
        query: &Query,
        count: Option<u32>,
    ) -> Result<Rc<dyn RawRequest<Vec<Key>>>> {
        self.reader.get_all_keys(query, count)
    }

    fn count(&self, query: &Query) -> Result<Rc<dyn RawRequest<u64>>> {
        self.reader.count(query)
    }

    fn open_cursor(&self, query: &Query, direction: Direction) -> Result<CursorRequest> {
        self.reader.open_cursor(query, direction, false)
    }

    fn open_key_cursor(&self, query: &Query, direction: Direction) -> Result<CursorRequest> {
        self.reader.open_cursor(query, direction, true)
    }
}

impl RawStore for MemStore {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.with_store(|store| store.key_path.clone()).ok().flatten()
    }

    fn auto_increment(&self) -> bool {
        self.with_store(|store| store.auto_increment).unwrap_or(false)
    }

    fn index_names(&self) -> Vec<String> {
        self.with_store(|store| store.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn add(&self, value: Value, key: Option<Key>) -> Result<Rc<dyn RawRequest<Key>>> {
        self.write(value, key, false)
    }

    fn put(&self, value: Value, key: Option<Key>) -> Result<Rc<dyn RawRequest<Key>>> {
        self.write(value, key, true)
    }

    fn delete(&self, query: &Query) -> Result<Rc<dyn RawRequest<()>>> {
        self.check_write()?;
        require_key(query)?;
        let (name, query) = (self.name.clone(), query.clone());
        Ok(self.reader.queue(Some(self.name.clone()), move |db, _| {
            db.store_mut(&name)?.delete(&query);
            Ok(())
        }))
    }

    fn clear(&self) -> Result<Rc<dyn RawRequest<()>>> {
        self.check_write()?;
        let name = self.name.clone();
        Ok(self.reader.queue(Some(self.name.clone()), move |db, _| {
            db.store_mut(&name)?.records.clear();
            Ok(())
        }))
    }

    fn index(&self, name: &str) -> Result<Rc<dyn RawIndex>> {
        check_open(&self.reader.tx)?;
        if !self.with_store(|store| store.indexes.contains_key(name))? {
            return Err(DbError::NotFound(format!(
                "object store {} has no index named {}",
                self.name, name
            )));
        }
        Ok(Rc::new(self.index_handle(name)))
    }

    fn create_index(
        &self,
        name: &str,
        key_path: &KeyPath,
        params: &IndexParameters,
    ) -> Result<Rc<dyn RawIndex>> {
        self.check_schema_change()?;
        if !key_path.is_valid() {
            return Err(DbError::Data(format!("{} is not a valid key path", key_path)));
        }
        if params.multi_entry && matches!(key_path, KeyPath::Compound(_)) {
            return Err(DbError::InvalidAccess(
                "a multi-entry index cannot use a compound key path".into(),
            ));
        }

        let meta = IndexMeta {
            key_path: key_path.clone(),
            unique: params.unique,
            multi_entry: params.multi_entry,
        };
        self.reader.engine.write(&self.reader.tx.conn.name, |db| {
            let store = db.store_mut(&self.name)?;
            if store.indexes.contains_key(name) {
                return Err(DbError::Constraint(format!(
                    "index {} already exists on {}",
                    name, self.name
                )));
            }
            store.check_new_index(name, &meta)?;
            store.indexes.insert(name.to_string(), meta);
            Ok(())
        })?;
        Ok(Rc::new(self.index_handle(name)))
    }

    fn delete_index(&self, name: &str) -> Result<()> {
        self.check_schema_change()?;
        self.reader.engine.write(&self.reader.tx.conn.name, |db| {
            db.store_mut(&self.name)?
                .indexes
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| DbError::NotFound(format!("no index named {}", name)))
        })
    }
}

pub(crate) struct MemIndex {
    reader: Reader,
    name: String,
}

impl MemIndex {
    fn meta<R>(&self, f: impl FnOnce(&IndexMeta) -> R) -> Option<R> {
        let store = self.reader.source.store_name();
        self.reader
            .engine
            .read(&self.reader.tx.conn.name, |db| {
                db.stores
                    .get(store)
                    .and_then(|data| data.indexes.get(&self.name))
                    .map(f)
            })
            .flatten()
    }
}

impl RawSource for MemIndex {
    fn get(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Value>>>> {
        self.reader.get(query)
    }

    fn get_key(&self, query: &Query) -> Result<Rc<dyn RawRequest<Option<Key>>>> {
        self.reader.get_key(query)
    }

    fn get_all(
        &self,
        query: &Query,
        count: Option<u32>,
    ) -> Result<Rc<dyn RawRequest<Vec<Value>>>> {
        self.reader.get_all(query, count)
    }

    fn get_all_keys(
        &self,
        query: &Query,
        count: Option<u32>,
    ) -> Result<Rc<dyn RawRequest<Vec<Key>>>> {
        self.reader.get_all_keys(query, count)
    }

    fn count(&self, query: &Query) -> Result<Rc<dyn RawRequest<u64>>> {
        self.reader.count(query)
    }

    fn open_cursor(&self, query: &Query, direction: Direction) -> Result<CursorRequest> {
        self.reader.open_cursor(query, direction, false)
    }

    fn open_key_cursor(&self, query: &Query, direction: Direction) -> Result<CursorRequest> {
        self.reader.open_cursor(query, direction, true)
    }
}

impl RawIndex for MemIndex {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> KeyPath {
        self.meta(|meta| meta.key_path.clone())
            .unwrap_or_else(|| KeyPath::Single(self.name.clone()))
    }

    fn unique(&self) -> bool {
        self.meta(|meta| meta.unique).unwrap_or(false)
    }

    fn multi_entry(&self) -> bool {
        self.meta(|meta| meta.multi_entry).unwrap_or(false)
    }
}

/// Everything a cursor needs before its first position is known.
struct CursorSeed {
    engine: Rc<Engine>,
    tx: Rc<TxShared>,
    source: Source,
    query: Query,
    direction: Direction,
    key_only: bool,
    request: Rc<MemRequest<Option<Rc<dyn RawCursor>>>>,
}

impl CursorSeed {
    fn value_at(&self, db: &StoredDb, position: Option<&(Key, Key)>) -> Option<Value> {
        match position {
            Some((_, primary)) if !self.key_only => db.value(&self.source, primary),
            _ => None,
        }
    }

    fn deliver_first(self, first: Option<(Key, Key)>, value: Option<Value>) {
        let Some(position) = first else {
            self.request.succeed(None);
            return;
        };
        let request = self.request.clone();
        let cursor = Rc::new_cyclic(|this| MemCursor {
            this: this.clone(),
            seed: self,
            position: RefCell::new(position),
            value: RefCell::new(value),
            moving: Cell::new(false),
            done: Cell::new(false),
        });
        request.succeed(Some(cursor));
    }
}

pub(crate) struct MemCursor {
    this: Weak<MemCursor>,
    seed: CursorSeed,
    position: RefCell<(Key, Key)>,
    value: RefCell<Option<Value>>,
    moving: Cell<bool>,
    done: Cell<bool>,
}

impl MemCursor {
    fn check_settled(&self) -> Result<()> {
        check_active(&self.seed.tx)?;
        if self.moving.get() {
            return Err(DbError::InvalidState("cursor is already moving".into()));
        }
        if self.done.get() {
            return Err(DbError::InvalidState("cursor is past the end of its range".into()));
        }
        Ok(())
    }

    fn start_move(&self, steps: u32, target: Option<Key>) -> Result<()> {
        self.check_settled()?;
        let cursor = self
            .this
            .upgrade()
            .ok_or_else(|| DbError::InvalidState("cursor was dropped".into()))?;
        self.moving.set(true);

        let on_error = self.seed.request.clone();
        self.seed.engine.enqueue(
            &self.seed.tx,
            Op {
                writes: None,
                run: Box::new(move |db: &mut StoredDb| -> Result<Deliver> {
                    let entries = db.entries(&cursor.seed.source)?;
                    let mut at = Some(cursor.position.borrow().clone());
                    for step in 0..steps {
                        let target = if step == 0 { target.as_ref() } else { None };
                        at = seek(
                            &entries,
                            &cursor.seed.query,
                            cursor.seed.direction,
                            at.as_ref(),
                            target,
                        );
                        if at.is_none() {
                            break;
                        }
                    }
                    let value = cursor.seed.value_at(db, at.as_ref());
                    Ok(deliver(move || cursor.arrive(at, value)))
                }),
                fail: Box::new(move |err| on_error.fail(err)),
            },
        );
        Ok(())
    }

    fn arrive(self: Rc<Self>, at: Option<(Key, Key)>, value: Option<Value>) {
        self.moving.set(false);
        let request = self.seed.request.clone();
        match at {
            Some(position) => {
                *self.position.borrow_mut() = position;
                *self.value.borrow_mut() = value;
                request.succeed(Some(self));
            }
            None => {
                self.done.set(true);
                request.succeed(None);
            }
        }
    }

    /// Primary key and store name for a write at the current position.
    fn write_target(&self) -> Result<(Key, String)> {
        self.check_settled()?;
        if !self.seed.tx.mode.can_write() {
            return Err(DbError::ReadOnly(
                "cannot write through a cursor in a readonly transaction".into(),
            ));
        }
        if self.seed.key_only {
            return Err(DbError::InvalidState("key cursors cannot write".into()));
        }
        Ok((
            self.position.borrow().1.clone(),
            self.seed.source.store_name().to_string(),
        ))
    }

    fn queue_write<T: 'static>(
        &self,
        store: String,
        run: impl FnOnce(&mut StoreData) -> Result<T> + 'static,
    ) -> Rc<MemRequest<T>> {
        let reader = Reader {
            engine: self.seed.engine.clone(),
            tx: self.seed.tx.clone(),
            source: Source::Store(store.clone()),
        };
        reader.queue(Some(store.clone()), move |db, _| run(db.store_mut(&store)?))
    }
}

impl RawCursor for MemCursor {
    fn key(&self) -> Key {
        self.position.borrow().0.clone()
    }

    fn primary_key(&self) -> Key {
        self.position.borrow().1.clone()
    }

    fn value(&self) -> Option<Value> {
        self.value.borrow().clone()
    }

    fn direction(&self) -> Direction {
        self.seed.direction
    }

    fn advance(&self, count: u32) -> Result<()> {
        if count == 0 {
            return Err(DbError::InvalidAccess("advance count must be positive".into()));
        }
        self.start_move(count, None)
    }

    fn continue_(&self, key: Option<&Key>) -> Result<()> {
        if let Some(key) = key {
            key.validate()?;
            let current = self.key();
            let behind = if self.seed.direction.is_reverse() {
                *key >= current
            } else {
                *key <= current
            };
            if behind {
                return Err(DbError::Data(format!(
                    "{} is not past the cursor position {}",
                    key, current
                )));
            }
        }
        self.start_move(1, key.cloned())
    }

    fn update(&self, value: Value) -> Result<Rc<dyn RawRequest<Key>>> {
        let (primary, store) = self.write_target()?;
        let inline = self
            .seed
            .engine
            .read(&self.seed.tx.conn.name, |db| {
                db.store(&store).map(|data| data.key_path.clone())
            })
            .unwrap_or_else(|| Err(DbError::InvalidState("database was deleted".into())))?;
        if let Some(path) = &inline {
            if path.extract(&value)?.as_ref() != Some(&primary) {
                return Err(DbError::Data(
                    "the updated record must keep its key".into(),
                ));
            }
        }

        Ok(self.queue_write(store, move |data| {
            let key = if data.key_path.is_some() {
                None
            } else {
                Some(primary)
            };
            data.write(value, key, true)
        }))
    }

    fn delete(&self) -> Result<Rc<dyn RawRequest<()>>> {
        let (primary, store) = self.write_target()?;
        Ok(self.queue_write(store, move |data| {
            data.records.remove(&primary);
            Ok(())
        }))
    }
}
