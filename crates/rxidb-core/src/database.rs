//! Connection handle

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::error::{DbError, Result};
use crate::event::{DatabaseEvent, DatabaseEventKind, EventBus, ListenerId};
use crate::key::TransactionMode;
use crate::provider::{Provider, RawDatabase, VersionChange};
use crate::request::Request;
use crate::schema::{self, StoreDefinition};
use crate::transaction::{Transaction, TransactionStream};

/// An open connection to one named, versioned database.
///
/// Cloning shares the connection. Dropping the last handle closes it.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Rc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    raw: Rc<dyn RawDatabase>,
    provider: Rc<dyn Provider>,
    name: String,
    pub(crate) events: EventBus<DatabaseEvent>,
    auto_close: Cell<bool>,
    closed: Cell<bool>,
}

impl Database {
    pub(crate) fn wrap(raw: Rc<dyn RawDatabase>, provider: Rc<dyn Provider>) -> Self {
        let inner = Rc::new(DatabaseInner {
            name: raw.name(),
            raw,
            provider,
            events: EventBus::new(),
            auto_close: Cell::new(false),
            closed: Cell::new(false),
        });

        let weak = Rc::downgrade(&inner);
        inner
            .raw
            .set_on_version_change(Some(Box::new(move |change: VersionChange| {
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.version_change(change);
                }
            })));

        let weak = Rc::downgrade(&inner);
        inner.raw.set_on_close(Some(Box::new(move |()| {
            if let Some(inner) = Weak::upgrade(&weak) {
                debug!(db = %inner.name, "connection closed by the store");
                inner.mark_closed();
            }
        })));

        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> u32 {
        self.inner.raw.version()
    }

    /// Store names in ascending order.
    pub fn object_store_names(&self) -> Vec<String> {
        self.inner.raw.object_store_names()
    }

    /// Close the connection.
    ///
    /// The store finishes running transactions first. New transactions fail
    /// with [`DbError::InvalidState`] from here on.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Create a store with its indexes.
    ///
    /// Only valid inside an upgrade; reach the new store through the upgrade
    /// transaction's [`Transaction::object_store`].
    pub fn create_object_store(&self, definition: &StoreDefinition) -> Result<()> {
        schema::create_store(&*self.inner.raw, definition).map(|_| ())
    }

    /// Only valid inside an upgrade.
    pub fn delete_object_store(&self, name: &str) -> Result<()> {
        debug!(db = %self.inner.name, store = %name, "deleting object store");
        self.inner.raw.delete_object_store(name)
    }

    /// Close automatically when another connection requests a new version.
    pub fn set_auto_close_on_version_change(&self, enabled: bool) {
        self.inner.auto_close.set(enabled);
    }

    /// Start a transaction over `names`.
    ///
    /// All requests must be issued in the current turn, or in a turn where
    /// one of this transaction's results is delivered. Otherwise the store
    /// commits and later requests fail with [`DbError::TransactionInactive`].
    pub fn transaction(&self, names: &[&str], mode: TransactionMode) -> Result<Transaction> {
        if mode == TransactionMode::VersionChange {
            return Err(DbError::InvalidAccess(
                "version-change transactions are created by upgrades only".into(),
            ));
        }
        if self.is_closed() {
            return Err(DbError::InvalidState(format!(
                "connection to {} is closed",
                self.name()
            )));
        }
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        let raw = self.inner.raw.transaction(&names, mode)?;
        Ok(Transaction::wrap(raw, self.clone()))
    }

    /// Stream yielding a new transaction, then ending when it commits.
    ///
    /// Yields the abort reason instead if it aborts. Dropping the stream
    /// before the end aborts the transaction.
    pub fn transaction_stream(&self, names: &[&str], mode: TransactionMode) -> TransactionStream {
        TransactionStream::new(
            self.clone(),
            names.iter().map(|name| name.to_string()).collect(),
            mode,
        )
    }

    /// Listen for one kind of connection event.
    pub fn add_event_listener(
        &self,
        kind: DatabaseEventKind,
        listener: impl Fn(&DatabaseEvent) + 'static,
    ) -> ListenerId {
        self.inner.events.on(move |event| {
            if event.kind() == kind {
                listener(event);
            }
        })
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Close this connection and delete the whole database.
    ///
    /// Fails with [`DbError::Blocked`] if other connections keep the
    /// deletion waiting.
    pub fn clear(&self) -> Request<()> {
        let inner = self.inner.clone();
        Request::new(move |responder| {
            inner.close();
            debug!(db = %inner.name, "deleting database");
            let request = inner.provider.delete_database(&inner.name)?;

            let blocked = responder.clone();
            let name = inner.name.clone();
            request.set_on_blocked(Box::new(move |_| {
                warn!(db = %name, "database deletion blocked by open connections");
                blocked.failure(DbError::Blocked(format!(
                    "deleting {} is blocked by open connections",
                    name
                )));
            }));

            let on_error = responder.clone();
            request.set_callbacks(
                Box::new(move |()| responder.success(())),
                Box::new(move |err| on_error.failure(err)),
            );
            Ok(())
        })
    }
}

impl DatabaseInner {
    fn close(&self) {
        self.raw.close();
        self.mark_closed();
    }

    fn mark_closed(&self) {
        if !self.closed.replace(true) {
            debug!(db = %self.name, "connection closed");
            self.events.emit(&DatabaseEvent::Close);
        }
    }

    fn version_change(&self, change: VersionChange) {
        debug!(
            db = %self.name,
            old = change.old_version,
            new = ?change.new_version,
            "version change requested"
        );
        self.events.emit(&DatabaseEvent::VersionChange {
            old_version: change.old_version,
            new_version: change.new_version,
        });
        if self.auto_close.get() {
            self.close();
        }
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        if !self.closed.get() {
            self.raw.close();
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("version", &self.version())
            .field("closed", &self.is_closed())
            .finish()
    }
}
