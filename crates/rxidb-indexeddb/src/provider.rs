//! The browser's `IDBFactory` as an rxidb provider

use std::fmt;
use std::rc::Rc;

use rxidb_core::provider::{Provider, RawDeleteRequest, RawOpenRequest};
use rxidb_core::Result;
use tracing::debug;
use web_sys::IdbFactory;

use crate::database::{IdbDeleteRequest, IdbOpenRequest};
use crate::error::dom_error;
use crate::idb;

/// Provider backed by an `IDBFactory`.
#[derive(Clone)]
pub struct IndexedDbProvider {
    factory: IdbFactory,
}

impl IndexedDbProvider {
    /// The global `indexedDB` of the window or worker.
    ///
    /// Fails with [`rxidb_core::DbError::NotAvailable`] outside a browser
    /// or where storage is disabled.
    pub fn global() -> Result<Self> {
        Ok(Self::new(idb::idb_factory()?))
    }

    pub fn new(factory: IdbFactory) -> Self {
        Self { factory }
    }

    /// This provider as the trait object `OpenConfig` takes.
    pub fn provider(&self) -> Rc<dyn Provider> {
        Rc::new(self.clone())
    }
}

impl Provider for IndexedDbProvider {
    fn open(&self, name: &str, version: u32) -> Result<Rc<dyn RawOpenRequest>> {
        debug!(db = %name, version, "indexedDB.open");
        let request = self
            .factory
            .open_with_u32(name, version)
            .map_err(dom_error)?;
        Ok(Rc::new(IdbOpenRequest::new(request)))
    }

    fn delete_database(&self, name: &str) -> Result<Rc<dyn RawDeleteRequest>> {
        debug!(db = %name, "indexedDB.deleteDatabase");
        let request = self.factory.delete_database(name).map_err(dom_error)?;
        Ok(Rc::new(IdbDeleteRequest::new(request)))
    }
}

impl fmt::Debug for IndexedDbProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedDbProvider").finish_non_exhaustive()
    }
}
