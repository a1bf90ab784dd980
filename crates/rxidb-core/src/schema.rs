//! Declarative, versioned schema and the upgrade walker
//!
//! A schema is a list of [`SchemaVersion`] entries in any order. On upgrade
//! the walker sorts them by version and applies every entry above the
//! database's previous version, in ascending order. Stores and indexes that
//! already exist are reused, never re-created.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DbError, Result};
use crate::key::KeyPath;
use crate::provider::{
    IndexParameters, RawDatabase, RawIndex, RawStore, RawTransaction, StoreParameters,
};

/// One migration step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub version: u32,
    #[serde(default)]
    pub stores: Vec<StoreDefinition>,
}

impl SchemaVersion {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            stores: Vec::new(),
        }
    }

    pub fn store(mut self, store: StoreDefinition) -> Self {
        self.stores.push(store);
        self
    }
}

/// An object store to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<KeyPath>,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

impl StoreDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }

    pub fn index(mut self, index: impl Into<IndexDefinition>) -> Self {
        self.indexes.push(index.into());
        self
    }

    fn parameters(&self) -> StoreParameters {
        StoreParameters {
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
        }
    }
}

/// An index to create on a store.
///
/// Deserializes from a bare string (used as both name and key path) or
/// from a full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "IndexForm", rename_all = "camelCase")]
pub struct IndexDefinition {
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexDefinition {
    /// Index named `name` over the key path of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key_path: KeyPath::Single(name.clone()),
            name,
            unique: false,
            multi_entry: false,
        }
    }

    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = key_path.into();
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }

    fn parameters(&self) -> IndexParameters {
        IndexParameters {
            unique: self.unique,
            multi_entry: self.multi_entry,
        }
    }
}

impl From<&str> for IndexDefinition {
    fn from(name: &str) -> Self {
        IndexDefinition::new(name)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IndexForm {
    Name(String),
    #[serde(rename_all = "camelCase")]
    Full {
        name: String,
        #[serde(default)]
        key_path: Option<KeyPath>,
        #[serde(default)]
        unique: bool,
        #[serde(default)]
        multi_entry: bool,
    },
}

impl From<IndexForm> for IndexDefinition {
    fn from(form: IndexForm) -> Self {
        match form {
            IndexForm::Name(name) => IndexDefinition::new(name),
            IndexForm::Full {
                name,
                key_path,
                unique,
                multi_entry,
            } => IndexDefinition {
                key_path: key_path.unwrap_or_else(|| KeyPath::Single(name.clone())),
                name,
                unique,
                multi_entry,
            },
        }
    }
}

/// Version to open at: the highest schema version, at least 1.
pub fn target_version(schema: &[SchemaVersion]) -> u32 {
    schema
        .iter()
        .map(|entry| entry.version)
        .max()
        .unwrap_or(1)
        .max(1)
}

/// Entries above `old_version`, in ascending version order.
pub fn pending(schema: &[SchemaVersion], old_version: u32) -> Vec<&SchemaVersion> {
    let mut entries: Vec<&SchemaVersion> = schema
        .iter()
        .filter(|entry| entry.version > old_version)
        .collect();
    entries.sort_by_key(|entry| entry.version);
    entries
}

/// Reject entries the host cannot open at.
pub fn validate(schema: &[SchemaVersion]) -> Result<()> {
    if let Some(entry) = schema.iter().find(|entry| entry.version == 0) {
        return Err(DbError::InvalidAccess(format!(
            "schema version must be positive, got {}",
            entry.version
        )));
    }
    Ok(())
}

/// Apply every pending entry against an in-progress upgrade.
pub(crate) fn apply(
    schema: &[SchemaVersion],
    old_version: u32,
    db: &dyn RawDatabase,
    tx: &dyn RawTransaction,
) -> Result<()> {
    for entry in pending(schema, old_version) {
        debug!(version = entry.version, "applying schema version");
        for definition in &entry.stores {
            if db.object_store_names().contains(&definition.name) {
                let store = tx.object_store(&definition.name)?;
                let existing = store.index_names();
                for index in &definition.indexes {
                    if !existing.contains(&index.name) {
                        create_index(&*store, index)?;
                    }
                }
            } else {
                create_store(db, definition)?;
            }
        }
    }
    Ok(())
}

/// Create `definition` and all of its indexes.
pub(crate) fn create_store(
    db: &dyn RawDatabase,
    definition: &StoreDefinition,
) -> Result<Rc<dyn RawStore>> {
    debug!(store = %definition.name, "creating object store");
    let store = db.create_object_store(&definition.name, &definition.parameters())?;
    for index in &definition.indexes {
        create_index(&*store, index)?;
    }
    Ok(store)
}

pub(crate) fn create_index(
    store: &dyn RawStore,
    definition: &IndexDefinition,
) -> Result<Rc<dyn RawIndex>> {
    debug!(store = %store.name(), index = %definition.name, "creating index");
    store.create_index(&definition.name, &definition.key_path, &definition.parameters())
}
