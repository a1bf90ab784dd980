//! Connection configuration
//!
//! `OpenConfig` collects what the factory needs to open a database. The
//! store provider is always passed explicitly; there is no process-wide
//! default.

use std::fmt;
use std::rc::Rc;

use serde::Deserialize;

use crate::database::Database;
use crate::error::Result;
use crate::provider::{Provider, VersionChange};
use crate::schema::SchemaVersion;
use crate::transaction::Transaction;

/// Custom migration step: `(db, old_version, new_version, upgrade_tx)`.
///
/// Runs after the declarative schema has been applied. Returning `Err`
/// aborts the upgrade. The hook is synchronous: schema changes go through
/// [`Database::create_object_store`] and [`crate::ObjectStore::create_index`],
/// and record writes must be sent with [`crate::Request::issue`] before the
/// hook returns.
pub type UpgradeHook = Box<dyn FnMut(&Database, u32, u32, &Transaction) -> Result<()>>;

/// Called when the open waits on other connections to close.
pub type BlockedHook = Box<dyn FnMut(&VersionChange)>;

/// Serialized form of the declarative part of an [`OpenConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default)]
    pub schema: Vec<SchemaVersion>,
    #[serde(default = "default_auto_close")]
    pub auto_close_on_version_change: bool,
}

fn default_auto_close() -> bool {
    true
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            schema: Vec::new(),
            auto_close_on_version_change: default_auto_close(),
        }
    }
}

/// Everything needed to open a database.
pub struct OpenConfig {
    pub(crate) name: String,
    pub(crate) provider: Rc<dyn Provider>,
    pub(crate) schema: Vec<SchemaVersion>,
    pub(crate) on_upgrade: Option<UpgradeHook>,
    pub(crate) on_blocked: Option<BlockedHook>,
    pub(crate) auto_close_on_version_change: bool,
}

impl OpenConfig {
    pub fn new(name: impl Into<String>, provider: Rc<dyn Provider>) -> Self {
        Self {
            name: name.into(),
            provider,
            schema: Vec::new(),
            on_upgrade: None,
            on_blocked: None,
            auto_close_on_version_change: true,
        }
    }

    /// Build from a JSON document such as
    /// `{"schema": [{"version": 1, "stores": [{"name": "s"}]}]}`.
    pub fn from_json(
        name: impl Into<String>,
        provider: Rc<dyn Provider>,
        json: &str,
    ) -> Result<Self> {
        let document: ConfigDocument = serde_json::from_str(json)?;
        Ok(Self::new(name, provider)
            .schema(document.schema)
            .auto_close_on_version_change(document.auto_close_on_version_change))
    }

    /// Replace the schema.
    pub fn schema(mut self, schema: Vec<SchemaVersion>) -> Self {
        self.schema = schema;
        self
    }

    /// Append one schema entry.
    pub fn version(mut self, entry: SchemaVersion) -> Self {
        self.schema.push(entry);
        self
    }

    pub fn on_upgrade(
        mut self,
        hook: impl FnMut(&Database, u32, u32, &Transaction) -> Result<()> + 'static,
    ) -> Self {
        self.on_upgrade = Some(Box::new(hook));
        self
    }

    pub fn on_blocked(mut self, hook: impl FnMut(&VersionChange) + 'static) -> Self {
        self.on_blocked = Some(Box::new(hook));
        self
    }

    pub fn auto_close_on_version_change(mut self, enabled: bool) -> Self {
        self.auto_close_on_version_change = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version the database will be opened at.
    pub fn target_version(&self) -> u32 {
        crate::schema::target_version(&self.schema)
    }
}

impl fmt::Debug for OpenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenConfig")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("on_upgrade", &self.on_upgrade.is_some())
            .field("on_blocked", &self.on_blocked.is_some())
            .field(
                "auto_close_on_version_change",
                &self.auto_close_on_version_change,
            )
            .finish()
    }
}
