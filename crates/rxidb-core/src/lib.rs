//! rxidb core
//!
//! A stream façade over IndexedDB-style transactional key-value stores.
//! Every store operation is a cold [`Request`] that issues exactly one host
//! request when first polled. Connections, transactions, stores, indexes and
//! cursors are thin handles over the [`provider`] protocol, which the host
//! implements once.
//!
//! Two providers exist: [`MemoryProvider`] in this crate, which reproduces
//! the host event loop for native use and tests, and the web-sys bindings in
//! `rxidb-indexeddb`.
//!
//! # Example
//!
//! ```rust
//! use rxidb_core::{open, MemoryProvider, OpenConfig, SchemaVersion, StoreDefinition};
//! use rxidb_core::TransactionMode;
//! use serde_json::json;
//!
//! let memory = MemoryProvider::new();
//! let config = OpenConfig::new("notes", memory.provider())
//!     .version(SchemaVersion::new(1).store(StoreDefinition::new("notes").key_path("id")));
//!
//! memory.block_on(async {
//!     let db = open(config).await?;
//!     let tx = db.transaction(&["notes"], TransactionMode::ReadWrite)?;
//!     let notes = tx.object_store("notes")?;
//!
//!     notes.put(json!({"id": 1, "body": "hello"}), None).await?;
//!     let note = notes.get(1).await?;
//!     assert_eq!(note, Some(json!({"id": 1, "body": "hello"})));
//!     Ok::<_, rxidb_core::DbError>(())
//! })?;
//! # Ok::<(), rxidb_core::DbError>(())
//! ```

pub mod codec;
pub mod config;
pub mod cursor;
pub mod database;
pub mod error;
pub mod event;
pub mod factory;
pub mod index;
pub mod key;
pub mod memory;
pub mod provider;
pub mod request;
pub mod schema;
pub mod store;
pub mod transaction;

mod source;

// Re-export main types at crate root
pub use codec::{Codec, FnCodec, Identity, Json};
pub use config::{BlockedHook, ConfigDocument, OpenConfig, UpgradeHook};
pub use cursor::{Cursor, CursorStream};
pub use database::Database;
pub use error::{DbError, Result};
pub use event::{
    DatabaseEvent, DatabaseEventKind, EventBus, ListenerId, TransactionEvent,
    TransactionEventKind,
};
pub use factory::{delete_database, open};
pub use index::Index;
pub use key::{Direction, Key, KeyPath, KeyRange, Query, TransactionMode};
pub use memory::MemoryProvider;
pub use provider::{Provider, VersionChange};
pub use request::{Request, Responder};
pub use schema::{IndexDefinition, SchemaVersion, StoreDefinition};
pub use store::ObjectStore;
pub use transaction::{Completion, Transaction, TransactionStream};
