//! Browser IndexedDB provider for rxidb (wasm32)
//!
//! Binds the platform `IDBFactory` through `web-sys` and implements every
//! `rxidb_core::provider` trait over it, so the stream façade in
//! `rxidb-core` runs unchanged against the browser's store.
//!
//! Record values cross the JS boundary as JSON. Keys map onto their native
//! JS forms: numbers, `Date`, strings, `Uint8Array` and arrays.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use rxidb_core::{open, OpenConfig, SchemaVersion, StoreDefinition, TransactionMode};
//! use rxidb_indexeddb::IndexedDbProvider;
//!
//! let provider = Rc::new(IndexedDbProvider::global()?);
//! let config = OpenConfig::new("notes", provider)
//!     .version(SchemaVersion::new(1).store(StoreDefinition::new("notes").key_path("id")));
//!
//! let db = open(config).await?;
//! let tx = db.transaction(&["notes"], TransactionMode::ReadWrite)?;
//! tx.object_store("notes")?.put(serde_json::json!({"id": 1}), None).await?;
//! ```

pub mod convert;
pub mod error;
pub mod provider;

mod cursor;
mod database;
mod idb;
mod request;
mod source;
mod transaction;

pub use error::dom_error;
pub use provider::IndexedDbProvider;
