//! Main docdal crate providing a unified data-access layer for document databases.
//!
//! This crate is the primary entry point for users of docdal. It re-exports the core
//! types from `docdal-core` and provides access to the storage backends.
//!
//! # Features
//!
//! - **Selector polymorphism** - Every targeted operation accepts an identifier or a filter map
//! - **Index-before-write** - Inserts ensure an index first and abort when that fails
//! - **Soft deletes** - Mark documents deleted without removing them
//! - **Pagination** - Lenient offset/limit parsing; invalid paging returns everything
//! - **References** - Rewrite embedded `{ id }` objects into DBRefs
//! - **Blobs** - Store and fetch byte payloads by identifier
//! - **Multiple backends** - In-memory and MongoDB
//!
//! # Quick Start
//!
//! ```ignore
//! use docdal::{prelude::*, memory::InMemoryStore};
//! use bson::{doc, oid::ObjectId};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//! }
//!
//! impl Document for User {
//!     fn collection_name() -> &'static str { "users" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DalResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let users = store.typed_collection::<User>();
//!
//!     users.create(vec![User { id: None, name: "Alice".into() }], vec![]).await?;
//!
//!     let alice = users.find_one(doc! { "name": "Alice" }).await?;
//!     users.update(alice.id, doc! { "name": "Alicia" }).await?;
//!
//!     let page = users
//!         .find_many(doc! {}, Page::parse("0", "20"), vec![SortKey::asc("name")])
//!         .await?;
//!     println!("{page:?}");
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Timeouts
//!
//! A [`StoreConfig`](config::StoreConfig) bounds every operation, connection checkout
//! included:
//!
//! ```ignore
//! use std::time::Duration;
//!
//! let store = DocumentStore::with_config(
//!     backend,
//!     StoreConfig::default().operation_timeout(Duration::from_secs(5)),
//! );
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docdal_core::{
    backend, blob, collection, config, document, error, index, page, pool, query, reference,
    selector, soft_delete, store, update,
};
pub use docdal_core::{document::Document, store::DocumentStore};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docdal_memory::{InMemoryStore, InMemoryStoreBuilder, MemoryConnection, MemoryState};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docdal_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
