//! In-memory document storage backend for docdal.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development
//! and testing.
//!
//! # Features
//!
//! - **Native filters** - `$eq`, `$ne`, `$gt`/`$gte`/`$lt`/`$lte`, `$in`/`$nin`, `$exists`, `$and`/`$or`/`$nor`, dotted paths
//! - **Update operators** - `$set`, `$unset`, `$inc`, `$push`, `$setOnInsert`, and full replacement
//! - **Unique indexes** - Enforced on every write, sparse-aware, with duplicate dropping on build
//! - **Aggregation subset** - `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$count`, `$group`
//! - **Blob buckets** - Byte payloads keyed by ObjectId
//!
//! # Quick Start
//!
//! ```ignore
//! use docdal::{DocumentStore, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!
//!     let users = store.collection("users");
//!     users.create(vec![doc! { "name": "Alice" }], vec![]).await?;
//!     let alice = users.find_one(doc! { "name": "Alice" }).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod evaluator;
pub mod pipeline;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder, MemoryConnection, MemoryState};
