//! MongoDB backend implementation for docdal.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait on top
//! of the official async driver. Filters, updates and aggregation pipelines go to the
//! server verbatim; atomic changes use the `findAndModify` command and blobs live in
//! GridFS buckets.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docdal = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! The builder takes a MongoDB connection string and a database name. The pool
//! configuration bounds both docdal's checkout and the driver's own connection pool.
//!
//! # Example
//!
//! ```ignore
//! use docdal::{backend::StoreBackendBuilder, config::PoolConfig, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .pool(PoolConfig::default().max_size(20))
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod query;
pub mod sanitizer;
pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
