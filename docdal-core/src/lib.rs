//! A selector-polymorphic data-access layer for document databases.
//!
//! This crate is the core of the docdal project and provides:
//!
//! - **Selectors** ([`selector`]) - Identifier-or-filter resolution for every targeted operation
//! - **Pagination** ([`page`]) - Offset/limit parsing and validation
//! - **Queries and indexes** ([`query`], [`index`]) - Sort keys, find specs and index specs
//! - **Updates** ([`update`], [`soft_delete`]) - Atomic changes, change summaries and soft-delete metadata
//! - **References** ([`reference`]) - Rewriting embedded references into DBRefs
//! - **Store backend abstraction** ([`backend`]) - The capability set a database must provide
//! - **Connection pooling** ([`pool`]) - Bounded connection checkout with an RAII guard
//! - **Collections and blobs** ([`collection`], [`blob`]) - The CRUD, query, aggregation and blob API
//! - **Document store** ([`store`]) - Main entry point tying a backend to its configuration
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docdal::{Document, DocumentStore};
//! use bson::oid::ObjectId;
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
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//! }
//! ```

pub mod backend;
pub mod blob;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod page;
pub mod pool;
pub mod query;
pub mod reference;
pub mod selector;
pub mod soft_delete;
pub mod store;
pub mod update;
