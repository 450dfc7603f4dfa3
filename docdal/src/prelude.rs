//! Convenient re-exports of commonly used types from docdal.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docdal::prelude::*;
//! ```

pub use docdal_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    blob::BlobStore,
    collection::{Collection, FindQuery, TypedCollection},
    config::{PoolConfig, StoreConfig},
    document::{Document, DocumentExt},
    error::{DalError, DalResult},
    index::IndexSpec,
    page::Page,
    query::{FindSpec, SortDirection, SortKey},
    reference::{Reference, resolve_reference, resolve_reference_id, resolve_reference_to},
    selector::{IntoSelector, Selector},
    soft_delete::SoftDeleteMetadata,
    store::DocumentStore,
    update::{Change, ChangeInfo, UpdateSpec, UpsertOutcome},
};
