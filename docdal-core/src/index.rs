//! Index specifications ensured before inserts.

use serde::{Deserialize, Serialize};

use crate::query::SortKey;

/// Describes an index to ensure on a collection.
///
/// The default index is a unique, sparse, background-built, duplicate-dropping
/// descending index on `create_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Indexed keys, in order.
    pub keys: Vec<SortKey>,
    /// Reject documents whose key values collide with an existing document.
    pub unique: bool,
    /// Skip documents that have none of the indexed fields.
    pub sparse: bool,
    /// Build the index without blocking the collection.
    pub background: bool,
    /// Drop documents that collide while a unique index is being built.
    pub drop_duplicates: bool,
}

impl IndexSpec {
    /// Creates a spec over `keys` with the default options.
    pub fn for_keys<K: Into<SortKey>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets whether the index enforces uniqueness.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Sets whether the index is sparse.
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Sets whether the index is built in the background.
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Sets whether colliding documents are dropped while building a unique index.
    pub fn drop_duplicates(mut self, drop_duplicates: bool) -> Self {
        self.drop_duplicates = drop_duplicates;
        self
    }

    /// Returns the key field names, in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|key| key.field.as_str())
    }
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self {
            keys: vec![SortKey::newest_first()],
            unique: true,
            sparse: true,
            background: true,
            drop_duplicates: true,
        }
    }
}
