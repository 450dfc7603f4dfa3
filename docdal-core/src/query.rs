//! Query descriptions handed to storage backends.
//!
//! Filters are native filter documents (see [`Selector`](crate::selector::Selector)).
//! This module adds sort keys and the [`FindSpec`] that bundles a filter with its sort
//! order and pagination.
//!
//! ```ignore
//! use docdal::query::{FindSpec, SortKey};
//! use docdal::page::Page;
//! use bson::doc;
//!
//! let spec = FindSpec::builder()
//!     .filter(doc! { "is_delete": false })
//!     .sort(vec![SortKey::parse("-age"), SortKey::parse("name")])
//!     .page(Page::new(0, 20))
//!     .build();
//! ```

use bson::{Bson, Document as BsonDocument, doc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{document::CREATE_AT, page::Page};

/// Sort direction for query results and index keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The numeric direction used in native sort and index documents.
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// A single sort (or index) key.
///
/// Parsed from the `"field"` / `"-field"` notation, where a leading `-` means descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl SortKey {
    /// Creates an ascending key.
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Asc }
    }

    /// Creates a descending key.
    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Desc }
    }

    /// Parses `"field"` (ascending) or `"-field"` (descending). A leading `+` is accepted
    /// and ignored.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(raw.strip_prefix('+').unwrap_or(raw)),
        }
    }

    /// The default ordering: newest documents first.
    pub fn newest_first() -> Self {
        Self::desc(CREATE_AT)
    }

    /// Renders a list of keys as a native sort/index key document.
    pub fn to_document(keys: &[SortKey]) -> BsonDocument {
        keys.iter()
            .map(|key| (key.field.clone(), Bson::Int32(key.direction.as_i32())))
            .collect()
    }
}

impl From<&str> for SortKey {
    fn from(raw: &str) -> Self {
        SortKey::parse(raw)
    }
}

impl From<String> for SortKey {
    fn from(raw: String) -> Self {
        SortKey::parse(&raw)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Asc => write!(f, "{}", self.field),
            SortDirection::Desc => write!(f, "-{}", self.field),
        }
    }
}

/// A fully-specified find: filter, sort order and page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindSpec {
    /// Native filter document. An empty document matches everything.
    pub filter: BsonDocument,
    /// Sort keys, applied in order.
    pub sort: Vec<SortKey>,
    /// Pagination. Ignored unless valid.
    pub page: Page,
}

impl FindSpec {
    /// Creates a builder with an empty filter, the default sort and no pagination.
    pub fn builder() -> FindSpecBuilder {
        FindSpecBuilder::new()
    }

    /// The native sort document, or `None` when no keys are set.
    pub fn sort_document(&self) -> Option<BsonDocument> {
        (!self.sort.is_empty()).then(|| SortKey::to_document(&self.sort))
    }

    /// A spec selecting at most one document matching `filter`, in natural order.
    pub fn first(filter: BsonDocument) -> Self {
        Self { filter, sort: Vec::new(), page: Page::new(0, 1) }
    }
}

/// Builder for [`FindSpec`].
#[derive(Debug, Clone)]
pub struct FindSpecBuilder {
    spec: FindSpec,
}

impl FindSpecBuilder {
    /// Creates a new builder. Without an explicit sort, results are newest first.
    pub fn new() -> Self {
        Self {
            spec: FindSpec {
                filter: doc! {},
                sort: vec![SortKey::newest_first()],
                page: Page::all(),
            },
        }
    }

    /// Sets the filter document.
    pub fn filter(mut self, filter: BsonDocument) -> Self {
        self.spec.filter = filter;
        self
    }

    /// Sets the sort keys. An empty list keeps the default newest-first ordering.
    pub fn sort(mut self, keys: Vec<SortKey>) -> Self {
        if !keys.is_empty() {
            self.spec.sort = keys;
        }
        self
    }

    /// Sets the page.
    pub fn page(mut self, page: Page) -> Self {
        self.spec.page = page;
        self
    }

    /// Builds and returns the final spec.
    pub fn build(self) -> FindSpec {
        self.spec
    }
}

impl Default for FindSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_parse() {
        assert_eq!(SortKey::parse("-create_at"), SortKey::desc("create_at"));
        assert_eq!(SortKey::parse("name"), SortKey::asc("name"));
        assert_eq!(SortKey::parse("+name"), SortKey::asc("name"));
        assert_eq!(SortKey::parse("-age").to_string(), "-age");
    }

    #[test]
    fn test_sort_document_keeps_key_order() {
        let keys = vec![SortKey::parse("-age"), SortKey::parse("name")];
        assert_eq!(SortKey::to_document(&keys), doc! { "age": -1, "name": 1 });
    }

    #[test]
    fn test_builder_defaults_to_newest_first() {
        let spec = FindSpec::builder().sort(vec![]).build();
        assert_eq!(spec.sort, vec![SortKey::desc("create_at")]);
        assert_eq!(spec.sort_document(), Some(doc! { "create_at": -1 }));
        assert!(!spec.page.valid);
    }

    #[test]
    fn test_builder_overrides() {
        let spec = FindSpec::builder()
            .filter(doc! { "age": 3 })
            .sort(vec!["name".into()])
            .page(Page::new(2, 4))
            .build();
        assert_eq!(spec.filter, doc! { "age": 3 });
        assert_eq!(spec.sort, vec![SortKey::asc("name")]);
        assert_eq!(spec.page, Page::new(2, 4));
    }
}
