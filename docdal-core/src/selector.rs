//! Selector resolution.
//!
//! Operations that target existing documents accept anything implementing
//! [`IntoSelector`]. The value is classified once, at the entry of the operation, into a
//! [`Selector`]: either a unique identifier or a filter map. Anything else is rejected
//! before a connection is checked out.
//!
//! ```ignore
//! use docdal::selector::{IntoSelector, Selector};
//! use bson::{doc, oid::ObjectId, Bson};
//!
//! assert!(matches!(ObjectId::new().into_selector()?, Selector::UniqueId(_)));
//! assert!(matches!(doc! { "name": "Alice" }.into_selector()?, Selector::FilterMap(_)));
//! assert!(Bson::Int32(1).into_selector().is_err());
//! ```

use bson::{Bson, Document as BsonDocument, doc, oid::ObjectId};
use std::fmt;

use crate::{
    document::ID_FIELD,
    error::{DalError, DalResult},
};

/// A resolved document selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Selects the single document with this `_id`.
    UniqueId(ObjectId),
    /// Selects the documents matching this filter document.
    FilterMap(BsonDocument),
}

impl Selector {
    /// Classifies an untyped selector value.
    pub fn resolve(value: impl IntoSelector) -> DalResult<Self> {
        value.into_selector()
    }

    /// Renders this selector as a native filter document.
    pub fn to_filter(&self) -> BsonDocument {
        match self {
            Selector::UniqueId(id) => doc! { ID_FIELD: *id },
            Selector::FilterMap(filter) => filter.clone(),
        }
    }

    /// Consumes this selector and returns the native filter document.
    pub fn into_filter(self) -> BsonDocument {
        match self {
            Selector::UniqueId(id) => doc! { ID_FIELD: id },
            Selector::FilterMap(filter) => filter,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::UniqueId(id) => write!(f, "{}", id.to_hex()),
            Selector::FilterMap(filter) => write!(f, "{}", filter),
        }
    }
}

/// Conversion of caller input into a [`Selector`].
pub trait IntoSelector {
    /// Classifies `self`, failing with [`DalError::NullSelector`] for absent values and
    /// [`DalError::UnsupportedSelectorKind`] for anything that is neither an identifier
    /// nor a filter map.
    fn into_selector(self) -> DalResult<Selector>;
}

impl IntoSelector for Selector {
    fn into_selector(self) -> DalResult<Selector> {
        Ok(self)
    }
}

impl IntoSelector for ObjectId {
    fn into_selector(self) -> DalResult<Selector> {
        Ok(Selector::UniqueId(self))
    }
}

impl IntoSelector for &ObjectId {
    fn into_selector(self) -> DalResult<Selector> {
        Ok(Selector::UniqueId(*self))
    }
}

impl IntoSelector for BsonDocument {
    fn into_selector(self) -> DalResult<Selector> {
        Ok(Selector::FilterMap(self))
    }
}

impl IntoSelector for &BsonDocument {
    fn into_selector(self) -> DalResult<Selector> {
        Ok(Selector::FilterMap(self.clone()))
    }
}

impl IntoSelector for Bson {
    fn into_selector(self) -> DalResult<Selector> {
        match self {
            Bson::Null | Bson::Undefined => Err(DalError::NullSelector),
            Bson::ObjectId(id) => Ok(Selector::UniqueId(id)),
            Bson::Document(filter) => Ok(Selector::FilterMap(filter)),
            other => Err(DalError::UnsupportedSelectorKind(format!(
                "{:?}",
                other.element_type()
            ))),
        }
    }
}

impl<T: IntoSelector> IntoSelector for Option<T> {
    fn into_selector(self) -> DalResult<Selector> {
        match self {
            Some(value) => value.into_selector(),
            None => Err(DalError::NullSelector),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_resolves_to_unique_id() {
        let id = ObjectId::new();
        assert_eq!(Selector::resolve(id).unwrap(), Selector::UniqueId(id));
        assert_eq!(Selector::resolve(Bson::ObjectId(id)).unwrap(), Selector::UniqueId(id));
    }

    #[test]
    fn test_document_resolves_to_filter_map() {
        let filter = doc! { "name": "Alice" };
        assert_eq!(
            Selector::resolve(Bson::Document(filter.clone())).unwrap(),
            Selector::FilterMap(filter)
        );
    }

    #[test]
    fn test_null_inputs_fail_with_null_selector() {
        assert!(matches!(Selector::resolve(Bson::Null), Err(DalError::NullSelector)));
        assert!(matches!(Selector::resolve(None::<ObjectId>), Err(DalError::NullSelector)));
        assert!(matches!(Selector::resolve(None::<Bson>), Err(DalError::NullSelector)));
    }

    #[test]
    fn test_other_kinds_are_unsupported() {
        for value in [
            Bson::String("5a934e000102030405000000".into()),
            Bson::Int32(7),
            Bson::Boolean(true),
            Bson::Array(vec![Bson::Int32(1)]),
        ] {
            assert!(matches!(
                Selector::resolve(value),
                Err(DalError::UnsupportedSelectorKind(_))
            ));
        }
    }

    #[test]
    fn test_to_filter() {
        let id = ObjectId::new();
        assert_eq!(Selector::UniqueId(id).to_filter(), doc! { "_id": id });
        assert_eq!(
            Selector::FilterMap(doc! { "age": 30 }).into_filter(),
            doc! { "age": 30 }
        );
    }
}
