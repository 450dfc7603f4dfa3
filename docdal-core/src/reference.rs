//! Cross-collection reference resolution.
//!
//! Incoming payloads often embed a related document as `{"author": {"id": "<hex>"}}`.
//! Resolving the field replaces it with a DBRef stored under `author_ref`:
//!
//! ```text
//! { "author_ref": { "$ref": "authors", "$id": ObjectId("...") } }
//! ```
//!
//! The companion [`resolve_reference_id`] writes only the dotted `author_ref.$id` key,
//! which is what a filter over referencing documents needs.

use bson::{Bson, Document as BsonDocument, doc, oid::ObjectId};

use crate::{
    document::Document,
    error::{DalError, DalResult},
};

/// Property holding the target identifier inside an embedded reference.
const REFERENCE_ID: &str = "id";

/// Length of the hex form of an ObjectId.
const OBJECT_ID_HEX_LEN: usize = 24;

/// A resolved reference to a document in another collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// The field the reference was read from.
    pub field: String,
    /// The target collection.
    pub collection: String,
    /// The target document's identifier.
    pub id: ObjectId,
}

impl Reference {
    /// The field name the reference is persisted under.
    pub fn ref_field(&self) -> String {
        ref_field(&self.field)
    }

    /// The persisted DBRef form.
    pub fn to_dbref(&self) -> BsonDocument {
        doc! { "$ref": self.collection.as_str(), "$id": self.id }
    }
}

fn ref_field(field: &str) -> String {
    format!("{field}_ref")
}

/// Resolves `field` into a reference to `D`'s collection.
///
/// Returns `Ok(None)` and leaves `map` untouched when `field` is absent.
///
/// # Errors
///
/// - [`DalError::InvalidReferenceShape`] if the value is not an embedded document or has
///   no `id` property.
/// - [`DalError::InvalidIdentifierFormat`] if `id` is not a 24 character hex string.
///
/// `map` is only modified on success.
pub fn resolve_reference<D: Document>(
    map: &mut BsonDocument,
    field: &str,
) -> DalResult<Option<Reference>> {
    resolve_reference_to(map, field, D::collection_name())
}

/// Resolves `field` into a reference to `collection`. See [`resolve_reference`].
pub fn resolve_reference_to(
    map: &mut BsonDocument,
    field: &str,
    collection: &str,
) -> DalResult<Option<Reference>> {
    let Some(id) = read_reference_id(map, field)? else {
        return Ok(None);
    };

    let reference = Reference {
        field: field.to_string(),
        collection: collection.to_string(),
        id,
    };

    map.remove(field);
    map.insert(reference.ref_field(), reference.to_dbref());

    Ok(Some(reference))
}

/// Replaces `field` with the dotted `<field>_ref.$id` key holding only the target
/// identifier, for use in filters. Returns the identifier, or `None` when `field` is
/// absent.
///
/// Fails like [`resolve_reference`].
pub fn resolve_reference_id(map: &mut BsonDocument, field: &str) -> DalResult<Option<ObjectId>> {
    let Some(id) = read_reference_id(map, field)? else {
        return Ok(None);
    };

    map.remove(field);
    map.insert(format!("{}.$id", ref_field(field)), id);

    Ok(Some(id))
}

fn read_reference_id(map: &BsonDocument, field: &str) -> DalResult<Option<ObjectId>> {
    let embedded = match map.get(field) {
        None => return Ok(None),
        Some(Bson::Document(embedded)) => embedded,
        Some(other) => {
            return Err(DalError::InvalidReferenceShape {
                field: field.to_string(),
                reason: format!("expected an embedded document, found {:?}", other.element_type()),
            });
        }
    };

    match embedded.get(REFERENCE_ID) {
        None => Err(DalError::InvalidReferenceShape {
            field: field.to_string(),
            reason: format!("missing `{REFERENCE_ID}` property"),
        }),
        Some(Bson::String(raw)) => parse_object_id(field, raw).map(Some),
        Some(other) => Err(DalError::InvalidIdentifierFormat {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

fn parse_object_id(field: &str, raw: &str) -> DalResult<ObjectId> {
    let invalid = || DalError::InvalidIdentifierFormat {
        field: field.to_string(),
        value: raw.to_string(),
    };

    if !is_object_id_hex(raw) {
        return Err(invalid());
    }
    ObjectId::parse_str(raw).map_err(|_| invalid())
}

/// Checks for exactly 24 hex characters.
fn is_object_id_hex(raw: &str) -> bool {
    raw.len() == OBJECT_ID_HEX_LEN && raw.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "5a934e000102030405000000";

    #[test]
    fn test_resolve_reference_writes_dbref() {
        let mut map = doc! { "title": "Post", "author": { "id": HEX } };
        let reference = resolve_reference_to(&mut map, "author", "authors")
            .unwrap()
            .unwrap();

        let id = ObjectId::parse_str(HEX).unwrap();
        assert_eq!(reference.id, id);
        assert_eq!(
            map,
            doc! { "title": "Post", "author_ref": { "$ref": "authors", "$id": id } }
        );
    }

    #[test]
    fn test_absent_field_is_left_alone() {
        let mut map = doc! { "title": "Post" };
        assert_eq!(resolve_reference_to(&mut map, "author", "authors").unwrap(), None);
        assert_eq!(map, doc! { "title": "Post" });
    }

    #[test]
    fn test_resolve_reference_id_writes_dotted_key() {
        let mut map = doc! { "author": { "id": HEX } };
        let id = resolve_reference_id(&mut map, "author").unwrap().unwrap();
        assert_eq!(map, doc! { "author_ref.$id": id });
    }

    #[test]
    fn test_shape_errors() {
        let mut missing_id = doc! { "author": { "name": "x" } };
        assert!(matches!(
            resolve_reference_to(&mut missing_id, "author", "authors"),
            Err(DalError::InvalidReferenceShape { .. })
        ));
        assert!(missing_id.contains_key("author"));

        let mut scalar = doc! { "author": HEX };
        assert!(matches!(
            resolve_reference_id(&mut scalar, "author"),
            Err(DalError::InvalidReferenceShape { .. })
        ));
    }

    #[test]
    fn test_identifier_format_errors() {
        for bad in [
            Bson::String("not-an-id".into()),
            Bson::String("5a934e00010203040500000".into()),
            Bson::String("5a934e00010203040500000g".into()),
            Bson::Int32(12),
            Bson::ObjectId(ObjectId::new()),
        ] {
            let mut map = doc! { "author": { "id": bad } };
            let err = resolve_reference_to(&mut map, "author", "authors").unwrap_err();
            assert!(matches!(err, DalError::InvalidIdentifierFormat { ref field, .. } if field == "author"));
            assert!(map.contains_key("author"));
            assert!(!map.contains_key("author_ref"));
        }
    }
}
