//! Soft-delete metadata.
//!
//! Soft-removed documents stay in their collection with `is_delete` set. Reads are not
//! filtered automatically; use [`SoftDeleteMetadata::exclude_deleted`] when building a
//! filter that should skip them.

use bson::{DateTime, Document as BsonDocument, doc};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::document::{DELETE_AT, IS_DELETE, MODIFY_AT};

/// The fields written by a soft remove.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftDeleteMetadata {
    pub is_delete: bool,
    pub delete_at: DateTime,
    pub modify_at: DateTime,
}

impl SoftDeleteMetadata {
    /// Metadata marking a document deleted at `at`.
    pub fn deleted_at(at: chrono::DateTime<Utc>) -> Self {
        let at = DateTime::from_chrono(at);

        Self { is_delete: true, delete_at: at, modify_at: at }
    }

    /// Metadata marking a document deleted now.
    pub fn now() -> Self {
        Self::deleted_at(Utc::now())
    }

    /// The `$set` update applying this metadata.
    pub fn to_update(&self) -> BsonDocument {
        doc! {
            "$set": {
                MODIFY_AT: self.modify_at,
                DELETE_AT: self.delete_at,
                IS_DELETE: self.is_delete,
            }
        }
    }

    /// Adds a clause to `filter` that skips soft-deleted documents.
    pub fn exclude_deleted(mut filter: BsonDocument) -> BsonDocument {
        filter.insert(IS_DELETE, doc! { "$ne": true });
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deleted_at_sets_both_timestamps() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let meta = SoftDeleteMetadata::deleted_at(at);
        assert!(meta.is_delete);
        assert_eq!(meta.delete_at, meta.modify_at);
        assert_eq!(meta.delete_at.timestamp_millis(), at.timestamp_millis());
    }

    #[test]
    fn test_to_update() {
        let meta = SoftDeleteMetadata::now();
        let update = meta.to_update();
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_bool("is_delete").unwrap(), true);
        assert_eq!(set.get_datetime("delete_at").unwrap(), &meta.delete_at);
        assert_eq!(set.get_datetime("modify_at").unwrap(), &meta.modify_at);
    }

    #[test]
    fn test_exclude_deleted() {
        assert_eq!(
            SoftDeleteMetadata::exclude_deleted(doc! { "name": "x" }),
            doc! { "name": "x", "is_delete": { "$ne": true } }
        );
    }
}
