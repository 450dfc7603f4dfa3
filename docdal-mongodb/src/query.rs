//! Translation of docdal queries, indexes and changes into MongoDB driver terms.
//!
//! Filters are already native filter documents; this module only builds the driver
//! options around them, the `findAndModify` command and the parsing of its reply.

use bson::{Bson, Document, doc};
use mongodb::{
    IndexModel,
    options::{FindOptions, IndexOptions},
    results::{DeleteResult, UpdateResult},
};
use serde::Deserialize;

use docdal_core::{
    index::IndexSpec,
    query::{FindSpec, SortKey},
    update::{Change, ChangeInfo},
};

/// Builds the find options (sort, skip, limit) for `spec`.
pub(crate) fn find_options(spec: &FindSpec) -> FindOptions {
    let mut options = FindOptions::default();

    options.sort = spec.sort_document();
    options.skip = spec.page.skip();
    options.limit = spec.page.limit();

    options
}

/// Builds the index model for `index`.
///
/// The server no longer supports dropping duplicates while building a unique index, so
/// `drop_duplicates` has no driver counterpart.
pub(crate) fn index_model(index: &IndexSpec) -> IndexModel {
    IndexModel::builder()
        .keys(SortKey::to_document(&index.keys))
        .options(
            IndexOptions::builder()
                .unique(index.unique)
                .sparse(index.sparse)
                .background(index.background)
                .build(),
        )
        .build()
}

/// Builds the `findAndModify` command applying `change` to the first match of `filter`.
pub(crate) fn find_and_modify_command(
    collection: &str,
    filter: Document,
    change: &Change,
) -> Document {
    let mut command = doc! {
        "findAndModify": collection,
        "query": filter,
    };

    if change.remove {
        command.insert("remove", true);
    } else {
        command.insert("update", change.update.clone());
        command.insert("new", change.return_new);
        command.insert("upsert", change.upsert);
    }

    command
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastErrorObject {
    #[serde(default)]
    n: i64,
    #[serde(default)]
    updated_existing: bool,
    #[serde(default)]
    upserted: Option<Bson>,
}

/// The parts of a `findAndModify` reply the store uses.
#[derive(Debug, Deserialize)]
pub(crate) struct FindAndModifyReply {
    #[serde(default)]
    pub value: Option<Document>,
    #[serde(rename = "lastErrorObject", default)]
    last_error_object: LastErrorObject,
}

impl FindAndModifyReply {
    /// Returns `true` when nothing matched and nothing was inserted.
    pub(crate) fn is_miss(&self) -> bool {
        self.value.is_none()
            && self.last_error_object.n == 0
            && self.last_error_object.upserted.is_none()
    }

    /// The change summary for a reply to a command built from `change`.
    pub(crate) fn change_info(&self, change: &Change) -> ChangeInfo {
        let last = &self.last_error_object;
        let n = last.n.max(0) as u64;

        if change.remove {
            return ChangeInfo { matched: n, removed: n, ..ChangeInfo::default() };
        }
        if let Some(id) = &last.upserted {
            return ChangeInfo { upserted_id: Some(id.clone()), ..ChangeInfo::default() };
        }

        ChangeInfo {
            matched: n,
            updated: if last.updated_existing { n } else { 0 },
            ..ChangeInfo::default()
        }
    }
}

pub(crate) fn update_info(result: UpdateResult) -> ChangeInfo {
    ChangeInfo {
        matched: result.matched_count,
        updated: result.modified_count,
        removed: 0,
        upserted_id: result.upserted_id,
    }
}

pub(crate) fn delete_info(result: DeleteResult) -> ChangeInfo {
    ChangeInfo {
        matched: result.deleted_count,
        removed: result.deleted_count,
        ..ChangeInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docdal_core::page::Page;

    #[test]
    fn test_find_options_apply_valid_page_only() {
        let spec = FindSpec::builder().page(Page::new(10, 5)).build();
        let options = find_options(&spec);
        assert_eq!(options.sort, Some(doc! { "create_at": -1 }));
        assert_eq!(options.skip, Some(10));
        assert_eq!(options.limit, Some(5));

        let options = find_options(&FindSpec::builder().page(Page::parse("x", "5")).build());
        assert_eq!(options.skip, None);
        assert_eq!(options.limit, None);
    }

    #[test]
    fn test_index_model() {
        let model = index_model(&IndexSpec::default());
        assert_eq!(model.keys, doc! { "create_at": -1 });

        let options = model.options.unwrap();
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.sparse, Some(true));
        assert_eq!(options.background, Some(true));
    }

    #[test]
    fn test_find_and_modify_command() {
        let change = Change::update(doc! { "$inc": { "n": 1 } }).upsert(true).return_new(true);
        assert_eq!(
            find_and_modify_command("counters", doc! { "_id": "a" }, &change),
            doc! {
                "findAndModify": "counters",
                "query": { "_id": "a" },
                "update": { "$inc": { "n": 1 } },
                "new": true,
                "upsert": true,
            }
        );

        assert_eq!(
            find_and_modify_command("counters", doc! {}, &Change::remove()),
            doc! { "findAndModify": "counters", "query": {}, "remove": true }
        );
    }

    fn reply(document: Document) -> FindAndModifyReply {
        bson::de::deserialize_from_document(document).unwrap()
    }

    #[test]
    fn test_reply_parsing() {
        let change = Change::update(doc! { "$set": { "a": 1 } });

        let updated = reply(doc! {
            "lastErrorObject": { "n": 1, "updatedExisting": true },
            "value": { "_id": 1, "a": 0 },
            "ok": 1.0,
        });
        assert!(!updated.is_miss());
        assert_eq!(updated.change_info(&change).updated, 1);

        let upserted = reply(doc! {
            "lastErrorObject": { "n": 1, "updatedExisting": false, "upserted": 7 },
            "value": null,
            "ok": 1.0,
        });
        assert!(!upserted.is_miss());
        assert_eq!(upserted.change_info(&change).upserted_id, Some(Bson::Int32(7)));

        let miss = reply(doc! {
            "lastErrorObject": { "n": 0, "updatedExisting": false },
            "value": null,
            "ok": 1.0,
        });
        assert!(miss.is_miss());
    }
}
