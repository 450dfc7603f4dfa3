//! Update payloads and their results.
//!
//! An update is either a plain document, applied as a field-level upsert/update, or a
//! [`Change`], applied as an atomic find-and-modify that also returns the affected
//! document.

use bson::{Bson, Document as BsonDocument, doc};
use serde::{Deserialize, Serialize};

use crate::{
    document::{CREATE_AT, ID_FIELD},
    error::{DalError, DalResult},
};

/// Fields that may never be changed through an update.
pub const IMMUTABLE_FIELDS: [&str; 2] = [ID_FIELD, CREATE_AT];

/// An atomic find-and-modify instruction.
///
/// # Example
///
/// ```ignore
/// use docdal::update::Change;
/// use bson::doc;
///
/// let change = Change::update(doc! { "$inc": { "visits": 1 } })
///     .upsert(true)
///     .return_new(true);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Change {
    /// Update document (operator form or full replacement). Ignored when `remove` is set.
    pub update: BsonDocument,
    /// Insert a new document when nothing matches.
    pub upsert: bool,
    /// Delete the matched document instead of updating it.
    pub remove: bool,
    /// Return the document as it is after the change rather than before.
    pub return_new: bool,
}

impl Change {
    /// Creates a change applying `update` to the matched document.
    pub fn update(update: BsonDocument) -> Self {
        Self { update, ..Self::default() }
    }

    /// Creates a change deleting the matched document.
    pub fn remove() -> Self {
        Self { remove: true, ..Self::default() }
    }

    /// Sets whether a document is inserted when nothing matches.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Sets whether the post-change document is returned.
    pub fn return_new(mut self, return_new: bool) -> Self {
        self.return_new = return_new;
        self
    }
}

/// Summary of what a write did.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeInfo {
    /// Number of documents matched by the selector.
    pub matched: u64,
    /// Number of existing documents modified.
    pub updated: u64,
    /// Number of documents removed.
    pub removed: u64,
    /// Identifier of the document inserted by an upsert, if any.
    pub upserted_id: Option<Bson>,
}

impl ChangeInfo {
    /// Returns `true` if the write matched nothing and inserted nothing.
    pub fn is_noop(&self) -> bool {
        self.matched == 0 && self.upserted_id.is_none()
    }
}

/// The update payload accepted by upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    /// Atomic find-and-modify.
    Modify(Change),
    /// Plain upsert: operator documents update, other documents replace.
    Fields(BsonDocument),
}

impl UpdateSpec {
    /// Checks that the update document is either all operators or all plain fields.
    pub fn validate(&self) -> DalResult<()> {
        match self {
            UpdateSpec::Modify(change) if change.remove => Ok(()),
            UpdateSpec::Modify(change) => check_update_form(&change.update),
            UpdateSpec::Fields(update) => check_update_form(update),
        }
    }
}

impl From<Change> for UpdateSpec {
    fn from(change: Change) -> Self {
        UpdateSpec::Modify(change)
    }
}

impl From<BsonDocument> for UpdateSpec {
    fn from(update: BsonDocument) -> Self {
        UpdateSpec::Fields(update)
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpsertOutcome {
    /// The affected document. Only set by atomic find-and-modify upserts.
    pub document: Option<BsonDocument>,
    /// What the write did.
    pub change: ChangeInfo,
}

/// Returns `true` if `update` is in operator form (`{"$set": ...}`) rather than a
/// replacement document.
pub fn is_operator_document(update: &BsonDocument) -> bool {
    update.keys().next().is_some_and(|key| key.starts_with('$'))
}

/// Fails with [`DalError::StorageOperationFailed`] if `update` mixes operator keys
/// (`$set`, `$inc`, ...) with plain field keys.
pub fn check_update_form(update: &BsonDocument) -> DalResult<()> {
    let operators = update.keys().filter(|key| key.starts_with('$')).count();

    if operators == 0 || operators == update.len() {
        return Ok(());
    }

    let plain = update
        .keys()
        .filter(|key| !key.starts_with('$'))
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    Err(DalError::StorageOperationFailed(format!(
        "update document mixes operators with plain fields: {plain}"
    )))
}

/// Removes the immutable fields from an update, at the top level and inside every
/// operator sub-document, then drops operator sub-documents left empty.
///
/// `$rename` entries are dropped when either side names an immutable field.
pub fn strip_immutable(update: &mut BsonDocument) {
    for field in IMMUTABLE_FIELDS {
        update.remove(field);
    }

    let operators = update
        .keys()
        .filter(|key| key.starts_with('$'))
        .cloned()
        .collect::<Vec<_>>();

    for operator in operators {
        if let Some(Bson::Document(fields)) = update.get_mut(&operator) {
            for field in IMMUTABLE_FIELDS {
                fields.remove(field);
            }
            if operator == "$rename" {
                let renamed_onto = fields
                    .iter()
                    .filter(|(_, target)| {
                        target.as_str().is_some_and(|t| IMMUTABLE_FIELDS.contains(&t))
                    })
                    .map(|(source, _)| source.clone())
                    .collect::<Vec<_>>();
                for source in renamed_onto {
                    fields.remove(&source);
                }
            }
            if fields.is_empty() {
                update.remove(&operator);
            }
        }
    }
}

/// Normalizes a field-level update: strips immutable fields and wraps a plain field map
/// in `$set` so it merges into the stored document instead of replacing it.
///
/// Returns `Ok(None)` when nothing is left to apply.
///
/// # Errors
///
/// Fails like [`check_update_form`] for a document mixing operators and plain fields.
pub fn prepare_field_update(mut update: BsonDocument) -> DalResult<Option<BsonDocument>> {
    strip_immutable(&mut update);
    check_update_form(&update)?;

    Ok(if update.is_empty() {
        None
    } else if is_operator_document(&update) {
        Some(update)
    } else {
        Some(doc! { "$set": update })
    })
}
