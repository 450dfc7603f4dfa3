//! Filter and update evaluation for in-memory documents.
//!
//! This module interprets the native query language (filter documents, update operator
//! documents, sort keys) directly against BSON documents.

use bson::{Bson, Document as BsonDocument, datetime::DateTime, oid::ObjectId};
use std::{cmp::Ordering, collections::HashMap};

use docdal_core::{
    document::ID_FIELD,
    error::{DalError, DalResult},
    query::{SortDirection, SortKey},
    update::is_operator_document,
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `1`, `1i64` and `1.0` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// ObjectId value
    ObjectId(ObjectId),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl<'a> Comparable<'a> {
    /// Cross-type ordering rank, following the database's BSON comparison order.
    fn type_rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total ordering used for sorting. Values of different types order by type rank.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.type_rank()
            .cmp(&other.type_rank())
            .then_with(|| self.partial_cmp(other).unwrap_or(Ordering::Equal))
    }
}

fn comparable(value: Option<&Bson>) -> Comparable<'_> {
    value.map(Comparable::from).unwrap_or(Comparable::Null)
}

/// Looks up a dotted path (`"address.city"`, `"tags.0"`).
pub(crate) fn lookup<'a>(document: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Writes `value` at a dotted path, creating intermediate documents.
pub(crate) fn set_path(document: &mut BsonDocument, path: &str, value: Bson) -> DalResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, BsonDocument::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(DalError::StorageOperationFailed(format!(
                    "cannot create field '{rest}' in non-document element '{head}'"
                ))),
            }
        }
    }
}

/// Removes the value at a dotted path, if present.
pub(crate) fn unset_path(document: &mut BsonDocument, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

/// Evaluates a field reference (`"$field.path"`) or returns a literal.
pub(crate) fn resolve_expression(document: &BsonDocument, expression: &Bson) -> Bson {
    match expression {
        Bson::String(path) if path.starts_with('$') => {
            lookup(document, &path[1..]).cloned().unwrap_or(Bson::Null)
        }
        Bson::Document(fields) if !is_operator_document(fields) => Bson::Document(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), resolve_expression(document, value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Adds two numeric values, widening an `Int32` sum to `Int64` as needed.
///
/// Returns `None` for a non-numeric operand or when an `Int64` sum overflows.
pub(crate) fn add_numbers(left: &Bson, right: &Bson) -> Option<Bson> {
    match (left, right) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(
            a.checked_add(*b)
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(*a as i64 + *b as i64)),
        ),
        (Bson::Int32(a), Bson::Int64(b)) => (*a as i64).checked_add(*b).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int32(b)) => a.checked_add(*b as i64).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_add(*b).map(Bson::Int64),
        (a, b) => Some(Bson::Double(as_f64(a)? + as_f64(b)?)),
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn unsupported(kind: &str, operator: &str) -> DalError {
    DalError::StorageOperationFailed(format!("unsupported {kind} operator {operator}"))
}

/// Matches documents against a native filter document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a BsonDocument,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a BsonDocument) -> Self {
        Self { document }
    }

    /// Returns `true` if the document satisfies every clause of `filter`.
    pub fn matches(&self, filter: &BsonDocument) -> DalResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.all(condition)?,
                "$or" => self.any(condition)?,
                "$nor" => !self.any(condition)?,
                op if op.starts_with('$') => return Err(unsupported("query", op)),
                field => self.matches_field(field, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn clauses(condition: &Bson) -> DalResult<impl Iterator<Item = &BsonDocument>> {
        match condition {
            Bson::Array(items) if !items.is_empty() => {
                items.iter().try_for_each(|item| match item {
                    Bson::Document(_) => Ok(()),
                    _ => Err(DalError::StorageOperationFailed(
                        "$and/$or/$nor entries must be documents".to_string(),
                    )),
                })?;
                Ok(items.iter().filter_map(Bson::as_document))
            }
            _ => Err(DalError::StorageOperationFailed(
                "$and/$or/$nor must be a non-empty array".to_string(),
            )),
        }
    }

    fn all(&self, condition: &Bson) -> DalResult<bool> {
        for clause in Self::clauses(condition)? {
            if !self.matches(clause)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn any(&self, condition: &Bson) -> DalResult<bool> {
        for clause in Self::clauses(condition)? {
            if self.matches(clause)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn matches_field(&self, field: &str, condition: &Bson) -> DalResult<bool> {
        let value = lookup(self.document, field);

        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                for (op, argument) in operators {
                    if !Self::apply_operator(value, op, argument)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            target => Ok(Self::equals(value, target)),
        }
    }

    fn apply_operator(value: Option<&Bson>, op: &str, argument: &Bson) -> DalResult<bool> {
        Ok(match op {
            "$eq" => Self::equals(value, argument),
            "$ne" => !Self::equals(value, argument),
            "$gt" | "$gte" | "$lt" | "$lte" => Self::compare(value, op, argument),
            "$in" => Self::in_list(value, argument)?,
            "$nin" => !Self::in_list(value, argument)?,
            "$exists" => {
                let should_exist = match argument {
                    Bson::Boolean(flag) => *flag,
                    other => as_f64(other).is_some_and(|n| n != 0.0),
                };
                value.is_some() == should_exist
            }
            other => return Err(unsupported("query", other)),
        })
    }

    /// Equality with array-contains semantics: an array field equals a scalar target
    /// if any element does.
    fn equals(value: Option<&Bson>, target: &Bson) -> bool {
        let target_cmp = Comparable::from(target);

        match value {
            Some(Bson::Array(items)) if !matches!(target, Bson::Array(_)) => {
                items.iter().any(|item| Comparable::from(item) == target_cmp)
            }
            other => comparable(other) == target_cmp,
        }
    }

    fn compare(value: Option<&Bson>, op: &str, argument: &Bson) -> bool {
        let argument = Comparable::from(argument);
        let holds = |candidate: &Bson| match Comparable::from(candidate).partial_cmp(&argument) {
            Some(ordering) => match op {
                "$gt" => ordering == Ordering::Greater,
                "$gte" => ordering != Ordering::Less,
                "$lt" => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            },
            None => false,
        };

        match value {
            None => false,
            Some(Bson::Array(items)) => items.iter().any(holds),
            Some(single) => holds(single),
        }
    }

    fn in_list(value: Option<&Bson>, argument: &Bson) -> DalResult<bool> {
        match argument {
            Bson::Array(targets) => Ok(targets.iter().any(|target| Self::equals(value, target))),
            _ => Err(DalError::StorageOperationFailed(
                "$in/$nin needs an array".to_string(),
            )),
        }
    }

    /// Keeps the documents matching `filter`, cloned.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a BsonDocument>,
        filter: &BsonDocument,
    ) -> DalResult<Vec<BsonDocument>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).matches(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }
}

/// Applies an operator-form update in place. Returns `true` if the document changed.
///
/// `$setOnInsert` only applies when `inserting` is set.
pub(crate) fn apply_update(
    document: &mut BsonDocument,
    update: &BsonDocument,
    inserting: bool,
) -> DalResult<bool> {
    let before = document.clone();

    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DalError::StorageOperationFailed(format!(
                "modifier {op} expects a document"
            )));
        };

        for (path, value) in fields {
            if path == ID_FIELD && op != "$setOnInsert" && !inserting {
                if lookup(document, ID_FIELD) != Some(value) {
                    return Err(DalError::StorageOperationFailed(
                        "the _id field is immutable".to_string(),
                    ));
                }
                continue;
            }

            match op.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$setOnInsert" => {
                    if inserting {
                        set_path(document, path, value.clone())?;
                    }
                }
                "$unset" => unset_path(document, path),
                "$inc" => {
                    let current = lookup(document, path).cloned().unwrap_or(Bson::Int32(0));
                    if as_f64(&current).is_none() || as_f64(value).is_none() {
                        return Err(DalError::StorageOperationFailed(format!(
                            "cannot apply $inc to non-numeric field {path}"
                        )));
                    }
                    let sum = add_numbers(&current, value).ok_or_else(|| {
                        DalError::StorageOperationFailed(format!(
                            "integer overflow applying $inc to field {path}"
                        ))
                    })?;
                    set_path(document, path, sum)?;
                }
                "$push" => {
                    let mut items = match lookup(document, path) {
                        None => Vec::new(),
                        Some(Bson::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(DalError::StorageOperationFailed(format!(
                                "cannot apply $push to non-array field {path}"
                            )));
                        }
                    };
                    items.push(value.clone());
                    set_path(document, path, Bson::Array(items))?;
                }
                other => return Err(unsupported("update", other)),
            }
        }
    }

    Ok(*document != before)
}

/// Replaces a stored document, keeping its `_id`.
pub(crate) fn replace_document(
    document: &mut BsonDocument,
    replacement: &BsonDocument,
) -> DalResult<bool> {
    let id = document.get(ID_FIELD).cloned();

    if let (Some(id), Some(new_id)) = (&id, replacement.get(ID_FIELD))
        && id != new_id
    {
        return Err(DalError::StorageOperationFailed(
            "the _id field is immutable".to_string(),
        ));
    }

    let mut replaced = BsonDocument::new();
    if let Some(id) = id {
        replaced.insert(ID_FIELD, id);
    }
    for (key, value) in replacement {
        if key != ID_FIELD {
            replaced.insert(key.clone(), value.clone());
        }
    }

    let changed = replaced != *document;
    *document = replaced;
    Ok(changed)
}

/// Builds the document an upsert inserts: the filter's equality clauses, then the update.
pub(crate) fn upsert_document(filter: &BsonDocument, update: &BsonDocument) -> DalResult<BsonDocument> {
    let mut document = BsonDocument::new();

    if is_operator_document(update) {
        seed_from_filter(&mut document, filter)?;
        apply_update(&mut document, update, true)?;
    } else {
        if let Some(id) = filter.get(ID_FIELD).filter(|id| !is_operator(id)) {
            document.insert(ID_FIELD, id.clone());
        }
        replace_document(&mut document, update)?;
        if let Some(id) = update.get(ID_FIELD) {
            document.insert(ID_FIELD, id.clone());
        }
    }

    Ok(with_id(document))
}

fn is_operator(value: &Bson) -> bool {
    matches!(value, Bson::Document(inner) if is_operator_document(inner))
}

fn seed_from_filter(document: &mut BsonDocument, filter: &BsonDocument) -> DalResult<()> {
    for (key, condition) in filter {
        match key.as_str() {
            "$and" => {
                if let Bson::Array(clauses) = condition {
                    for clause in clauses.iter().filter_map(Bson::as_document) {
                        seed_from_filter(document, clause)?;
                    }
                }
            }
            op if op.starts_with('$') => {}
            field => match condition {
                Bson::Document(operators) if is_operator_document(operators) => {
                    if let Some(value) = operators.get("$eq") {
                        set_path(document, field, value.clone())?;
                    }
                }
                value => set_path(document, field, value.clone())?,
            },
        }
    }

    Ok(())
}

/// Ensures `_id` is present and first.
pub(crate) fn with_id(document: BsonDocument) -> BsonDocument {
    let id = document
        .get(ID_FIELD)
        .cloned()
        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));

    let mut ordered = BsonDocument::new();
    ordered.insert(ID_FIELD, id);
    for (key, value) in document {
        if key != ID_FIELD {
            ordered.insert(key, value);
        }
    }
    ordered
}

/// Sorts documents by several keys, in order. Missing fields sort as null.
pub(crate) fn sort_documents(documents: &mut [BsonDocument], keys: &[SortKey]) {
    documents.sort_by(|a, b| {
        keys.iter().fold(Ordering::Equal, |ordering, key| {
            ordering.then_with(|| {
                let left = comparable(lookup(a, &key.field));
                let right = comparable(lookup(b, &key.field));

                match key.direction {
                    SortDirection::Asc => left.sort_cmp(&right),
                    SortDirection::Desc => right.sort_cmp(&left),
                }
            })
        })
    });
}
