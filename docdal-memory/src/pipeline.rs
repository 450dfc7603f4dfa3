//! Aggregation pipeline execution over in-memory documents.
//!
//! Supports `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$count` and `$group`
//! with the `$sum`, `$avg`, `$min`, `$max`, `$push`, `$first` and `$last` accumulators.

use bson::{Bson, Document as BsonDocument};

use docdal_core::{
    document::ID_FIELD,
    error::{DalError, DalResult},
    query::{SortDirection, SortKey},
};

use crate::evaluator::{
    Comparable, DocumentEvaluator, add_numbers, as_f64, lookup, resolve_expression, set_path,
    sort_documents,
};

fn stage_error(message: impl Into<String>) -> DalError {
    DalError::StorageOperationFailed(message.into())
}

/// Runs `stages` over `documents`, in order.
pub(crate) fn run(
    mut documents: Vec<BsonDocument>,
    stages: &[BsonDocument],
) -> DalResult<Vec<BsonDocument>> {
    for stage in stages {
        let mut entries = stage.iter();
        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(stage_error("a pipeline stage must have exactly one field"));
        };

        documents = match (name.as_str(), spec) {
            ("$match", Bson::Document(filter)) => {
                DocumentEvaluator::filter_documents(documents.iter(), filter)?
            }
            ("$sort", Bson::Document(keys)) => {
                sort_documents(&mut documents, &sort_keys(keys)?);
                documents
            }
            ("$skip", count) => {
                let count = non_negative(count, "$skip")?;
                documents.into_iter().skip(count).collect()
            }
            ("$limit", count) => {
                let count = non_negative(count, "$limit")?;
                if count == 0 {
                    return Err(stage_error("$limit must be positive"));
                }
                documents.into_iter().take(count).collect()
            }
            ("$project", Bson::Document(fields)) => documents
                .iter()
                .map(|document| project(document, fields))
                .collect::<DalResult<_>>()?,
            ("$count", Bson::String(field)) => {
                if documents.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = BsonDocument::new();
                    counted.insert(field.as_str(), count_bson(documents.len()));
                    vec![counted]
                }
            }
            ("$group", Bson::Document(spec)) => group(&documents, spec)?,
            (name, _) => {
                return Err(stage_error(format!("unsupported pipeline stage {name}")));
            }
        };
    }

    Ok(documents)
}

fn sort_keys(keys: &BsonDocument) -> DalResult<Vec<SortKey>> {
    keys.iter()
        .map(|(field, direction)| match as_f64(direction) {
            Some(d) if d == 1.0 => Ok(SortKey { field: field.clone(), direction: SortDirection::Asc }),
            Some(d) if d == -1.0 => Ok(SortKey { field: field.clone(), direction: SortDirection::Desc }),
            _ => Err(stage_error(format!("invalid $sort direction for {field}"))),
        })
        .collect()
}

fn non_negative(value: &Bson, stage: &str) -> DalResult<usize> {
    as_f64(value)
        .filter(|n| *n >= 0.0 && n.fract() == 0.0)
        .map(|n| n as usize)
        .ok_or_else(|| stage_error(format!("{stage} needs a non-negative integer")))
}

fn count_bson(count: usize) -> Bson {
    i32::try_from(count)
        .map(Bson::Int32)
        .unwrap_or(Bson::Int64(count as i64))
}

fn is_truthy(value: &Bson) -> Option<bool> {
    match value {
        Bson::Boolean(flag) => Some(*flag),
        other => as_f64(other).map(|n| n != 0.0),
    }
}

fn project(document: &BsonDocument, fields: &BsonDocument) -> DalResult<BsonDocument> {
    let exclusion = fields
        .iter()
        .filter(|(field, _)| field.as_str() != ID_FIELD)
        .all(|(_, value)| is_truthy(value) == Some(false))
        && !fields.is_empty();

    if exclusion {
        let mut projected = document.clone();
        for (field, _) in fields {
            projected.remove(field);
        }
        return Ok(projected);
    }

    let mut projected = BsonDocument::new();
    if fields.get(ID_FIELD).and_then(is_truthy) != Some(false)
        && let Some(id) = document.get(ID_FIELD)
    {
        projected.insert(ID_FIELD, id.clone());
    }

    for (field, value) in fields {
        if field == ID_FIELD && is_truthy(value).is_some() {
            continue;
        }
        match is_truthy(value) {
            Some(true) => {
                if let Some(found) = lookup(document, field) {
                    set_path(&mut projected, field, found.clone())?;
                }
            }
            Some(false) => {
                return Err(stage_error(format!(
                    "cannot exclude {field} in an inclusion projection"
                )));
            }
            None => set_path(&mut projected, field, resolve_expression(document, value))?,
        }
    }

    Ok(projected)
}

enum Accumulator {
    Sum(Bson),
    Avg { total: f64, count: usize },
    Min(Option<Bson>),
    Max(Option<Bson>),
    Push(Vec<Bson>),
    First(Option<Bson>),
    Last(Bson),
}

impl Accumulator {
    fn new(operator: &str) -> DalResult<Self> {
        Ok(match operator {
            "$sum" => Accumulator::Sum(Bson::Int32(0)),
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$push" => Accumulator::Push(Vec::new()),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            other => return Err(stage_error(format!("unsupported accumulator {other}"))),
        })
    }

    fn add(&mut self, value: Bson) {
        match self {
            Accumulator::Sum(total) => {
                if let Some(n) = as_f64(&value) {
                    // an overflowing integer sum continues as a double
                    *total = add_numbers(total, &value)
                        .or_else(|| as_f64(total).map(|t| Bson::Double(t + n)))
                        .unwrap_or(Bson::Double(n));
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(n) = as_f64(&value) {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => Self::keep(current, value, std::cmp::Ordering::Less),
            Accumulator::Max(current) => Self::keep(current, value, std::cmp::Ordering::Greater),
            Accumulator::Push(items) => items.push(value),
            Accumulator::First(first) => {
                if first.is_none() {
                    *first = Some(value);
                }
            }
            Accumulator::Last(last) => *last = value,
        }
    }

    fn keep(current: &mut Option<Bson>, value: Bson, wanted: std::cmp::Ordering) {
        if matches!(value, Bson::Null) {
            return;
        }
        let replace = match current {
            None => true,
            Some(existing) => Comparable::from(&value).sort_cmp(&Comparable::from(&*existing)) == wanted,
        };
        if replace {
            *current = Some(value);
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum(total) => total,
            Accumulator::Avg { count: 0, .. } => Bson::Null,
            Accumulator::Avg { total, count } => Bson::Double(total / count as f64),
            Accumulator::Min(value) | Accumulator::Max(value) | Accumulator::First(value) => {
                value.unwrap_or(Bson::Null)
            }
            Accumulator::Push(items) => Bson::Array(items),
            Accumulator::Last(value) => value,
        }
    }
}

fn group(documents: &[BsonDocument], spec: &BsonDocument) -> DalResult<Vec<BsonDocument>> {
    let key_expression = spec
        .get(ID_FIELD)
        .ok_or_else(|| stage_error("$group needs an _id expression"))?;

    let mut accumulators = Vec::new();
    for (field, definition) in spec.iter().filter(|(field, _)| field.as_str() != ID_FIELD) {
        let Bson::Document(definition) = definition else {
            return Err(stage_error(format!("$group field {field} must be an accumulator")));
        };
        let mut entries = definition.iter();
        let (Some((operator, expression)), None) = (entries.next(), entries.next()) else {
            return Err(stage_error(format!("$group field {field} needs one accumulator")));
        };
        Accumulator::new(operator)?;
        accumulators.push((field.clone(), operator.clone(), expression.clone()));
    }

    // Groups keep first-seen order.
    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for document in documents {
        let key = resolve_expression(document, key_expression);
        let position = match groups
            .iter()
            .position(|(existing, _)| Comparable::from(existing) == Comparable::from(&key))
        {
            Some(position) => position,
            None => {
                let fresh = accumulators
                    .iter()
                    .map(|(_, operator, _)| Accumulator::new(operator))
                    .collect::<DalResult<Vec<_>>>()?;
                groups.push((key, fresh));
                groups.len() - 1
            }
        };

        for (accumulator, (_, _, expression)) in groups[position].1.iter_mut().zip(&accumulators) {
            accumulator.add(resolve_expression(document, expression));
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, values)| {
            let mut output = BsonDocument::new();
            output.insert(ID_FIELD, key);
            for ((field, _, _), value) in accumulators.iter().zip(values) {
                output.insert(field.as_str(), value.finish());
            }
            output
        })
        .collect())
}
