//! Filter evaluation, ordering and update application over JSON documents

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{StoreError, StoreOperation, StoreResult};
use crate::filter::Filter;
use crate::sort::{SortDirection, SortSpec};
use crate::store::{Document, IndexModel};
use crate::types::GeoPoint;
use crate::update::{UpdateDocument, UpdateOperation};

/// Reads a dotted path (`address.city`).
pub(crate) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes a dotted path, creating intermediate objects.
pub(crate) fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}

pub(crate) fn matches(doc: &Document, filter: &Filter) -> StoreResult<bool> {
    Ok(match filter {
        Filter::Empty => true,
        Filter::Eq { field, value } => equals(get_path(doc, field), value),
        Filter::Ne { field, value } => !equals(get_path(doc, field), value),
        Filter::In { field, values } => {
            let actual = get_path(doc, field);
            values.iter().any(|v| equals(actual, v))
        }
        Filter::Nin { field, values } => {
            let actual = get_path(doc, field);
            !values.iter().any(|v| equals(actual, v))
        }
        Filter::Gt { field, value } => satisfies(get_path(doc, field), value, Ordering::is_gt),
        Filter::Gte { field, value } => satisfies(get_path(doc, field), value, Ordering::is_ge),
        Filter::Lt { field, value } => satisfies(get_path(doc, field), value, Ordering::is_lt),
        Filter::Lte { field, value } => satisfies(get_path(doc, field), value, Ordering::is_le),
        Filter::Regex {
            field,
            pattern,
            case_insensitive,
        } => {
            let regex = regex::RegexBuilder::new(pattern)
                .case_insensitive(*case_insensitive)
                .build()
                .map_err(|e| StoreError::query_failed(StoreOperation::Find, e.to_string()))?;
            match get_path(doc, field) {
                Some(Value::String(s)) => regex.is_match(s),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str().is_some_and(|s| regex.is_match(s))),
                _ => false,
            }
        }
        Filter::Text {
            search,
            case_sensitive,
        } => text_matches(doc, search, *case_sensitive),
        Filter::Near {
            field,
            point,
            max_distance,
        } => get_path(doc, field)
            .and_then(GeoPoint::from_geojson)
            .is_some_and(|location| location.distance_to(point) <= *max_distance),
        Filter::ElemMatch { field, filter } => match get_path(doc, field) {
            Some(Value::Array(items)) => {
                let mut found = false;
                for item in items {
                    if let Value::Object(element) = item {
                        if matches(element, filter)? {
                            found = true;
                            break;
                        }
                    }
                }
                found
            }
            _ => false,
        },
        Filter::IsNull { field } => matches!(get_path(doc, field), None | Some(Value::Null)),
        Filter::And(filters) => {
            for filter in filters {
                if !matches(doc, filter)? {
                    return Ok(false);
                }
            }
            true
        }
        Filter::Or(filters) => {
            for filter in filters {
                if matches(doc, filter)? {
                    return Ok(true);
                }
            }
            false
        }
    })
}

/// Equality with null-matches-missing and array-contains semantics.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None | Some(Value::Null) => expected.is_null(),
        Some(value) => {
            scalar_equals(value, expected)
                || value
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| scalar_equals(item, expected)))
        }
    }
}

fn scalar_equals(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn satisfies(actual: Option<&Value>, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
    match actual {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| compare(item, expected).is_some_and(accept)),
        Some(value) => compare(value, expected).is_some_and(accept),
        None => false,
    }
}

/// Type-aware comparison; RFC 3339 strings compare as instants.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(compare_strings(x, y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_strings(a: &str, b: &str) -> Ordering {
    match (parse_instant(a), parse_instant(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn parse_instant(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

fn text_matches(doc: &Document, search: &str, case_sensitive: bool) -> bool {
    let normalize = |s: &str| {
        if case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    };
    let terms: Vec<String> = search.split_whitespace().map(normalize).collect();
    let mut haystack = Vec::new();
    collect_strings(&Value::Object(doc.clone()), &mut haystack);
    haystack
        .iter()
        .map(|s| normalize(s.as_str()))
        .any(|s| terms.iter().any(|term| s.contains(term.as_str())))
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

/// Total order used for sorting: missing/null, numbers, strings, objects,
/// arrays, booleans.
fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) if rank(a) == rank(b) => compare(x, y).unwrap_or(Ordering::Equal),
        _ => rank(a).cmp(&rank(b)),
    }
}

pub(crate) fn sort_documents(documents: &mut [Document], sort: &SortSpec) {
    documents.sort_by(|a, b| compare_by_spec(a, b, sort));
}

pub(crate) fn compare_by_spec(a: &Document, b: &Document, sort: &SortSpec) -> Ordering {
    for key in sort.keys() {
        let ordering = sort_order(get_path(a, &key.field), get_path(b, &key.field));
        let ordering = match key.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Seeds an upserted document from the filter's equality predicates.
pub(crate) fn seed_from_filter(filter: &Filter, doc: &mut Document) {
    match filter {
        Filter::Eq { field, value } => set_path(doc, field, value.clone()),
        Filter::And(filters) => filters.iter().for_each(|f| seed_from_filter(f, doc)),
        _ => {}
    }
}

/// Applies `update` to `doc`. `inserting` is true when an upsert creates the
/// document.
pub(crate) fn apply_update(
    doc: &mut Document,
    update: &UpdateDocument,
    inserting: bool,
    increment_with_default: bool,
) -> StoreResult<()> {
    for op in update.operations() {
        match op {
            UpdateOperation::Set { field, value } => set_path(doc, field, value.clone()),
            UpdateOperation::SetOnInsert { field, value } => {
                if inserting {
                    set_path(doc, field, value.clone());
                }
            }
            UpdateOperation::Inc { field, by } => {
                let next = increment(get_path(doc, field), *by, field)?;
                set_path(doc, field, next);
            }
            UpdateOperation::IncrementOrInit { field, by, initial } => {
                if !increment_with_default {
                    return Err(StoreError::query_failed(
                        StoreOperation::Update,
                        "increment-with-default is not supported by this deployment",
                    ));
                }
                let next = if inserting {
                    Value::from(*initial)
                } else {
                    increment(get_path(doc, field), *by, field)?
                };
                set_path(doc, field, next);
            }
        }
    }
    Ok(())
}

fn increment(current: Option<&Value>, by: i64, field: &str) -> StoreResult<Value> {
    match current {
        None | Some(Value::Null) => Ok(Value::from(by)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i
                .checked_add(by)
                .map(Value::from)
                .ok_or_else(|| {
                    StoreError::query_failed(
                        StoreOperation::Update,
                        format!("increment overflows field '{}'", field),
                    )
                }),
            None => Ok(Value::from(n.as_f64().unwrap_or_default() + by as f64)),
        },
        Some(_) => Err(StoreError::query_failed(
            StoreOperation::Update,
            format!("cannot increment non-numeric field '{}'", field),
        )),
    }
}

/// Name of the first unique index `candidate` would violate, ignoring the
/// document at `skip`.
pub(crate) fn unique_violation(
    indexes: &[IndexModel],
    documents: &[Document],
    candidate: &Document,
    skip: Option<usize>,
) -> Option<String> {
    indexes.iter().filter(|index| index.unique).find_map(|index| {
        let key = index_key(index, candidate);
        documents
            .iter()
            .enumerate()
            .any(|(i, other)| Some(i) != skip && index_key(index, other) == key)
            .then(|| index.index_name())
    })
}

fn index_key(index: &IndexModel, doc: &Document) -> Vec<Value> {
    index
        .keys
        .iter()
        .map(|(field, _)| get_path(doc, field).cloned().unwrap_or(Value::Null))
        .collect()
}
