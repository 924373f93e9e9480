//! Dotted-path access and value ordering for JSON documents.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Every value reachable at `path`, fanning out through arrays of
/// sub-documents the way query predicates see them.
pub(crate) fn lookup<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];

    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(found) = map.get(segment) {
                        next.push(found);
                    }
                }
                Value::Array(items) => {
                    if let Ok(index) = segment.parse::<usize>() {
                        if let Some(found) = items.get(index) {
                            next.push(found);
                        }
                    } else {
                        next.extend(
                            items
                                .iter()
                                .filter_map(|item| item.as_object())
                                .filter_map(|map| map.get(segment)),
                        );
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    current
}

/// First value at `path`, used for sort keys.
pub(crate) fn first<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    lookup(doc, path).into_iter().next()
}

/// Value of a `"$path"` expression: arrays of sub-documents collapse into
/// an array of the matched fields, missing fields yield `None`.
pub(crate) fn extract(doc: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    extract_segments(doc, &segments)
}

fn extract_segments(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => map.get(*head).and_then(|found| extract_segments(found, rest)),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter(|item| item.is_object())
                .filter_map(|item| extract_segments(item, segments))
                .collect(),
        )),
        _ => None,
    }
}

pub(crate) fn get_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set `path` to `value`, creating intermediate sub-documents.
pub(crate) fn set(doc: &mut Value, path: &str, value: Value) -> Result<(), String> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| "empty field path".to_string())?;

    let mut current = doc;
    for segment in parents {
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index))
                .ok_or_else(|| format!("cannot create field '{}' in array at '{}'", segment, path))?,
            other => {
                return Err(format!(
                    "cannot create field '{}' in element {}",
                    segment, other
                ))
            }
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let slot = last
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index))
                .ok_or_else(|| format!("cannot create field '{}' in array at '{}'", last, path))?;
            *slot = value;
            Ok(())
        }
        other => Err(format!("cannot create field '{}' in element {}", last, other)),
    }
}

pub(crate) fn remove(doc: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        Some((parent, last)) => match get_mut(doc, parent)? {
            Value::Object(map) => map.remove(last),
            _ => None,
        },
        None => doc.as_object_mut()?.remove(path),
    }
}

/// Equality with numbers compared by value, so `1` equals `1.0`.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Ordering between values of the same kind; `None` across kinds.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order used by `$sort`, `$min` and `$max`.
pub(crate) fn sort_order(a: &Value, b: &Value) -> Ordering {
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| compare_values(a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string())))
}
