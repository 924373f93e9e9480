use super::document::{extract, first, remove, set, sort_order, values_equal};
use super::filter::matches;
use crate::{Error, Result};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Run an aggregation pipeline over a snapshot of a collection.
pub(crate) fn run(mut docs: Vec<Value>, pipeline: &[Value]) -> Result<Vec<Value>> {
    for stage in pipeline {
        let (name, body) = single_entry(stage)
            .ok_or_else(|| Error::InvalidPipeline(format!("stage must have exactly one field: {}", stage)))?;

        docs = match name {
            "$match" => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, body)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$unwind" => unwind(docs, body)?,
            "$sort" => sort(docs, body).map_err(Error::InvalidPipeline)?,
            "$skip" => {
                let n = count_arg(name, body)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = count_arg(name, body)?;
                if n == 0 {
                    return Err(Error::InvalidPipeline("$limit must be positive".to_string()));
                }
                docs.into_iter().take(n).collect()
            }
            "$project" => docs
                .iter()
                .map(|doc| project(doc, body).map_err(Error::InvalidPipeline))
                .collect::<Result<Vec<_>>>()?,
            "$group" => group(&docs, body)?,
            other => {
                return Err(Error::InvalidPipeline(format!("unsupported stage: {}", other)))
            }
        };
    }

    Ok(docs)
}

fn single_entry(value: &Value) -> Option<(&str, &Value)> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.iter().next().map(|(key, value)| (key.as_str(), value))
}

fn count_arg(stage: &str, body: &Value) -> Result<usize> {
    body.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| Error::InvalidPipeline(format!("{} needs a non-negative integer", stage)))
}

fn unwind(docs: Vec<Value>, body: &Value) -> Result<Vec<Value>> {
    let (path, preserve) = match body {
        Value::String(path) => (path.as_str(), false),
        Value::Object(options) => (
            options.get("path").and_then(Value::as_str).unwrap_or_default(),
            options
                .get("preserveNullAndEmptyArrays")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        _ => return Err(Error::InvalidPipeline("$unwind needs a field path".to_string())),
    };
    let path = path
        .strip_prefix('$')
        .filter(|path| !path.is_empty())
        .ok_or_else(|| Error::InvalidPipeline(format!("$unwind path must start with '$': {}", body)))?;

    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match first(&doc, path).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    set(&mut copy, path, item).map_err(Error::InvalidPipeline)?;
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) => {
                if preserve {
                    let mut copy = doc;
                    remove(&mut copy, path);
                    out.push(copy);
                }
            }
            None | Some(Value::Null) => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }

    Ok(out)
}

/// Stable sort by a `{field: 1 | -1, ...}` document
pub(crate) fn sort(mut docs: Vec<Value>, body: &Value) -> std::result::Result<Vec<Value>, String> {
    let keys = body
        .as_object()
        .filter(|keys| !keys.is_empty())
        .ok_or_else(|| format!("sort must be a nonempty document: {}", body))?;

    let mut order = Vec::with_capacity(keys.len());
    for (path, direction) in keys {
        let descending = match direction.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => return Err(format!("sort direction for '{}' must be 1 or -1", path)),
        };
        order.push((path.as_str(), descending));
    }

    docs.sort_by(|a, b| {
        for (path, descending) in &order {
            let left = first(a, path).unwrap_or(&Value::Null);
            let right = first(b, path).unwrap_or(&Value::Null);
            let ord = sort_order(left, right);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    Ok(docs)
}

fn is_flag(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::Number(n) => matches!(n.as_f64(), Some(f) if f == 0.0 || f == 1.0),
        _ => false,
    }
}

fn flag(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

/// Reshape one document with a `$project` / find projection document
pub(crate) fn project(doc: &Value, body: &Value) -> std::result::Result<Value, String> {
    let fields = body
        .as_object()
        .filter(|fields| !fields.is_empty())
        .ok_or_else(|| format!("projection must be a nonempty document: {}", body))?;

    let mut include_id = true;
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    let mut computed = Vec::new();

    for (field, rule) in fields {
        if is_flag(rule) {
            if field == "_id" {
                include_id = flag(rule);
            } else if flag(rule) {
                included.push(field.as_str());
            } else {
                excluded.push(field.as_str());
            }
        } else {
            computed.push((field.as_str(), rule));
        }
    }

    if !excluded.is_empty() && (!included.is_empty() || !computed.is_empty()) {
        return Err("cannot mix inclusion and exclusion in a projection".to_string());
    }

    if included.is_empty() && computed.is_empty() {
        let mut out = doc.clone();
        for field in excluded {
            remove(&mut out, field);
        }
        if !include_id {
            remove(&mut out, "_id");
        }
        return Ok(out);
    }

    let mut out = Value::Object(Map::new());
    if include_id {
        if let Some(id) = doc.get("_id") {
            set(&mut out, "_id", id.clone())?;
        }
    }
    for field in included {
        if let Some(value) = extract(doc, field) {
            set(&mut out, field, value)?;
        }
    }
    for (field, expression) in computed {
        if let Some(value) = evaluate(doc, expression)? {
            set(&mut out, field, value)?;
        }
    }

    Ok(out)
}

/// Evaluate an aggregation expression; `None` when a field path is missing.
fn evaluate(doc: &Value, expression: &Value) -> std::result::Result<Option<Value>, String> {
    match expression {
        Value::String(text) if text.starts_with('$') => Ok(extract(doc, &text[1..])),
        Value::Object(map) => {
            if let Some((operator, arg)) = single_entry(expression).filter(|(key, _)| key.starts_with('$')) {
                return match operator {
                    "$literal" => Ok(Some(arg.clone())),
                    other => Err(format!("unsupported expression operator: {}", other)),
                };
            }
            let mut out = Map::new();
            for (key, value) in map {
                if let Some(value) = evaluate(doc, value)? {
                    out.insert(key.clone(), value);
                }
            }
            Ok(Some(Value::Object(out)))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(doc, item)?.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(out)))
        }
        literal => Ok(Some(literal.clone())),
    }
}

enum Accumulator {
    Sum { int: i64, float: f64, all_int: bool },
    Avg { total: f64, count: u64 },
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
}

impl Accumulator {
    fn new(operator: &str) -> std::result::Result<Self, String> {
        Ok(match operator {
            "$sum" => Accumulator::Sum { int: 0, float: 0.0, all_int: true },
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            other => return Err(format!("unsupported accumulator: {}", other)),
        })
    }

    fn add(&mut self, value: &Value) {
        match self {
            Accumulator::Sum { int, float, all_int } => {
                if let Value::Number(n) = value {
                    // integer totals switch to floating point once they would overflow
                    let total = n.as_i64().filter(|_| *all_int).and_then(|i| int.checked_add(i));
                    match total {
                        Some(total) => *int = total,
                        None => {
                            if *all_int {
                                *float = *int as f64;
                                *all_int = false;
                            }
                            *float += n.as_f64().unwrap_or_default();
                        }
                    }
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(n) = value.as_f64() {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Push(items) => items.push(value.clone()),
            Accumulator::AddToSet(items) => {
                if !items.iter().any(|item| values_equal(item, value)) {
                    items.push(value.clone());
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Sum { int, float, all_int } => {
                if all_int {
                    Value::from(int)
                } else {
                    float_value(float)
                }
            }
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    float_value(total / count as f64)
                }
            }
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Value::Array(items),
        }
    }
}

fn float_value(n: f64) -> Value {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

struct Group {
    key: Value,
    fields: Vec<(String, Accumulator)>,
}

fn group(docs: &[Value], body: &Value) -> Result<Vec<Value>> {
    let body = body
        .as_object()
        .ok_or_else(|| Error::InvalidPipeline("$group needs a document".to_string()))?;
    let id_expression = body
        .get("_id")
        .ok_or_else(|| Error::InvalidPipeline("$group needs an _id".to_string()))?;

    let mut accumulators = Vec::new();
    for (field, definition) in body.iter().filter(|(field, _)| field.as_str() != "_id") {
        let (operator, argument) = single_entry(definition)
            .filter(|(operator, _)| operator.starts_with('$'))
            .ok_or_else(|| Error::InvalidPipeline(format!("'{}' must be an accumulator", field)))?;
        Accumulator::new(operator).map_err(Error::InvalidPipeline)?;
        accumulators.push((field.clone(), operator, argument));
    }

    // groups keep first-seen order so results are deterministic
    let mut groups: Vec<Group> = Vec::new();
    for doc in docs {
        let key = evaluate(doc, id_expression)
            .map_err(Error::InvalidPipeline)?
            .unwrap_or(Value::Null);

        let index = match groups.iter().position(|group| values_equal(&group.key, &key)) {
            Some(index) => index,
            None => {
                let mut fields = Vec::with_capacity(accumulators.len());
                for (field, operator, _) in &accumulators {
                    fields.push((field.clone(), Accumulator::new(operator).map_err(Error::InvalidPipeline)?));
                }
                groups.push(Group { key, fields });
                groups.len() - 1
            }
        };

        for ((_, accumulator), (_, _, argument)) in groups[index].fields.iter_mut().zip(&accumulators) {
            let value = evaluate(doc, argument)
                .map_err(Error::InvalidPipeline)?
                .unwrap_or(Value::Null);
            accumulator.add(&value);
        }
    }

    Ok(groups
        .into_iter()
        .map(|group| {
            let mut out = Map::new();
            out.insert("_id".to_string(), group.key);
            for (field, accumulator) in group.fields {
                out.insert(field, accumulator.finish());
            }
            Value::Object(out)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn students() -> Vec<Value> {
        vec![
            json!({"_id": 1, "name": "Ann", "scores": [
                {"type": "exam", "score": 80.0},
                {"type": "quiz", "score": 70.0},
                {"type": "homework", "score": 60.0}
            ]}),
            json!({"_id": 2, "name": "Bob", "scores": [
                {"type": "exam", "score": 90.0},
                {"type": "quiz", "score": 90.0},
                {"type": "homework", "score": 45.0}
            ]}),
        ]
    }

    #[test]
    fn test_worst_homework_score() {
        let pipeline = vec![
            json!({"$unwind": "$scores"}),
            json!({"$match": {"scores.type": "homework"}}),
            json!({"$sort": {"scores.score": 1}}),
            json!({"$limit": 1}),
            json!({"$project": {"_id": 0, "name": 1, "worst_homework_score": "$scores.score"}}),
        ];

        let result = run(students(), &pipeline).unwrap();
        assert_eq!(result, vec![json!({"name": "Bob", "worst_homework_score": 45.0})]);
    }

    #[test]
    fn test_average_per_student_sorted_descending() {
        let pipeline = vec![
            json!({"$unwind": "$scores"}),
            json!({"$group": {"_id": {"_id": "$_id", "name": "$name"}, "avg_score": {"$avg": "$scores.score"}}}),
            json!({"$sort": {"avg_score": -1}}),
            json!({"$project": {"_id": 0, "name": "$_id.name", "avg_score": 1}}),
        ];

        let result = run(students(), &pipeline).unwrap();
        assert_eq!(
            result,
            vec![
                json!({"name": "Bob", "avg_score": 75.0}),
                json!({"name": "Ann", "avg_score": 70.0}),
            ]
        );
    }

    #[test]
    fn test_group_over_nothing_is_empty() {
        let pipeline = vec![
            json!({"$unwind": "$scores"}),
            json!({"$group": {"_id": null, "avg_score": {"$avg": "$scores.score"}}}),
            json!({"$project": {"_id": 0}}),
        ];

        assert!(run(Vec::new(), &pipeline).unwrap().is_empty());
    }

    #[test]
    fn test_unwind_drops_missing_unless_preserved() {
        let docs = vec![json!({"a": [1, 2]}), json!({"a": []}), json!({"b": 1})];

        assert_eq!(run(docs.clone(), &[json!({"$unwind": "$a"})]).unwrap().len(), 2);
        let preserved = run(
            docs,
            &[json!({"$unwind": {"path": "$a", "preserveNullAndEmptyArrays": true}})],
        )
        .unwrap();
        assert_eq!(preserved.len(), 4);
    }

    #[test]
    fn test_sum_push_and_literal() {
        let docs = students();
        let result = run(
            docs.clone(),
            &[json!({"$group": {"_id": null, "n": {"$sum": 1}, "names": {"$push": "$name"}}})],
        )
        .unwrap();
        assert_eq!(result, vec![json!({"_id": null, "n": 2, "names": ["Ann", "Bob"]})]);

        let result = run(
            docs,
            &[json!({"$project": {"_id": 0, "name": 1, "kind": {"$literal": "$name"}}})],
        )
        .unwrap();
        assert_eq!(
            result,
            vec![json!({"name": "Ann", "kind": "$name"}), json!({"name": "Bob", "kind": "$name"})]
        );
    }

    #[test]
    fn test_sum_past_i64_max_becomes_float() {
        let docs = vec![json!({"n": i64::MAX}), json!({"n": 1})];
        let result = run(docs, &[json!({"$group": {"_id": null, "total": {"$sum": "$n"}}})]).unwrap();

        let total = &result[0]["total"];
        assert!(total.is_f64());
        assert_eq!(total.as_f64(), Some(i64::MAX as f64 + 1.0));
    }

    #[test]
    fn test_invalid_stages() {
        assert!(run(students(), &[json!({"$lookup": {}})]).is_err());
        assert!(run(students(), &[json!({"$sort": {"name": 2}})]).is_err());
        assert!(run(students(), &[json!({"$group": {"total": {"$sum": 1}}})]).is_err());
        assert!(run(students(), &[json!({"$project": {"name": 1, "age": 0}})]).is_err());
        assert!(run(students(), &[json!({"$match": {}, "$limit": 1})]).is_err());
        assert!(run(students(), &[json!({"$count": "students"})]).is_err());
        assert!(run(students(), &[json!({"$group": {"_id": null, "top": {"$max": "$name"}}})]).is_err());
    }
}
