use super::document::{compare_values, lookup, values_equal};
use crate::{Error, Result};
use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Evaluate a query filter such as `{"age": {"$gte": 25}, "$or": [...]}`.
pub(crate) fn matches(doc: &Value, filter: &Value) -> Result<bool> {
    let conditions = match filter {
        Value::Object(conditions) => conditions,
        Value::Null => return Ok(true),
        other => {
            return Err(Error::InvalidFilter(format!(
                "filter must be a document, got {}",
                other
            )))
        }
    };

    for (key, condition) in conditions {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(doc, key, condition)?,
            op if op.starts_with('$') => {
                return Err(Error::InvalidFilter(format!("unknown top level operator: {}", op)))
            }
            path => field_matches(doc, path, condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses<'a>(key: &str, condition: &'a Value) -> Result<&'a Vec<Value>> {
    match condition {
        Value::Array(items) if !items.is_empty() => Ok(items),
        _ => Err(Error::InvalidFilter(format!("{} must be a nonempty array", key))),
    }
}

fn any_clause(doc: &Value, key: &str, condition: &Value) -> Result<bool> {
    for clause in clauses(key, condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `Some(ops)` when every key of the object is an operator
pub(crate) fn operator_doc(condition: &Value) -> Result<Option<&Map<String, Value>>> {
    let Value::Object(ops) = condition else {
        return Ok(None);
    };

    let operators = ops.keys().filter(|key| key.starts_with('$')).count();
    if operators == 0 {
        Ok(None)
    } else if operators == ops.len() {
        Ok(Some(ops))
    } else {
        Err(Error::InvalidFilter(format!(
            "cannot mix operators and fields in {}",
            condition
        )))
    }
}

fn field_matches(doc: &Value, path: &str, condition: &Value) -> Result<bool> {
    let candidates = lookup(doc, path);

    match operator_doc(condition)? {
        Some(ops) => operators_match(&candidates, ops),
        None => Ok(equals_any(&candidates, condition)),
    }
}

/// Apply every operator of `ops` to the candidate values of one field.
pub(crate) fn operators_match(candidates: &[&Value], ops: &Map<String, Value>) -> Result<bool> {
    for (op, arg) in ops {
        let matched = match op.as_str() {
            "$eq" => equals_any(candidates, arg),
            "$ne" => !equals_any(candidates, arg),
            "$gt" => compares(candidates, arg, |ord| ord == Ordering::Greater),
            "$gte" => compares(candidates, arg, |ord| ord != Ordering::Less),
            "$lt" => compares(candidates, arg, |ord| ord == Ordering::Less),
            "$lte" => compares(candidates, arg, |ord| ord != Ordering::Greater),
            "$in" => in_list(candidates, op, arg)?,
            "$nin" => !in_list(candidates, op, arg)?,
            "$exists" => !candidates.is_empty() == truthy(arg),
            "$regex" => regex_matches(candidates, arg, ops.get("$options"))?,
            "$options" => {
                if !ops.contains_key("$regex") {
                    return Err(Error::InvalidFilter("$options needs a $regex".to_string()));
                }
                true
            }
            "$all" => {
                let expected = list(op, arg)?;
                !expected.is_empty() && expected.iter().all(|item| equals_any(candidates, item))
            }
            "$size" => {
                let size = arg
                    .as_u64()
                    .ok_or_else(|| Error::InvalidFilter("$size needs a non-negative integer".to_string()))?;
                candidates
                    .iter()
                    .any(|value| value.as_array().is_some_and(|items| items.len() as u64 == size))
            }
            other => {
                return Err(Error::InvalidFilter(format!("unknown operator: {}", other)));
            }
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Candidates plus the elements of any array candidates
fn flattened<'a>(candidates: &[&'a Value]) -> Vec<&'a Value> {
    let mut values = Vec::with_capacity(candidates.len());
    for value in candidates {
        values.push(*value);
        if let Value::Array(items) = *value {
            values.extend(items.iter());
        }
    }
    values
}

pub(crate) fn equals_any(candidates: &[&Value], expected: &Value) -> bool {
    if candidates.is_empty() {
        return expected.is_null();
    }
    flattened(candidates)
        .into_iter()
        .any(|value| values_equal(value, expected))
}

fn compares(candidates: &[&Value], bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    flattened(candidates)
        .into_iter()
        .filter_map(|value| compare_values(value, bound))
        .any(accept)
}

fn list<'a>(op: &str, arg: &'a Value) -> Result<&'a Vec<Value>> {
    arg.as_array()
        .ok_or_else(|| Error::InvalidFilter(format!("{} needs an array", op)))
}

fn in_list(candidates: &[&Value], op: &str, arg: &Value) -> Result<bool> {
    Ok(list(op, arg)?.iter().any(|item| equals_any(candidates, item)))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Null => false,
        _ => true,
    }
}

fn regex_matches(candidates: &[&Value], pattern: &Value, options: Option<&Value>) -> Result<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| Error::InvalidFilter("$regex needs a string pattern".to_string()))?;
    let options = options.and_then(Value::as_str).unwrap_or_default();

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| Error::InvalidFilter(format!("bad $regex: {}", err)))?;

    Ok(flattened(candidates)
        .into_iter()
        .filter_map(Value::as_str)
        .any(|text| regex.is_match(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> Value {
        json!({
            "firstName": "John",
            "email": "johnny@example.com",
            "age": 27,
            "tags": ["Engineering", "Remote"],
            "address": {"state": "CA"}
        })
    }

    #[test]
    fn test_range_or_membership() {
        let filter = json!({
            "$or": [
                {"age": {"$gte": 25, "$lt": 30}},
                {"tags": {"$in": ["Engineering"]}}
            ]
        });
        assert!(matches(&user(), &filter).unwrap());

        let older = json!({"age": 40, "tags": ["Sales"]});
        assert!(!matches(&older, &filter).unwrap());
    }

    #[test]
    fn test_array_field_equality_and_nin() {
        assert!(matches(&user(), &json!({"tags": "Remote"})).unwrap());
        assert!(matches(&user(), &json!({"tags": {"$nin": ["b"]}})).unwrap());
        assert!(!matches(&user(), &json!({"tags": {"$nin": ["Remote"]}})).unwrap());
        assert!(matches(&user(), &json!({"tags": {"$all": ["Remote", "Engineering"]}})).unwrap());
        assert!(matches(&user(), &json!({"tags": {"$size": 2}})).unwrap());
    }

    #[test]
    fn test_regex_with_nested_equality() {
        let filter = json!({"email": {"$regex": "^john"}, "address.state": "CA"});
        assert!(matches(&user(), &filter).unwrap());

        let filter = json!({"email": {"$regex": "^JOHN", "$options": "i"}, "address.state": "NY"});
        assert!(!matches(&user(), &filter).unwrap());
    }

    #[test]
    fn test_exists_and_null() {
        assert!(matches(&user(), &json!({"skills": {"$exists": false}})).unwrap());
        assert!(matches(&user(), &json!({"skills": null})).unwrap());
        assert!(!matches(&user(), &json!({"age": {"$exists": false}})).unwrap());
    }

    #[test]
    fn test_malformed_filters_are_errors() {
        assert!(matches(&user(), &json!({"age": {"$between": [1, 2]}})).is_err());
        assert!(matches(&user(), &json!({"$where": "true"})).is_err());
        assert!(matches(&user(), &json!({"$nor": [{"age": 1}]})).is_err());
        assert!(matches(&user(), &json!({"tags": {"$elemMatch": {"$eq": "Remote"}}})).is_err());
        assert!(matches(&user(), &json!({"tags": {"$in": "Remote"}})).is_err());
        assert!(matches(&user(), &json!({"email": {"$regex": "("}})).is_err());
        assert!(matches(&user(), &json!([1])).is_err());
    }
}
