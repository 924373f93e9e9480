use super::document::{get_mut, remove, set, values_equal};
use super::filter::{matches, operator_doc, operators_match};
use crate::{Error, Result};
use serde_json::{Map, Number, Value};

/// Apply an operator update (`$set`, `$push`, ...) to `doc` in place.
///
/// Returns whether the document changed. On error `doc` may be partially
/// modified, callers apply updates to a copy.
pub(crate) fn apply(doc: &mut Value, update: &Value) -> Result<bool> {
    let operations = update
        .as_object()
        .ok_or_else(|| Error::InvalidUpdate(format!("update must be a document, got {}", update)))?;

    if operations.is_empty() {
        return Err(Error::InvalidUpdate("update document is empty".to_string()));
    }
    if let Some(field) = operations.keys().find(|key| !key.starts_with('$')) {
        return Err(Error::InvalidUpdate(format!(
            "update may only contain operators, found field '{}'",
            field
        )));
    }

    let before = doc.clone();

    for (operator, fields) in operations {
        let fields = fields.as_object().ok_or_else(|| {
            Error::InvalidUpdate(format!("{} needs a document of fields", operator))
        })?;

        for (path, arg) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(Error::InvalidUpdate("the _id field is immutable".to_string()));
            }

            match operator.as_str() {
                "$set" => set(doc, path, arg.clone()).map_err(Error::InvalidUpdate)?,
                "$unset" => {
                    remove(doc, path);
                }
                "$inc" => increment(doc, path, arg)?,
                "$push" => push(doc, path, arg, false)?,
                "$addToSet" => push(doc, path, arg, true)?,
                "$pull" => pull(doc, path, arg)?,
                other => {
                    return Err(Error::InvalidUpdate(format!("unknown update operator: {}", other)))
                }
            }
        }
    }

    Ok(*doc != before)
}

/// A replacement must be a plain document without operators.
pub(crate) fn validate_replacement(replacement: &Value) -> Result<&Map<String, Value>> {
    let fields = replacement.as_object().ok_or_else(|| {
        Error::InvalidDocument(format!("replacement must be a document, got {}", replacement))
    })?;

    if let Some(key) = fields.keys().find(|key| key.starts_with('$')) {
        return Err(Error::InvalidDocument(format!(
            "replacement cannot contain operator '{}'",
            key
        )));
    }

    Ok(fields)
}

fn increment(doc: &mut Value, path: &str, by: &Value) -> Result<()> {
    let Value::Number(by) = by else {
        return Err(Error::InvalidUpdate(format!("$inc needs a number for '{}'", path)));
    };

    let next = match get_mut(doc, path) {
        None => Value::Number(by.clone()),
        Some(Value::Number(current)) => match (current.as_i64(), by.as_i64()) {
            (Some(a), Some(b)) => a.checked_add(b).map(Value::from).ok_or_else(|| {
                Error::InvalidUpdate(format!("$inc on '{}' overflows a 64-bit integer", path))
            })?,
            _ => {
                let sum = current.as_f64().unwrap_or_default() + by.as_f64().unwrap_or_default();
                Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
            }
        },
        Some(other) => {
            return Err(Error::InvalidUpdate(format!(
                "cannot apply $inc to non-numeric field '{}': {}",
                path, other
            )))
        }
    };

    set(doc, path, next).map_err(Error::InvalidUpdate)
}

fn array_at<'a>(doc: &'a mut Value, path: &str, operator: &str) -> Result<&'a mut Vec<Value>> {
    if get_mut(doc, path).is_none() {
        set(doc, path, Value::Array(Vec::new())).map_err(Error::InvalidUpdate)?;
    }

    match get_mut(doc, path) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(Error::InvalidUpdate(format!(
            "{} needs field '{}' to be an array",
            operator, path
        ))),
    }
}

fn push(doc: &mut Value, path: &str, arg: &Value, unique: bool) -> Result<()> {
    let operator = if unique { "$addToSet" } else { "$push" };

    let values = match arg.as_object().and_then(|modifiers| modifiers.get("$each")) {
        Some(Value::Array(each)) => each.clone(),
        Some(_) => return Err(Error::InvalidUpdate("$each needs an array".to_string())),
        None => vec![arg.clone()],
    };

    let items = array_at(doc, path, operator)?;
    for value in values {
        if unique && items.iter().any(|item| values_equal(item, &value)) {
            continue;
        }
        items.push(value);
    }

    Ok(())
}

fn pull(doc: &mut Value, path: &str, condition: &Value) -> Result<()> {
    let items = match get_mut(doc, path) {
        None => return Ok(()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(Error::InvalidUpdate(format!(
                "$pull needs field '{}' to be an array",
                path
            )))
        }
    };

    let ops = operator_doc(condition)?;
    let mut keep = Vec::with_capacity(items.len());
    for item in items.iter() {
        let pulled = match ops {
            Some(ops) => operators_match(&[item], ops)?,
            None if condition.is_object() && item.is_object() => matches(item, condition)?,
            None => values_equal(item, condition),
        };
        keep.push(!pulled);
    }

    let mut flags = keep.into_iter();
    items.retain(|_| flags.next().unwrap_or(true));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_unset() {
        let mut doc = json!({"_id": 1, "name": "Ann"});
        assert!(apply(&mut doc, &json!({"$set": {"skills": [], "address.city": "LA"}})).unwrap());
        assert_eq!(doc["skills"], json!([]));
        assert_eq!(doc["address"]["city"], "LA");

        assert!(apply(&mut doc, &json!({"$unset": {"address": ""}})).unwrap());
        assert!(doc.get("address").is_none());
    }

    #[test]
    fn test_unchanged_update_reports_no_modification() {
        let mut doc = json!({"skills": ["js"]});
        assert!(!apply(&mut doc, &json!({"$set": {"skills": ["js"]}})).unwrap());
    }

    #[test]
    fn test_push_each_and_add_to_set() {
        let mut doc = json!({"tags": ["a"]});
        apply(&mut doc, &json!({"$push": {"tags": {"$each": ["b", "c"]}}})).unwrap();
        assert_eq!(doc["tags"], json!(["a", "b", "c"]));

        apply(&mut doc, &json!({"$addToSet": {"tags": {"$each": ["c", "d"]}}})).unwrap();
        assert_eq!(doc["tags"], json!(["a", "b", "c", "d"]));

        apply(&mut doc, &json!({"$push": {"fresh": 1}})).unwrap();
        assert_eq!(doc["fresh"], json!([1]));
    }

    #[test]
    fn test_pull_value_and_condition() {
        let mut doc = json!({"tags": ["tag1-a", "tag2", "tag3", "tag2"]});
        apply(&mut doc, &json!({"$pull": {"tags": {"$in": ["tag2", "tag1-a"]}}})).unwrap();
        assert_eq!(doc["tags"], json!(["tag3"]));

        apply(&mut doc, &json!({"$pull": {"tags": "tag3"}})).unwrap();
        assert_eq!(doc["tags"], json!([]));

        let mut doc = json!({"scores": [{"type": "quiz", "score": 1}, {"type": "exam", "score": 2}]});
        apply(&mut doc, &json!({"$pull": {"scores": {"type": "quiz"}}})).unwrap();
        assert_eq!(doc["scores"], json!([{"type": "exam", "score": 2}]));
    }

    #[test]
    fn test_inc() {
        let mut doc = json!({"count": 1});
        apply(&mut doc, &json!({"$inc": {"count": 2, "ratio": 0.5}})).unwrap();
        assert_eq!(doc["count"], json!(3));
        assert_eq!(doc["ratio"], json!(0.5));
    }

    #[test]
    fn test_inc_overflow_is_an_error() {
        let mut doc = json!({"count": i64::MAX});
        let err = apply(&mut doc, &json!({"$inc": {"count": 1}})).unwrap_err();
        assert!(matches!(err, Error::InvalidUpdate(_)));

        let mut doc = json!({"count": i64::MIN});
        assert!(apply(&mut doc, &json!({"$inc": {"count": -1}})).is_err());
    }

    #[test]
    fn test_invalid_updates() {
        let mut doc = json!({"_id": 1, "name": "Ann", "tags": "x"});
        assert!(apply(&mut doc, &json!({"name": "Bob"})).is_err());
        assert!(apply(&mut doc, &json!({"$rename": {"name": "n"}})).is_err());
        assert!(apply(&mut doc, &json!({"$set": {"_id": 2}})).is_err());
        assert!(apply(&mut doc, &json!({"$push": {"tags": "y"}})).is_err());
        assert!(apply(&mut doc, &json!({})).is_err());
    }

    #[test]
    fn test_replacement_rejects_operators() {
        assert!(validate_replacement(&json!({"firstName": "Jason"})).is_ok());
        assert!(validate_replacement(&json!({"$set": {"a": 1}})).is_err());
    }
}
