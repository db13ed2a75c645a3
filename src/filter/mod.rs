//! Recursive, total (never-throwing) predicate evaluator.
//!
//! Grammar:
//!   leaf:    { "<col>": { "<op>": <literal> }, ... }   (multi-key = implicit AND)
//!   not:     { "not": <predicate> }
//!   and/or:  { "and": [<p>, ...] } | { "or": [<p>, ...] }

use serde_json::Value;
use std::collections::HashMap;

const LEAF_OPS: &[&str] = &["eq", "gt", "gte", "lt", "lte"];

/// Evaluate `predicate` against `row`. Never panics; any structural oddity in the
/// predicate itself is treated as "does not match" rather than propagated as an error,
/// matching the total-evaluation invariant.
pub fn evaluate(predicate: &Value, row: &HashMap<String, Value>) -> bool {
    let Value::Object(map) = predicate else {
        return false;
    };

    if let Some(inner) = map.get("not") {
        return !evaluate(inner, row);
    }
    if let Some(Value::Array(items)) = map.get("and") {
        return items.iter().all(|p| evaluate(p, row));
    }
    if let Some(Value::Array(items)) = map.get("or") {
        return items.iter().any(|p| evaluate(p, row));
    }

    // Implicit AND over leaf column predicates.
    map.iter().all(|(col, ops)| evaluate_leaf(col, ops, row))
}

fn evaluate_leaf(col: &str, ops: &Value, row: &HashMap<String, Value>) -> bool {
    let Value::Object(ops_map) = ops else {
        return false;
    };
    let actual = row.get(col);
    ops_map.iter().all(|(op, expected)| match actual {
        None => false,
        Some(value) => compare(op, value, expected),
    })
}

fn compare(op: &str, actual: &Value, expected: &Value) -> bool {
    match op {
        "eq" => actual == expected,
        "gt" | "gte" | "lt" | "lte" => match (as_f64(actual), as_f64(expected)) {
            (Some(a), Some(b)) => match op {
                "gt" => a > b,
                "gte" => a >= b,
                "lt" => a < b,
                "lte" => a <= b,
                _ => unreachable!(),
            },
            // null, missing, or non-numeric values never satisfy ordering predicates.
            _ => false,
        },
        _ => false,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Structural validation performed once at config-load time: every leaf op is a known
/// operator, every `and`/`or` child validates recursively.
pub fn validate_predicate(predicate: &Value) -> Result<(), String> {
    let Value::Object(map) = predicate else {
        return Err("predicate must be a JSON object".into());
    };

    if let Some(inner) = map.get("not") {
        return validate_predicate(inner);
    }
    if let Some(and_or) = map.get("and").or_else(|| map.get("or")) {
        let Value::Array(items) = and_or else {
            return Err("\"and\"/\"or\" must be an array of predicates".into());
        };
        for item in items {
            validate_predicate(item)?;
        }
        return Ok(());
    }

    for (col, ops) in map {
        let Value::Object(ops_map) = ops else {
            return Err(format!("leaf '{col}' must map to an operator object"));
        };
        for op in ops_map.keys() {
            if !LEAF_OPS.contains(&op.as_str()) {
                return Err(format!("unknown operator '{op}' for column '{col}'"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn simple_eq_and_gte() {
        let pred = json!({"status": {"eq": "active"}, "age": {"gte": 18}});
        assert!(evaluate(&pred, &row(&[("status", json!("active")), ("age", json!(18))])));
        assert!(!evaluate(&pred, &row(&[("status", json!("active")), ("age", json!(17))])));
    }

    #[test]
    fn nested_and_or() {
        let pred = json!({
            "and": [
                {"status": {"eq": "active"}},
                {"or": [
                    {"category": {"eq": "premium"}},
                    {"score": {"gte": 90}}
                ]}
            ]
        });
        let r = row(&[
            ("status", json!("active")),
            ("category", json!("free")),
            ("score", json!(95)),
        ]);
        assert!(evaluate(&pred, &r));
    }

    #[test]
    fn missing_column_never_matches() {
        let pred = json!({"missing_col": {"eq": 1}});
        assert!(!evaluate(&pred, &row(&[("other", json!(1))])));
    }

    #[test]
    fn null_never_satisfies_ordering() {
        let pred = json!({"age": {"gte": 18}});
        assert!(!evaluate(&pred, &row(&[("age", Value::Null)])));
    }

    #[test]
    fn not_negates() {
        let pred = json!({"not": {"status": {"eq": "active"}}});
        assert!(evaluate(&pred, &row(&[("status", json!("inactive"))])));
        assert!(!evaluate(&pred, &row(&[("status", json!("active"))])));
    }

    #[test]
    fn validate_rejects_unknown_operator() {
        let pred = json!({"age": {"between": [1, 2]}});
        assert!(validate_predicate(&pred).is_err());
    }
}
