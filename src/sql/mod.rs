//! Parameterised SQL construction: batch upsert, single delete, and init-load select.
//!
//! Identifiers are always backtick-quoted; every value is bound as a parameter, never
//! interpolated into the statement text.

use mysql_async::Value as SqlValue;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Builds `INSERT INTO t (cols) VALUES (...), (...), ... ON DUPLICATE KEY UPDATE col=VALUES(col), ...`
/// for a homogeneous batch of rows (same columns across every row). The update clause
/// covers every non-PK column; the primary key itself is never reassigned on conflict.
/// Returns the statement text and the flattened parameter list, row-major.
pub fn build_batch_upsert(
    table: &str,
    columns: &[String],
    primary_key: &str,
    rows: &[HashMap<String, JsonValue>],
) -> (String, Vec<SqlValue>) {
    assert!(!rows.is_empty(), "build_batch_upsert called with no rows");

    let col_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let placeholders_one_row = format!("({})", columns.iter().map(|_| "?").collect::<Vec<_>>().join(", "));
    let values_clause = std::iter::repeat(placeholders_one_row.as_str())
        .take(rows.len())
        .collect::<Vec<_>>()
        .join(", ");

    let update_clause = columns
        .iter()
        .filter(|c| c.as_str() != primary_key)
        .map(|c| {
            let q = quote_ident(c);
            format!("{q}=VALUES({q})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "INSERT INTO {} ({col_list}) VALUES {values_clause} ON DUPLICATE KEY UPDATE {update_clause}",
        quote_ident(table)
    );

    let mut params = Vec::with_capacity(rows.len() * columns.len());
    for row in rows {
        for col in columns {
            let v = row.get(col).cloned().unwrap_or(JsonValue::Null);
            params.push(json_to_sql_value(&v));
        }
    }

    (sql, params)
}

/// Builds `DELETE FROM t WHERE pk = ?`.
pub fn build_delete(table: &str, primary_key_column: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_ident(table),
        quote_ident(primary_key_column)
    )
}

/// Builds the default backfill query for a mapping rule that has no explicit
/// `init_query`: `SELECT * FROM t`.
pub fn build_select_all(table: &str) -> String {
    format!("SELECT * FROM {}", quote_ident(table))
}

pub fn json_to_sql_value(v: &JsonValue) -> SqlValue {
    match v {
        JsonValue::Null => SqlValue::NULL,
        JsonValue::Bool(b) => SqlValue::Int(if *b { 1 } else { 0 }),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                SqlValue::UInt(u)
            } else {
                SqlValue::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => SqlValue::Bytes(s.as_bytes().to_vec()),
        other => SqlValue::Bytes(other.to_string().into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_upsert_shape() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows = vec![
            HashMap::from([("id".into(), json!(1)), ("name".into(), json!("JOHN"))]),
            HashMap::from([("id".into(), json!(2)), ("name".into(), json!("JANE"))]),
        ];
        let (sql, params) = build_batch_upsert("users", &columns, "id", &rows);
        assert!(sql.starts_with("INSERT INTO `users` (`id`, `name`) VALUES (?, ?), (?, ?) ON DUPLICATE KEY UPDATE `name`=VALUES(`name`)"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn delete_shape() {
        assert_eq!(build_delete("users", "id"), "DELETE FROM `users` WHERE `id` = ?");
    }
}
