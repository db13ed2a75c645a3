//! Column-name cache for binlog row events.
//!
//! `TABLE_MAP_EVENT` carries a table id and column types but not column names, so a
//! binlog row's values only make sense once positionally matched against a column list
//! resolved separately. This cache resolves `schema.table -> [column names]` once per
//! table via `INFORMATION_SCHEMA.COLUMNS` and reuses it for the life of the process.

use crate::error::AppResult;
use mysql_async::prelude::*;
use mysql_async::Pool;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct TableMetaCache {
    columns: Mutex<HashMap<String, Vec<String>>>,
}

impl TableMetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn columns_for(&self, pool: &Pool, schema: &str, table: &str) -> AppResult<Vec<String>> {
        let key = format!("{schema}.{table}");
        {
            let cache = self.columns.lock().await;
            if let Some(cols) = cache.get(&key) {
                return Ok(cols.clone());
            }
        }

        let mut conn = pool.get_conn().await?;
        let cols: Vec<String> = conn
            .exec_map(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
                (schema, table),
                |name: String| name,
            )
            .await?;

        let mut cache = self.columns.lock().await;
        cache.insert(key, cols.clone());
        Ok(cols)
    }

    pub async fn invalidate(&self, schema: &str, table: &str) {
        let mut cache = self.columns.lock().await;
        cache.remove(&format!("{schema}.{table}"));
    }
}
