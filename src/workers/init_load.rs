//! One-shot backfill: for mapping rules that carry an `init_query`, streams the source
//! table (or the query's own result set) and publishes each row as an `Init` event,
//! skipping tables that already hold data on the target side.

use crate::bus::Message;
use crate::model::{BinlogPosition, MappingRule, RowEvent, RowEventKind};
use crate::sql;
use crate::workers::SharedContext;
use futures_util::StreamExt;
use mysql_async::prelude::*;
use mysql_async::Row;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// If the bus drop counter climbs while we're backfilling, the downstream Target Worker
/// is saturated; pause briefly rather than add to the pile-up.
const DROP_WATCH_PAUSE: Duration = Duration::from_millis(200);

pub struct InitLoadWorker {
    pub rule: Arc<MappingRule>,
    pub ctx: Arc<SharedContext>,
}

impl InitLoadWorker {
    pub async fn run(&self) {
        let Some(_) = &self.rule.init_query else {
            return;
        };

        if let Err(e) = self.run_inner().await {
            tracing::error!(
                source = %self.rule.source,
                target = %self.rule.target,
                table = %self.rule.target_table,
                error = %e,
                "init load failed"
            );
        }
    }

    async fn run_inner(&self) -> crate::error::AppResult<()> {
        if self.target_table_nonempty().await? {
            tracing::info!(
                target = %self.rule.target,
                table = %self.rule.target_table,
                "target table already has rows, skipping backfill"
            );
            return Ok(());
        }

        let pool = self.ctx.pool.get(&self.rule.source).await?;
        let mut conn = pool.get_conn().await?;

        let query = self
            .rule
            .init_query
            .clone()
            .unwrap_or_else(|| sql::build_select_all(&self.rule.source_table));

        let mut result = conn.query_iter(query).await?;
        let mut published = 0u64;

        while let Some(row) = result.next().await {
            let row: Row = row?;
            let values = row_to_map(&row);

            let event = RowEvent {
                event_id: RowEvent::new_event_id(),
                kind: RowEventKind::Init,
                source_name: self.rule.source.clone(),
                schema: String::new(),
                table: self.rule.source_table.clone(),
                values,
                before_values: None,
                binlog_position: None::<BinlogPosition>,
                server_id: None,
            };

            let dropped_before = self.ctx.bus.dropped();
            self.ctx.bus.publish(Message::row(self.rule.target.clone(), event)).await;
            published += 1;

            if self.ctx.bus.dropped() > dropped_before {
                tokio::time::sleep(DROP_WATCH_PAUSE).await;
            }
        }

        tracing::info!(
            target = %self.rule.target,
            table = %self.rule.target_table,
            published,
            "backfill complete"
        );
        Ok(())
    }

    async fn target_table_nonempty(&self) -> crate::error::AppResult<bool> {
        let pool = self.ctx.pool.get(&self.rule.target).await?;
        let mut conn = pool.get_conn().await?;
        let probe = format!(
            "SELECT 1 FROM `{}` LIMIT 1",
            self.rule.target_table.replace('`', "``")
        );
        let row: Option<Row> = conn.query_first(probe).await?;
        Ok(row.is_some())
    }
}

fn row_to_map(row: &Row) -> std::collections::HashMap<String, Value> {
    let mut map = std::collections::HashMap::with_capacity(row.columns_ref().len());
    for (i, col) in row.columns_ref().iter().enumerate() {
        let name = col.name_str().into_owned();
        let value = row
            .as_ref(i)
            .map(mysql_value_to_json)
            .unwrap_or(Value::Null);
        map.insert(name, value);
    }
    map
}

fn mysql_value_to_json(v: &mysql_common::Value) -> Value {
    use mysql_common::Value as V;
    match v {
        V::NULL => Value::Null,
        V::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        V::Int(i) => Value::from(*i),
        V::UInt(u) => Value::from(*u),
        V::Float(f) => Value::from(*f),
        V::Double(d) => Value::from(*d),
        V::Date(..) | V::Time(..) => Value::String(v.as_sql(true)),
    }
}
