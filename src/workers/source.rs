//! Binlog tailer: one per configured source, fans out row events to every mapping rule
//! whose `source_table` matches the event's table.

use crate::bus::Message;
use crate::config::{ConnectionConfig, ReplicationConfig};
use crate::model::{BinlogPosition, MappingRule, RowEvent, RowEventKind};
use crate::workers::{RunningFlag, SharedContext};
use futures_util::StreamExt;
use mysql_async::binlog::events::{EventData, RowsEventData};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::prelude::*;
use mysql_async::{BinlogRequest, BinlogStream};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const MAX_CONNECT_ATTEMPTS: u32 = 5;
const BACKOFF_CAP: Duration = Duration::from_secs(30);

pub struct SourceWorker {
    pub name: String,
    pub connection: ConnectionConfig,
    pub replication: ReplicationConfig,
    pub mapping_rules: Vec<Arc<MappingRule>>,
    pub ctx: Arc<SharedContext>,
    pub running: RunningFlag,
}

impl SourceWorker {
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        self.ctx.pool.register(&self.name, self.connection.clone()).await;

        let mut attempt: u32 = 0;
        loop {
            match self.stream_until_shutdown(&mut shutdown_rx).await {
                Ok(()) => break, // clean shutdown
                Err(e) => {
                    attempt += 1;
                    tracing::error!(source = %self.name, attempt, error = %e, "binlog stream failed");
                    if attempt >= MAX_CONNECT_ATTEMPTS {
                        tracing::error!(source = %self.name, "giving up after max connect attempts");
                        break;
                    }
                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt)).min(BACKOFF_CAP);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
    }

    async fn stream_until_shutdown(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> crate::error::AppResult<()> {
        let pool = self.ctx.pool.get(&self.name).await?;
        let conn = pool.get_conn().await?;

        let mut request = BinlogRequest::new(self.replication.server_id);
        if let (Some(file), Some(pos)) = (&self.replication.log_file, self.replication.log_pos) {
            request = request.with_filename(file.as_bytes().to_vec()).with_pos(pos as u64);
        }

        let mut stream: BinlogStream = conn.get_binlog_stream(request).await?;

        loop {
            tokio::select! {
                next = stream.next() => {
                    let Some(event) = next else { return Ok(()) };
                    let event = event?;
                    if let Some(data) = event.read_data()? {
                        self.handle_event(data).await;
                    }
                }
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }

    async fn handle_event(&self, data: EventData<'_>) {
        let EventData::RowsEvent(rows_event) = data else {
            return;
        };

        match rows_event {
            RowsEventData::WriteRowsEvent(ev) => {
                for row in ev.rows(ev.table_map_event_ref()).filter_map(Result::ok) {
                    if let Some((schema, table)) = ev.table_map_event_ref().map(|tm| (tm.database_name().into_owned(), tm.table_name().into_owned())) {
                        self.publish_row(RowEventKind::Insert, &schema, &table, row.1, None).await;
                    }
                }
            }
            RowsEventData::UpdateRowsEvent(ev) => {
                for row in ev.rows(ev.table_map_event_ref()).filter_map(Result::ok) {
                    if let Some((schema, table)) = ev.table_map_event_ref().map(|tm| (tm.database_name().into_owned(), tm.table_name().into_owned())) {
                        self.publish_row(RowEventKind::Update, &schema, &table, row.1, row.0).await;
                    }
                }
            }
            RowsEventData::DeleteRowsEvent(ev) => {
                for row in ev.rows(ev.table_map_event_ref()).filter_map(Result::ok) {
                    if let Some((schema, table)) = ev.table_map_event_ref().map(|tm| (tm.database_name().into_owned(), tm.table_name().into_owned())) {
                        self.publish_row(RowEventKind::Delete, &schema, &table, row.0, None).await;
                    }
                }
            }
            _ => {}
        }
    }

    async fn publish_row(
        &self,
        kind: RowEventKind,
        schema: &str,
        table: &str,
        values_row: Option<BinlogRow>,
        before_row: Option<BinlogRow>,
    ) {
        let Some(values_row) = values_row else { return };

        let matching: Vec<&Arc<MappingRule>> = self
            .mapping_rules
            .iter()
            .filter(|r| r.source_table == table)
            .collect();
        if matching.is_empty() {
            return;
        }

        let pool = match self.ctx.pool.get(&self.name).await {
            Ok(p) => p,
            Err(_) => return,
        };
        let columns = match self.ctx.table_meta.columns_for(&pool, schema, table).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(source = %self.name, schema, table, error = %e, "failed to resolve column names, dropping event");
                return;
            }
        };

        let values = row_to_map(&columns, values_row);
        let before_values = before_row.map(|r| row_to_map(&columns, r));

        for rule in matching {
            let event = RowEvent {
                event_id: RowEvent::new_event_id(),
                kind,
                source_name: self.name.clone(),
                schema: schema.to_string(),
                table: table.to_string(),
                values: values.clone(),
                before_values: before_values.clone(),
                binlog_position: None::<BinlogPosition>,
                server_id: Some(self.replication.server_id),
            };
            self.ctx.bus.publish(Message::row(rule.target.clone(), event)).await;
        }
    }
}

fn row_to_map(columns: &[String], row: BinlogRow) -> HashMap<String, Value> {
    let mut map = HashMap::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let value = row
            .as_ref(i)
            .map(mysql_value_to_json)
            .unwrap_or(Value::Null);
        map.insert(col.clone(), value);
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
