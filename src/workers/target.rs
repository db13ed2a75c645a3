//! Batch consumer: ensures the target connection is live, filters and transforms each
//! row, accumulates per-table batches, and flushes them as upserts (or individual
//! deletes) against the target database.

use crate::bus::{ControlKind, Payload, Subscription};
use crate::config::ConnectionConfig;
use crate::db::BatchAccumulator;
use crate::filter;
use crate::model::{ColumnSpec, MappingRule, RowEvent, RowEventKind};
use crate::sql;
use crate::workers::{RunningFlag, SharedContext};
use mysql_async::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct TargetWorker {
    pub name: String,
    pub connection: ConnectionConfig,
    pub batch_size: usize,
    pub batch_flush_interval: Duration,
    /// One rule per target table this worker owns.
    pub rules_by_table: HashMap<String, Arc<MappingRule>>,
    pub ctx: Arc<SharedContext>,
    pub running: RunningFlag,
}

impl TargetWorker {
    pub async fn run(&self, mut sub: Subscription) {
        self.ctx.pool.register(&self.name, self.connection.clone()).await;

        let mut accumulator = BatchAccumulator::new();
        let mut ticker = tokio::time::interval(self.batch_flush_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_ready_tables(&mut accumulator).await;
                }
                msg = sub.rx.recv() => {
                    match msg {
                        Some(m) => self.handle_message(m, &mut accumulator).await,
                        None => break,
                    }
                }
                _ = sub.shutdown_rx.recv() => {
                    self.drain_with_deadline(&mut accumulator).await;
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
    }

    async fn handle_message(&self, msg: crate::bus::Message, accumulator: &mut BatchAccumulator) {
        match msg.payload {
            Payload::Row(event) => self.handle_row(event, accumulator).await,
            Payload::Control(ControlKind::Healthcheck) => {
                let _ = self.ctx.pool.is_healthy(&self.name).await;
            }
            Payload::Control(ControlKind::Shutdown) => {}
        }
    }

    async fn handle_row(&self, event: RowEvent, accumulator: &mut BatchAccumulator) {
        let Some(rule) = self.rules_by_table.values().find(|r| {
            r.source == event.source_name && r.source_table == event.table
        }) else {
            tracing::debug!(target = %self.name, table = %event.table, "no mapping rule for event, dropping");
            return;
        };

        if let Some(pred) = &rule.filter {
            if !filter::evaluate(pred, &event.values) {
                self.ctx.metrics.inc_filtered(&self.name, &rule.target_table);
                return;
            }
        }

        let target_row = self.apply_mapping(rule, &event.values, &event.table);
        let pk_value = target_row
            .get(&rule.primary_key)
            .map(json_to_key)
            .unwrap_or_default();

        match event.kind {
            RowEventKind::Insert | RowEventKind::Update | RowEventKind::Init => {
                let transformed = RowEvent {
                    values: target_row,
                    table: rule.target_table.clone(),
                    ..event
                };
                let table_batch = accumulator.table_mut(&rule.target_table);
                table_batch.push(pk_value, transformed);
                if table_batch.should_flush(self.batch_size, self.batch_flush_interval) {
                    self.flush_table(&rule.target_table, accumulator).await;
                }
            }
            RowEventKind::Delete => {
                self.flush_table(&rule.target_table, accumulator).await;
                self.delete_row(rule, &pk_value).await;
            }
        }
    }

    fn apply_mapping(&self, rule: &MappingRule, source_values: &HashMap<String, Value>, source_table: &str) -> HashMap<String, Value> {
        let mut out = HashMap::with_capacity(rule.column_mapping.len());
        for (target_col, spec) in &rule.column_mapping {
            let value = match spec {
                ColumnSpec::Copy { source_column } => {
                    source_values.get(source_column).cloned().unwrap_or(Value::Null)
                }
                ColumnSpec::Static { value } => value.clone(),
                ColumnSpec::Transform { source_column, module, function } => {
                    let raw = source_values.get(source_column).cloned().unwrap_or(Value::Null);
                    self.ctx
                        .transforms
                        .apply(&format!("{module}.{function}"), &raw, source_values, source_table)
                }
            };
            out.insert(target_col.clone(), value);
        }
        out
    }

    async fn flush_ready_tables(&self, accumulator: &mut BatchAccumulator) {
        let tables = accumulator.tables_ready(self.batch_size, self.batch_flush_interval);
        for table in tables {
            self.flush_table(&table, accumulator).await;
        }
    }

    async fn flush_table(&self, table: &str, accumulator: &mut BatchAccumulator) {
        let rows = accumulator.table_mut(table).take();
        if rows.is_empty() {
            return;
        }

        let Some(rule) = self.rules_by_table.get(table) else {
            return;
        };
        let columns: Vec<String> = rule.column_mapping.keys().cloned().collect();
        let row_values: Vec<HashMap<String, Value>> = rows.iter().map(|r| r.values.clone()).collect();
        let primary_key = rule.primary_key.clone();

        let t0 = Instant::now();
        let target_name = self.name.clone();
        let table_owned = table.to_string();
        let result = self
            .ctx
            .pool
            .with_retry(&self.name, |pool| {
                let columns = columns.clone();
                let row_values = row_values.clone();
                let table_owned = table_owned.clone();
                let primary_key = primary_key.clone();
                async move {
                    let (sql_text, params) = sql::build_batch_upsert(&table_owned, &columns, &primary_key, &row_values);
                    let mut conn = pool.get_conn().await?;
                    conn.exec_drop(sql_text, mysql_async::Params::Positional(params))
                        .await
                        .map_err(crate::error::AppError::from)
                }
            })
            .await;

        match result {
            Ok(()) => {
                self.ctx.metrics.observe_flush(t0.elapsed().as_secs_f64(), rows.len());
                self.ctx.metrics.inc_applied(&target_name, &table_owned);
            }
            Err(e) => {
                tracing::error!(target = %target_name, table = %table_owned, error = %e, "batch flush failed");
                self.ctx.metrics.inc_errored(&target_name, &table_owned);
            }
        }
    }

    async fn delete_row(&self, rule: &MappingRule, pk_value: &str) {
        let sql_text = sql::build_delete(&rule.target_table, &rule.primary_key);
        let pk_param = mysql_async::Value::Bytes(pk_value.as_bytes().to_vec());
        let target_table = rule.target_table.clone();
        let result = self
            .ctx
            .pool
            .with_retry(&self.name, |pool| {
                let sql_text = sql_text.clone();
                let pk_param = pk_param.clone();
                async move {
                    let mut conn = pool.get_conn().await?;
                    conn.exec_drop(sql_text, (pk_param,))
                        .await
                        .map_err(crate::error::AppError::from)
                }
            })
            .await;

        match result {
            Ok(()) => self.ctx.metrics.inc_applied(&self.name, &target_table),
            Err(e) => {
                tracing::error!(target = %self.name, table = %target_table, error = %e, "delete failed");
                self.ctx.metrics.inc_errored(&self.name, &target_table);
            }
        }
    }

    /// Best-effort flush of everything still pending, capped at 5s, run once on shutdown.
    async fn drain_with_deadline(&self, accumulator: &mut BatchAccumulator) {
        let tables: Vec<String> = self.rules_by_table.keys().cloned().collect();
        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            for table in tables {
                self.flush_table(&table, accumulator).await;
            }
        })
        .await;
    }
}

fn json_to_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
