//! Per-target-table batch accumulator.
//!
//! New batching behavior (same shape as the single-table accumulator this was modeled
//! on): flush fires when the accumulator reaches `batch_size` rows OR the oldest pending
//! row has sat longer than `batch_flush_interval`. INSERT/UPDATE/INIT rows coalesce by
//! primary key — a repeated key overwrites the earlier event in place rather than adding
//! a second entry, so only the latest value for a key survives to the flush.

use crate::model::RowEvent;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct TableBatch {
    rows: Vec<RowEvent>,
    index_by_pk: HashMap<String, usize>,
    first_enqueued_at: Option<Instant>,
}

impl TableBatch {
    /// Insert or coalesce `event` under `pk_value`. A repeat of the same key replaces
    /// the stored event in place (last write wins) without changing position or the
    /// batch's age.
    pub fn push(&mut self, pk_value: String, event: RowEvent) {
        if let Some(&idx) = self.index_by_pk.get(&pk_value) {
            self.rows[idx] = event;
            return;
        }
        self.index_by_pk.insert(pk_value, self.rows.len());
        self.rows.push(event);
        if self.first_enqueued_at.is_none() {
            self.first_enqueued_at = Some(Instant::now());
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn should_flush(&self, batch_size: usize, flush_interval: Duration) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        self.rows.len() >= batch_size
            || self
                .first_enqueued_at
                .map(|t| t.elapsed() >= flush_interval)
                .unwrap_or(false)
    }

    /// Drains the batch, resetting it to empty/fresh.
    pub fn take(&mut self) -> Vec<RowEvent> {
        self.index_by_pk.clear();
        self.first_enqueued_at = None;
        std::mem::take(&mut self.rows)
    }

    pub fn rows(&self) -> &[RowEvent] {
        &self.rows
    }
}

/// One `TableBatch` per `target_table`, owned by a single Target Worker.
#[derive(Default)]
pub struct BatchAccumulator {
    tables: HashMap<String, TableBatch>,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_mut(&mut self, table: &str) -> &mut TableBatch {
        self.tables.entry(table.to_string()).or_default()
    }

    pub fn tables_ready(&self, batch_size: usize, flush_interval: Duration) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(_, b)| b.should_flush(batch_size, flush_interval))
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|b| b.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BinlogPosition, RowEventKind};
    use std::collections::HashMap as Map;

    fn event(id: &str) -> RowEvent {
        RowEvent {
            event_id: id.to_string(),
            kind: RowEventKind::Insert,
            source_name: "src".into(),
            schema: "appdb".into(),
            table: "users".into(),
            values: Map::new(),
            before_values: None,
            binlog_position: None::<BinlogPosition>,
            server_id: None,
        }
    }

    #[test]
    fn coalesces_same_primary_key() {
        let mut batch = TableBatch::default();
        batch.push("1".into(), event("a"));
        batch.push("1".into(), event("b"));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows()[0].event_id, "b");
    }

    #[test]
    fn flushes_on_size() {
        let mut batch = TableBatch::default();
        for i in 0..3 {
            batch.push(i.to_string(), event("x"));
        }
        assert!(batch.should_flush(3, Duration::from_secs(999)));
        assert!(!batch.should_flush(10, Duration::from_secs(999)));
    }
}
