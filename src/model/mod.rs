//! Canonical row-event and mapping-rule shapes shared by workers.

use crate::config::{ColumnSpecConfig, MappingRuleConfig};
use crate::error::AppResult;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEventKind {
    Insert,
    Update,
    Delete,
    Init,
}

impl fmt::Display for RowEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowEventKind::Insert => "INSERT",
            RowEventKind::Update => "UPDATE",
            RowEventKind::Delete => "DELETE",
            RowEventKind::Init => "INIT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinlogPosition {
    pub log_file: u32,
    pub log_pos: u64,
}

/// The canonical unit carried on the message bus.
#[derive(Debug, Clone)]
pub struct RowEvent {
    pub event_id: String,
    pub kind: RowEventKind,
    pub source_name: String,
    pub schema: String,
    pub table: String,
    /// Values for INSERT/DELETE/INIT; "after" values for UPDATE.
    pub values: HashMap<String, Value>,
    /// "before" values for UPDATE only.
    pub before_values: Option<HashMap<String, Value>>,
    pub binlog_position: Option<BinlogPosition>,
    pub server_id: Option<u32>,
}

impl RowEvent {
    pub fn new_event_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Resolved, runtime form of a single column's mapping.
#[derive(Debug, Clone)]
pub enum ColumnSpec {
    Copy { source_column: String },
    Static { value: Value },
    Transform { source_column: String, module: String, function: String },
}

/// Resolved, runtime form of one `config::MappingRuleConfig`.
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub source: String,
    pub source_table: String,
    pub target: String,
    pub target_table: String,
    pub primary_key: String,
    pub column_mapping: HashMap<String, ColumnSpec>,
    pub filter: Option<Value>,
    pub init_query: Option<String>,
}

impl MappingRule {
    pub fn mapping_key(&self) -> String {
        format!("{}.{}", self.source, self.source_table)
    }

    /// Resolves a validated `config::MappingRuleConfig` into its runtime form: splits
    /// `target` into connection/table, defaults `source_table` to the target's table name
    /// when unset, and splits each transform's `"module.function"` reference in two.
    pub fn from_config(cfg: &MappingRuleConfig) -> AppResult<Self> {
        let (target, target_table) = cfg.target_parts()?;
        let source_table = cfg.effective_source_table(&cfg.target).to_string();

        let mut column_mapping = HashMap::with_capacity(cfg.column_mapping.len());
        for (target_col, spec) in &cfg.column_mapping {
            let resolved = match spec {
                ColumnSpecConfig::Copy { source_column } => ColumnSpec::Copy {
                    source_column: source_column.clone().unwrap_or_else(|| target_col.clone()),
                },
                ColumnSpecConfig::Static { value } => ColumnSpec::Static { value: value.clone() },
                ColumnSpecConfig::Transform { source_column, function } => {
                    let (module, function) = function.split_once('.').unwrap_or(("builtin", function.as_str()));
                    ColumnSpec::Transform {
                        source_column: source_column.clone(),
                        module: module.to_string(),
                        function: function.to_string(),
                    }
                }
            };
            column_mapping.insert(target_col.clone(), resolved);
        }

        Ok(MappingRule {
            source: cfg.source.clone(),
            source_table,
            target: target.to_string(),
            target_table: target_table.to_string(),
            primary_key: cfg.primary_key.clone(),
            column_mapping,
            filter: cfg.filter.clone(),
            init_query: cfg.init_query.clone(),
        })
    }
}
