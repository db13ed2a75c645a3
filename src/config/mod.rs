//! JSON configuration contract: load, parse, and eagerly validate before any worker starts.

use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub sources: HashMap<String, ConnectionConfig>,
    pub targets: HashMap<String, TargetConfig>,
    pub replication: HashMap<String, ReplicationConfig>,
    pub mapping: Vec<MappingRuleConfig>,
    #[serde(default)]
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_flush_interval")]
    pub batch_flush_interval: f64,
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_flush_interval() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConfig {
    pub server_id: u32,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub log_pos: Option<u32>,
    #[serde(default)]
    pub resume_stream: bool,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingRuleConfig {
    pub source: String,
    #[serde(default)]
    pub source_table: Option<String>,
    pub target: String,
    pub primary_key: String,
    pub column_mapping: HashMap<String, ColumnSpecConfig>,
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    #[serde(default)]
    pub init_query: Option<String>,
}

impl MappingRuleConfig {
    /// The source table this rule reads from: `source_table` if set, else the mapping key
    /// (`"{source}.{table}"`) with the source component stripped.
    pub fn effective_source_table<'a>(&'a self, mapping_key: &'a str) -> &'a str {
        self.source_table
            .as_deref()
            .unwrap_or_else(|| mapping_key.split_once('.').map(|(_, t)| t).unwrap_or(mapping_key))
    }

    pub fn target_parts(&self) -> AppResult<(&str, &str)> {
        self.target.split_once('.').ok_or_else(|| {
            AppError::InvalidConfig(format!(
                "mapping target '{}' must be of the form \"target_name.table\"",
                self.target
            ))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSpecConfig {
    Copy {
        #[serde(default)]
        source_column: Option<String>,
    },
    Static {
        value: serde_json::Value,
    },
    Transform {
        source_column: String,
        function: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_metrics_port() -> u16 {
    8080
}

impl AppConfig {
    pub fn load(path: &str) -> AppResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        validate_config(&config)?;
        Ok(config)
    }
}

fn validate_config(cfg: &AppConfig) -> AppResult<()> {
    if cfg.sources.is_empty() {
        return Err(AppError::InvalidConfig(
            "config: must define at least one entry under \"sources\"".into(),
        ));
    }
    if cfg.targets.is_empty() {
        return Err(AppError::InvalidConfig(
            "config: must define at least one entry under \"targets\"".into(),
        ));
    }
    if cfg.mapping.is_empty() {
        return Err(AppError::InvalidConfig(
            "config: must define at least one entry under \"mapping\"".into(),
        ));
    }

    for name in cfg.sources.keys() {
        if !cfg.replication.contains_key(name) {
            return Err(AppError::InvalidConfig(format!(
                "config: source '{name}' has no matching entry in \"replication\""
            )));
        }
    }

    for (i, rule) in cfg.mapping.iter().enumerate() {
        let prefix = format!("config: mapping[{i}]");

        if !cfg.sources.contains_key(&rule.source) {
            return Err(AppError::InvalidConfig(format!(
                "{prefix}: unknown source '{}'",
                rule.source
            )));
        }

        let (target_name, target_table) = rule.target_parts()?;
        if !cfg.targets.contains_key(target_name) {
            return Err(AppError::InvalidConfig(format!(
                "{prefix}: unknown target '{target_name}' (referenced as '{}')",
                rule.target
            )));
        }
        if target_table.trim().is_empty() {
            return Err(AppError::InvalidConfig(format!(
                "{prefix}: target table name must not be empty"
            )));
        }

        if rule.primary_key.trim().is_empty() {
            return Err(AppError::InvalidConfig(format!(
                "{prefix}: primary_key must not be empty"
            )));
        }

        if rule.column_mapping.is_empty() {
            return Err(AppError::InvalidConfig(format!(
                "{prefix}: column_mapping must not be empty"
            )));
        }

        for (target_col, spec) in &rule.column_mapping {
            if let ColumnSpecConfig::Transform { function, .. } = spec {
                if !function.contains('.') {
                    return Err(AppError::InvalidConfig(format!(
                        "{prefix}.column_mapping['{target_col}']: transform function '{function}' must be of the form \"module.function\""
                    )));
                }
            }
        }

        if let Some(filter) = &rule.filter {
            crate::filter::validate_predicate(filter).map_err(|e| {
                AppError::InvalidConfig(format!("{prefix}.filter: {e}"))
            })?;
        }
    }

    for (name, target) in &cfg.targets {
        if target.batch_size == 0 {
            return Err(AppError::InvalidConfig(format!(
                "config: targets['{name}'].batch_size must be > 0"
            )));
        }
        if !(target.batch_flush_interval > 0.0) {
            return Err(AppError::InvalidConfig(format!(
                "config: targets['{name}'].batch_flush_interval must be > 0"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "sources": { "src": { "host": "127.0.0.1", "port": 3306, "user": "u", "password": "p", "database": "appdb" } },
            "targets": { "tgt": { "host": "127.0.0.1", "port": 3306, "user": "u", "password": "p", "database": "appdb" } },
            "replication": { "src": { "server_id": 1001 } },
            "mapping": [
                {
                    "source": "src",
                    "target": "tgt.users",
                    "primary_key": "id",
                    "column_mapping": { "id": { "kind": "copy" } }
                }
            ]
        })
    }

    #[test]
    fn accepts_minimal_valid_config() {
        let cfg: AppConfig = serde_json::from_value(minimal_json()).unwrap();
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn rejects_unknown_target_reference() {
        let mut v = minimal_json();
        v["mapping"][0]["target"] = serde_json::json!("nope.users");
        let cfg: AppConfig = serde_json::from_value(v).unwrap();
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_empty_column_mapping() {
        let mut v = minimal_json();
        v["mapping"][0]["column_mapping"] = serde_json::json!({});
        let cfg: AppConfig = serde_json::from_value(v).unwrap();
        assert!(validate_config(&cfg).is_err());
    }
}
