pub mod loader;

use loader::TransformRegistry;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

pub const BUILTIN_MODULE: &str = "builtin";

/// Applies column transforms: built-ins resolve in-process, anything else is dispatched
/// through the dynamically loaded module registry.
pub struct TransformEngine {
    registry: TransformRegistry,
}

impl TransformEngine {
    pub fn new(transform_dir: impl AsRef<Path>) -> Self {
        Self {
            registry: TransformRegistry::new(transform_dir),
        }
    }

    /// `name` is `"<module>.<function>"`. Contract: `transform(value, full_row,
    /// source_table) -> value` — user functions see the whole row and the table it came
    /// from, not just the one column being mapped, so a target column can be computed
    /// from several source columns at once.
    pub fn apply(&self, name: &str, value: &Value, full_row: &HashMap<String, Value>, source_table: &str) -> Value {
        let Some((module, function)) = name.split_once('.') else {
            return value.clone();
        };

        if module == BUILTIN_MODULE {
            apply_builtin(function, value)
        } else {
            self.registry.call(module, function, value, full_row, source_table)
        }
    }

    /// Pre-load every non-builtin module referenced in `names`, surfacing load failures
    /// as configuration errors before any worker starts.
    pub fn preload(&self, names: impl IntoIterator<Item = String>) -> crate::error::AppResult<()> {
        for name in names {
            if let Some((module, _)) = name.split_once('.') {
                if module != BUILTIN_MODULE {
                    self.registry.ensure_loaded(module)?;
                }
            }
        }
        Ok(())
    }
}

fn apply_builtin(function: &str, value: &Value) -> Value {
    match function {
        "uppercase" => map_str(value, |s| s.to_uppercase()),
        "lowercase" => map_str(value, |s| s.to_lowercase()),
        "trim" => map_str(value, |s| s.trim().to_string()),
        "length" => match value {
            Value::String(s) => Value::from(s.chars().count()),
            Value::Null => Value::Null,
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

fn map_str(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Null => Value::Null,
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_row() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn uppercase_and_lowercase() {
        let engine = TransformEngine::new("/tmp/quillcdc-test-transforms");
        assert_eq!(
            engine.apply("builtin.uppercase", &Value::from("John"), &empty_row(), "users"),
            Value::from("JOHN")
        );
        assert_eq!(
            engine.apply("builtin.lowercase", &Value::from("J@X"), &empty_row(), "users"),
            Value::from("j@x")
        );
    }

    #[test]
    fn null_passes_through() {
        let engine = TransformEngine::new("/tmp/quillcdc-test-transforms");
        assert_eq!(
            engine.apply("builtin.uppercase", &Value::Null, &empty_row(), "users"),
            Value::Null
        );
    }

    #[test]
    fn unresolvable_module_passes_value_through() {
        let engine = TransformEngine::new("/tmp/quillcdc-test-transforms-missing");
        let v = Value::from("unchanged");
        assert_eq!(engine.apply("nope.whatever", &v, &empty_row(), "users"), v);
    }
}
