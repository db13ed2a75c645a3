//! Dynamic loading of user transform functions from shared libraries.
//!
//! A mapping rule names a transform as `"<module>.<function>"`. `<module>` resolves to a
//! shared library living next to the config file (or under `transform_dir`), loaded once
//! per process via `libloading`. The resolved symbol must match:
//!
//!   extern "C" fn(ptr: *const u8, len: usize, out_ptr: *mut *mut u8, out_len: *mut usize) -> i32
//!
//! Input/output are length-prefixed JSON so user code only needs `libc`-level types. The
//! input object is `{"value": <column value>, "row": <full row>, "source_table": <name>}`
//! — the transform contract is `transform(value, full_row, source_table) -> value` —
//! and the output is the transformed value alone. A non-zero return means "pass the
//! original value through", logged once per (module, function) pair.

use crate::error::{AppError, AppResult};
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

type TransformFfi = unsafe extern "C" fn(*const u8, usize, *mut *mut u8, *mut usize) -> i32;

pub struct TransformModule {
    _lib: Library,
}

pub struct TransformRegistry {
    dir: PathBuf,
    modules: Mutex<HashMap<String, TransformModule>>,
    warned: Mutex<std::collections::HashSet<(String, String)>>,
}

impl TransformRegistry {
    pub fn new(transform_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: transform_dir.as_ref().to_path_buf(),
            modules: Mutex::new(HashMap::new()),
            warned: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Resolve and cache the shared library for `module`, failing fast (a configuration
    /// error) if it cannot be loaded.
    pub fn ensure_loaded(&self, module: &str) -> AppResult<()> {
        let mut modules = self.modules.lock().expect("transform registry mutex poisoned");
        if modules.contains_key(module) {
            return Ok(());
        }

        let candidate = self.dir.join(format!("lib{module}.so"));
        // SAFETY: the loaded library is expected to export symbols matching TransformFfi;
        // the process trusts the configured transform_dir as it would any plugin path.
        let lib = unsafe { Library::new(&candidate) }.map_err(|e| {
            AppError::TransformLoad(module.to_string(), format!("{}: {e}", candidate.display()))
        })?;

        modules.insert(module.to_string(), TransformModule { _lib: lib });
        Ok(())
    }

    /// Call `module.function(value, full_row, source_table)`. On any runtime failure,
    /// logs a rate-limited warning (once per (module, function) pair) and returns the
    /// original value unchanged.
    pub fn call(
        &self,
        module: &str,
        function: &str,
        value: &serde_json::Value,
        full_row: &std::collections::HashMap<String, serde_json::Value>,
        source_table: &str,
    ) -> serde_json::Value {
        match self.try_call(module, function, value, full_row, source_table) {
            Ok(v) => v,
            Err(e) => {
                let mut warned = self.warned.lock().expect("transform registry mutex poisoned");
                let key = (module.to_string(), function.to_string());
                if warned.insert(key) {
                    tracing::warn!(module, function, error = %e, "transform failed, passing value through");
                }
                value.clone()
            }
        }
    }

    fn try_call(
        &self,
        module: &str,
        function: &str,
        value: &serde_json::Value,
        full_row: &std::collections::HashMap<String, serde_json::Value>,
        source_table: &str,
    ) -> AppResult<serde_json::Value> {
        self.ensure_loaded(module)?;
        let modules = self.modules.lock().expect("transform registry mutex poisoned");
        let entry = modules.get(module).ok_or_else(|| {
            AppError::TransformLoad(module.to_string(), "module vanished from registry".into())
        })?;

        let payload = serde_json::json!({
            "value": value,
            "row": full_row,
            "source_table": source_table,
        });
        let input = serde_json::to_vec(&payload)?;
        // SAFETY: symbol name/signature is the documented TransformFfi ABI; callers are
        // trusted plugin authors, same as any dlopen-based extension point.
        let result: i32 = unsafe {
            let symbol: Symbol<TransformFfi> = entry
                ._lib
                .get(function.as_bytes())
                .map_err(|e| AppError::TransformFailed {
                    module: module.to_string(),
                    function: function.to_string(),
                    detail: e.to_string(),
                })?;

            let mut out_ptr: *mut u8 = std::ptr::null_mut();
            let mut out_len: usize = 0;
            let rc = symbol(input.as_ptr(), input.len(), &mut out_ptr, &mut out_len);
            if rc == 0 {
                let bytes = std::slice::from_raw_parts(out_ptr, out_len).to_vec();
                return serde_json::from_slice(&bytes).map_err(AppError::from);
            }
            rc
        };

        Err(AppError::TransformFailed {
            module: module.to_string(),
            function: function.to_string(),
            detail: format!("non-zero return code {result}"),
        })
    }
}
