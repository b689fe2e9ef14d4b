//! Shader Source Library
//!
//! Stores WGSL sources by identifier and caches compiled `ShaderModule`s by
//! the xxh3-128 hash of the final source, so two keys that only differ in
//! fixed-function state share one module.
//!
//! Sources that fail WGSL validation are reported as
//! [`BackendError::Other`] and never enter the module cache.
//!
//! Macros from a [`PipelineConfigKey`](super::PipelineConfigKey) are injected
//! as module-scope `const` declarations, in key order, ahead of the stage
//! source.

use std::fmt::Write as _;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

use crate::errors::BackendError;
use crate::pipeline::ShaderMacro;
use crate::pipeline::wgpu_factory::validation_scope;

#[derive(Default)]
pub struct ShaderLibrary {
    sources: RwLock<FxHashMap<String, String>>,
    /// xxh3-128 of final WGSL → compiled module.
    module_cache: Mutex<FxHashMap<u128, wgpu::ShaderModule>>,
}

impl ShaderLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// [Write] Registers or replaces the WGSL source for `id`.
    pub fn insert_source(&self, id: impl Into<String>, source: impl Into<String>) {
        self.sources.write().insert(id.into(), source.into());
    }

    /// [Write] Removes the source for `id`. Compiled modules stay cached.
    pub fn remove_source(&self, id: &str) -> Option<String> {
        self.sources.write().remove(id)
    }

    /// [Read]
    #[must_use]
    pub fn contains_source(&self, id: &str) -> bool {
        self.sources.read().contains_key(id)
    }

    /// Builds the final WGSL for stage `id` with `macros` prepended.
    pub fn compose(&self, id: &str, macros: &[ShaderMacro]) -> Result<String, BackendError> {
        let sources = self.sources.read();
        let body = sources
            .get(id)
            .ok_or_else(|| BackendError::ShaderNotFound(id.to_string()))?;
        Ok(compose_stage_source(macros, body))
    }

    /// Returns a cached module for the composed source of `id`, compiling it
    /// on first use.
    pub fn get_or_compile(
        &self,
        device: &wgpu::Device,
        id: &str,
        macros: &[ShaderMacro],
    ) -> Result<wgpu::ShaderModule, BackendError> {
        let source = self.compose(id, macros)?;
        let hash = xxh3_128(source.as_bytes());

        if let Some(module) = self.module_cache.lock().get(&hash) {
            return Ok(module.clone());
        }

        log::debug!("Compiling shader module '{id}' ({hash:032x})");
        let module = validation_scope(device, &format!("shader '{id}'"), || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(id),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })?;

        // A racing compile of the same source may have landed first.
        Ok(self
            .module_cache
            .lock()
            .entry(hash)
            .or_insert(module)
            .clone())
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        self.module_cache.lock().len()
    }

    pub fn clear_modules(&self) {
        self.module_cache.lock().clear();
    }
}

/// Prepends one `const NAME = VALUE;` line per macro, in order.
#[must_use]
pub fn compose_stage_source(macros: &[ShaderMacro], body: &str) -> String {
    let mut out = String::with_capacity(body.len() + macros.len() * 24);
    for m in macros {
        let _ = writeln!(out, "const {} = {};", m.name, m.value);
    }
    out.push_str(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_are_prepended_in_order() {
        let macros = [ShaderMacro::new("B", "2"), ShaderMacro::new("A", "true")];
        let src = compose_stage_source(&macros, "fn main() {}");
        assert_eq!(src, "const B = 2;\nconst A = true;\nfn main() {}");
    }

    #[test]
    fn missing_source_is_reported() {
        let lib = ShaderLibrary::new();
        lib.insert_source("present", "fn f() {}");
        assert!(lib.contains_source("present"));
        assert_eq!(
            lib.compose("absent", &[]),
            Err(BackendError::ShaderNotFound("absent".to_string()))
        );
    }
}
