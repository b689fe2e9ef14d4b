use std::time::SystemTime;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::pipeline::PipelineConfigKey;

/// Current key of a registered material.
#[derive(Debug, Clone)]
pub struct RegisteredMaterial {
    pub key: PipelineConfigKey,
    pub registered_at: SystemTime,
}

/// What changed when a key was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistrationResult {
    /// The material name was not known before.
    pub is_new: bool,
    /// The name was known and now maps to a different key.
    pub was_updated: bool,
}

/// Material name → current key.
#[derive(Default)]
pub(crate) struct MaterialRegistry {
    materials: RwLock<FxHashMap<String, RegisteredMaterial>>,
}

impl MaterialRegistry {
    /// [Write] Stores `key` under its material name. Returns the outcome and
    /// the key it replaced, if any.
    pub fn register(
        &self,
        key: PipelineConfigKey,
    ) -> (RegistrationResult, Option<PipelineConfigKey>) {
        let mut materials = self.materials.write();
        match materials.get_mut(key.material_name()) {
            Some(existing) if existing.key == key => (RegistrationResult::default(), None),
            Some(existing) => {
                let old = std::mem::replace(&mut existing.key, key);
                existing.registered_at = SystemTime::now();
                (
                    RegistrationResult {
                        is_new: false,
                        was_updated: true,
                    },
                    Some(old),
                )
            }
            None => {
                materials.insert(
                    key.material_name().to_string(),
                    RegisteredMaterial {
                        key,
                        registered_at: SystemTime::now(),
                    },
                );
                (
                    RegistrationResult {
                        is_new: true,
                        was_updated: false,
                    },
                    None,
                )
            }
        }
    }

    /// [Read]
    pub fn get(&self, name: &str) -> Option<PipelineConfigKey> {
        self.materials.read().get(name).map(|m| m.key.clone())
    }

    /// [Write]
    pub fn remove(&self, name: &str) -> Option<PipelineConfigKey> {
        self.materials.write().remove(name).map(|m| m.key)
    }

    /// [Read] `true` if `name` still maps to exactly `key`.
    pub fn is_current(&self, name: &str, key: &PipelineConfigKey) -> bool {
        self.materials
            .read()
            .get(name)
            .is_some_and(|m| m.key == *key)
    }

    /// [Read]
    pub fn keys(&self) -> Vec<PipelineConfigKey> {
        self.materials.read().values().map(|m| m.key.clone()).collect()
    }

    /// [Read] All registrations, sorted by material name.
    pub fn entries(&self) -> Vec<RegisteredMaterial> {
        let mut entries: Vec<_> = self.materials.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key.material_name().cmp(b.key.material_name()));
        entries
    }

    pub fn len(&self) -> usize {
        self.materials.read().len()
    }
}
