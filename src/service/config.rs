//! Cache Service Settings
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_pipeline_cache::{CacheServiceConfig, LruCacheConfig};
//!
//! let config = CacheServiceConfig {
//!     cache: LruCacheConfig { capacity: 512, ..Default::default() },
//!     precompile_on_register: true,
//!     ..Default::default()
//! };
//! ```

use crate::cache::LruCacheConfig;
use crate::errors::{CacheError, Result};

/// Settings for a [`CacheService`](super::CacheService).
///
/// # Defaults
///
/// | Field                       | Default |
/// |-----------------------------|---------|
/// | `max_parallel_creations`    | 4       |
/// | `precompile_batch_size`     | 8       |
/// | `precompile_on_register`    | false   |
/// | `growth_factor`             | 1.25    |
/// | `max_capacity`              | 4096    |
/// | `utilization_threshold`     | 0.9     |
/// | `low_hit_rate_threshold`    | 0.6     |
/// | `min_lookups_for_hit_rate`  | 100     |
/// | `budget_shrink_step`        | 16      |
/// | `min_capacity`              | 32      |
/// | `pressure_cooldown_frames`  | 120     |
/// | `optimize_every_ticks`      | 10      |
#[derive(Debug, Clone, PartialEq)]
pub struct CacheServiceConfig {
    /// Settings of the underlying LRU cache.
    pub cache: LruCacheConfig,

    /// Upper bound on concurrent background pipeline creations.
    pub max_parallel_creations: usize,

    /// Queued registrations that trigger a background batch.
    pub precompile_batch_size: usize,

    /// Enqueue newly registered materials for background creation.
    pub precompile_on_register: bool,

    /// Capacity multiplier applied when the cache is nearly full.
    pub growth_factor: f64,

    /// Optimization never grows the cache past this.
    pub max_capacity: usize,

    /// Fill ratio above which optimization grows the cache.
    pub utilization_threshold: f64,

    /// Hit rate under which optimization logs a warning.
    pub low_hit_rate_threshold: f64,

    /// Lookups required before the hit rate is judged.
    pub min_lookups_for_hit_rate: u64,

    /// Entries removed from capacity per over-budget frame.
    pub budget_shrink_step: usize,

    /// Budget shrinking never goes below this.
    pub min_capacity: usize,

    /// Consecutive in-budget frames that end a pressure period.
    pub pressure_cooldown_frames: u32,

    /// Maintenance ticks between automatic optimization passes. 0 disables.
    pub optimize_every_ticks: u32,
}

impl Default for CacheServiceConfig {
    fn default() -> Self {
        Self {
            cache: LruCacheConfig::default(),
            max_parallel_creations: 4,
            precompile_batch_size: 8,
            precompile_on_register: false,
            growth_factor: 1.25,
            max_capacity: 4096,
            utilization_threshold: 0.9,
            low_hit_rate_threshold: 0.6,
            min_lookups_for_hit_rate: 100,
            budget_shrink_step: 16,
            min_capacity: 32,
            pressure_cooldown_frames: 120,
            optimize_every_ticks: 10,
        }
    }
}

impl CacheServiceConfig {
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;

        let invalid = |msg: String| Err(CacheError::InvalidConfiguration(msg));
        if self.max_parallel_creations == 0 {
            return invalid("max_parallel_creations must be at least 1".into());
        }
        if self.precompile_batch_size == 0 {
            return invalid("precompile_batch_size must be at least 1".into());
        }
        if !(self.growth_factor.is_finite() && self.growth_factor > 1.0) {
            return invalid(format!("growth_factor {} must be > 1.0", self.growth_factor));
        }
        if !(0.0..=1.0).contains(&self.utilization_threshold) {
            return invalid(format!(
                "utilization_threshold {} must be within [0, 1]",
                self.utilization_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.low_hit_rate_threshold) {
            return invalid(format!(
                "low_hit_rate_threshold {} must be within [0, 1]",
                self.low_hit_rate_threshold
            ));
        }
        if self.min_capacity == 0 {
            return invalid("min_capacity must be at least 1".into());
        }
        if self.min_capacity > self.max_capacity {
            return invalid(format!(
                "min_capacity {} exceeds max_capacity {}",
                self.min_capacity, self.max_capacity
            ));
        }
        if self.cache.capacity > self.max_capacity {
            return invalid(format!(
                "initial capacity {} exceeds max_capacity {}",
                self.cache.capacity, self.max_capacity
            ));
        }
        Ok(())
    }
}
