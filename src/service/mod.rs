//! Pipeline Cache Service
//!
//! [`CacheService`] is the engine-facing entry point. It owns:
//! - the material registry (name → current [`PipelineConfigKey`])
//! - the [`LruCache`] of native handles
//! - a small tokio runtime for background precompilation
//! - frame-budget tracking that shrinks the cache under pressure
//!
//! # Example
//!
//! ```rust,ignore
//! let service = CacheService::new(CacheServiceConfig::default(), factory)?;
//!
//! service.register_material(
//!     PipelineConfigKey::builder("Glass").pixel_shader("glass_ps").build()?,
//! )?;
//!
//! let first = service.get_or_create("Glass")?;   // miss, builds
//! let again = service.get_or_create("Glass")?;   // hit
//! assert!(Arc::ptr_eq(&first.handle, &again.handle));
//! ```
//!
//! Blocking calls (`precompile_all`, `flush_precompile_queue`) and dropping
//! the service must happen outside of an async context.

pub mod budget;
pub mod catalog;
pub mod config;
pub mod precompile;
pub(crate) mod registry;

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheLookup, CacheStatistics, LruCache};
use crate::errors::{CacheError, Result};
use crate::pipeline::{PipelineConfigKey, PipelineObjectFactory};
use crate::utils::Stopwatch;
use crate::utils::time::as_millis_f64;

use budget::{BudgetAction, BudgetMonitor, FrameBudgetSignal, RenderEngineHooks};
use catalog::{Catalog, CatalogEntry};
use config::CacheServiceConfig;
use precompile::{PrecompileReport, precompile_batch};
use registry::MaterialRegistry;
pub use registry::{RegisteredMaterial, RegistrationResult};

/// A resolved pipeline.
#[derive(Debug)]
pub struct PipelineResult<H> {
    pub handle: Arc<H>,
    pub was_cached: bool,
    /// Factory time for this call; 0 on a hit.
    pub creation_duration_ms: f64,
    /// Total time spent inside the call.
    pub lookup_duration_ms: f64,
}

/// What an [`optimize_cache`](CacheService::optimize_cache) pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OptimizationReport {
    /// The pass was skipped because the engine is over its frame budget.
    pub skipped_under_pressure: bool,
    pub previous_capacity: usize,
    pub new_capacity: usize,
    pub expired: usize,
    pub hit_rate: f64,
    pub low_hit_rate: bool,
}

/// Service-level statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStatistics {
    #[serde(flatten)]
    pub cache: CacheStatistics,
    pub registered_materials: usize,
    pub memory_mb: f64,
    pub precompiled: u64,
    pub precompile_failures: u64,
    pub pending_precompile: usize,
    pub stale_references: u64,
    pub under_pressure: bool,
    pub over_budget_frames: u64,
}

impl ServiceStatistics {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ServiceCounters {
    pub precompiled: AtomicU64,
    pub precompile_failures: AtomicU64,
    pub stale_references: AtomicU64,
}

/// State shared with background precompilation tasks.
pub(crate) struct Shared<F: PipelineObjectFactory> {
    pub factory: F,
    pub cache: Arc<LruCache<PipelineConfigKey, F::Handle>>,
    pub semaphore: Arc<Semaphore>,
    pub registry: MaterialRegistry,
    pub counters: ServiceCounters,
    /// Reports of background batches not yet collected by a flush.
    pub background_report: Mutex<PrecompileReport>,
}

impl<F: PipelineObjectFactory> Shared<F> {
    pub fn resolve(&self, key: &PipelineConfigKey) -> Result<CacheLookup<F::Handle>> {
        self.cache.get_or_create(key, || self.factory.create(key))
    }

    /// `true` while `key` is still the registered key of its material.
    pub fn is_current(&self, key: &PipelineConfigKey) -> bool {
        self.registry.is_current(key.material_name(), key)
    }
}

/// Engine-facing pipeline cache.
pub struct CacheService<F: PipelineObjectFactory> {
    config: CacheServiceConfig,
    shared: Arc<Shared<F>>,
    precompile_queue: Mutex<VecDeque<PipelineConfigKey>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    budget: Mutex<BudgetMonitor>,
    budget_tx: flume::Sender<FrameBudgetSignal>,
    budget_rx: flume::Receiver<FrameBudgetSignal>,
    maintenance_ticks: AtomicU64,
    shutdown: CancellationToken,
    runtime: Runtime,
}

impl<F: PipelineObjectFactory> CacheService<F> {
    pub fn new(config: CacheServiceConfig, factory: F) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_parallel_creations)
            .thread_name("pipeline-precompile")
            .build()?;

        let cache = LruCache::new(config.cache.clone())?;
        let (budget_tx, budget_rx) = flume::unbounded();

        log::info!(
            "Pipeline cache service started (capacity {}, {} parallel creations)",
            config.cache.capacity,
            config.max_parallel_creations
        );

        Ok(Self {
            shared: Arc::new(Shared {
                factory,
                cache,
                semaphore: Arc::new(Semaphore::new(config.max_parallel_creations)),
                registry: MaterialRegistry::default(),
                counters: ServiceCounters::default(),
                background_report: Mutex::new(PrecompileReport::default()),
            }),
            precompile_queue: Mutex::new(VecDeque::new()),
            background: Mutex::new(Vec::new()),
            budget: Mutex::new(BudgetMonitor::default()),
            budget_tx,
            budget_rx,
            maintenance_ticks: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            runtime,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CacheServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<LruCache<PipelineConfigKey, F::Handle>> {
        &self.shared.cache
    }

    #[must_use]
    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Maps the key's material name to `key`.
    ///
    /// Re-registering a name with a different key replaces the mapping but
    /// leaves the old key's cache entry in place; it ages out through LRU.
    /// Use [`update_material`](Self::update_material) to drop it eagerly.
    pub fn register_material(&self, key: PipelineConfigKey) -> Result<RegistrationResult> {
        let (result, _) = self.register_inner(key);
        Ok(result)
    }

    /// Like [`register_material`](Self::register_material), but disposes the
    /// cache entry of the replaced key.
    pub fn update_material(&self, key: PipelineConfigKey) -> Result<RegistrationResult> {
        let (result, replaced) = self.register_inner(key);
        if let Some(old) = replaced
            && self.shared.cache.remove(&old)
        {
            log::debug!("Evicted superseded pipeline for '{}'", old.material_name());
        }
        Ok(result)
    }

    fn register_inner(
        &self,
        key: PipelineConfigKey,
    ) -> (RegistrationResult, Option<PipelineConfigKey>) {
        let (result, replaced) = self.shared.registry.register(key.clone());
        if let Some(old) = &replaced {
            self.discard_queued(old);
        }
        if result.is_new {
            log::debug!("Registered material '{}'", key.material_name());
        } else if result.was_updated {
            log::debug!("Material '{}' re-keyed", key.material_name());
        }
        if (result.is_new || result.was_updated) && self.config.precompile_on_register {
            self.enqueue_precompile([key]);
        }
        (result, replaced)
    }

    /// Removes the material mapping and its cache entry.
    pub fn unregister_material(&self, material_name: &str) -> bool {
        match self.shared.registry.remove(material_name) {
            Some(key) => {
                self.discard_queued(&key);
                self.shared.cache.remove(&key);
                log::debug!("Unregistered material '{material_name}'");
                true
            }
            None => false,
        }
    }

    /// [Read] Current key of a registered material.
    #[must_use]
    pub fn material_key(&self, material_name: &str) -> Option<PipelineConfigKey> {
        self.shared.registry.get(material_name)
    }

    #[must_use]
    pub fn registered_materials(&self) -> Vec<RegisteredMaterial> {
        self.shared.registry.entries()
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolves a material by name, registering a default key for names that
    /// were never registered.
    pub fn get_or_create(&self, material_name: &str) -> Result<PipelineResult<F::Handle>> {
        let watch = Stopwatch::start();
        if material_name.trim().is_empty() {
            return Err(CacheError::InvalidArgument(
                "material name must not be empty".to_string(),
            ));
        }

        let key = match self.shared.registry.get(material_name) {
            Some(key) => key,
            None => {
                let key = PipelineConfigKey::default_for_material(material_name)?;
                log::debug!("Synthesizing default pipeline for '{material_name}'");
                self.register_inner(key.clone());
                self.shared.registry.get(material_name).unwrap_or(key)
            }
        };
        self.resolve_registered(material_name, &key, &watch)
    }

    /// Registers `key` if needed and resolves it.
    pub fn get_or_create_key(&self, key: &PipelineConfigKey) -> Result<PipelineResult<F::Handle>> {
        let watch = Stopwatch::start();
        self.register_inner(key.clone());
        self.resolve_registered(key.material_name(), key, &watch)
    }

    /// Builds a key from explicit shader references (on top of `base` when
    /// given), registers it under `material_name` and resolves it.
    pub fn create_from_descriptor(
        &self,
        material_name: &str,
        vertex_shader: &str,
        pixel_shader: &str,
        base: Option<&PipelineConfigKey>,
    ) -> Result<PipelineResult<F::Handle>> {
        if vertex_shader.is_empty() || pixel_shader.is_empty() {
            return Err(CacheError::InvalidArgument(format!(
                "material '{material_name}' needs both a vertex and a pixel shader reference"
            )));
        }
        let builder = match base {
            Some(base) => base.to_builder().material_name(material_name),
            None => PipelineConfigKey::builder(material_name),
        };
        let key = builder
            .vertex_shader(vertex_shader)
            .pixel_shader(pixel_shader)
            .build()?;
        self.get_or_create_key(&key)
    }

    fn resolve_registered(
        &self,
        material_name: &str,
        key: &PipelineConfigKey,
        watch: &Stopwatch,
    ) -> Result<PipelineResult<F::Handle>> {
        let lookup = self.shared.resolve(key)?;

        if !self.shared.registry.is_current(material_name, key) {
            if !lookup.was_cached {
                self.shared.cache.remove(key);
            }
            self.shared
                .counters
                .stale_references
                .fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::StaleReference(material_name.to_string()));
        }

        Ok(PipelineResult {
            handle: lookup.value,
            was_cached: lookup.was_cached,
            creation_duration_ms: lookup.creation_duration.map_or(0.0, as_millis_f64),
            lookup_duration_ms: watch.elapsed_ms(),
        })
    }

    // ========================================================================
    // Cache management
    // ========================================================================

    /// Removes only the cache entry of the material's current key.
    pub fn remove(&self, material_name: &str) -> bool {
        self.shared.registry
            .get(material_name)
            .is_some_and(|key| self.shared.cache.remove(&key))
    }

    /// Disposes every cached pipeline. Registrations are kept.
    pub fn clear(&self) -> usize {
        self.shared.cache.clear()
    }

    pub fn resize(&self, capacity: usize) -> Result<()> {
        self.shared.cache.resize(capacity)
    }

    pub fn force_cleanup(&self) -> usize {
        self.shared.cache.force_cleanup()
    }

    /// Grows the cache when it is nearly full, expires old entries and
    /// reports a low hit rate. Does nothing while over the frame budget.
    pub fn optimize_cache(&self) -> Result<OptimizationReport> {
        self.drain_budget_signals()?;

        let cache = &self.shared.cache;
        let stats = cache.statistics();
        let mut report = OptimizationReport {
            previous_capacity: stats.capacity,
            new_capacity: stats.capacity,
            hit_rate: stats.hit_rate,
            ..Default::default()
        };

        if self.budget.lock().under_pressure() {
            log::debug!("Skipping cache optimization while over frame budget");
            report.skipped_under_pressure = true;
            return Ok(report);
        }

        if stats.utilization() > self.config.utilization_threshold {
            let grown = (stats.capacity as f64 * self.config.growth_factor).ceil() as usize;
            let target = grown.min(self.config.max_capacity).max(stats.capacity);
            if target != stats.capacity {
                cache.resize(target)?;
                report.new_capacity = target;
            }
        }

        report.expired = cache.force_cleanup();

        if stats.lookups() >= self.config.min_lookups_for_hit_rate
            && stats.hit_rate < self.config.low_hit_rate_threshold
        {
            report.low_hit_rate = true;
            log::warn!(
                "Pipeline cache hit rate {:.1}% is below {:.1}% ({} lookups)",
                stats.hit_rate * 100.0,
                self.config.low_hit_rate_threshold * 100.0,
                stats.lookups()
            );
        }
        Ok(report)
    }

    // ========================================================================
    // Precompilation
    // ========================================================================

    /// Resolves every registered material on the background pool and waits
    /// for the result.
    pub fn precompile_all(&self, token: &CancellationToken) -> PrecompileReport {
        let keys = self.shared.registry.keys();
        log::info!("Precompiling {} registered pipelines", keys.len());
        let token = token.clone();
        let shutdown = self.shutdown.clone();
        let shared = self.shared.clone();
        self.runtime.block_on(async move {
            tokio::select! {
                report = precompile_batch(shared, keys, token.clone()) => report,
                () = shutdown.cancelled() => {
                    token.cancel();
                    PrecompileReport::default()
                }
            }
        })
    }

    /// Starts whatever is queued, then waits for every background batch.
    /// Returns the combined report of all batches finished since the last
    /// flush.
    pub fn flush_precompile_queue(&self) -> PrecompileReport {
        let pending: Vec<_> = self.precompile_queue.lock().drain(..).collect();
        if !pending.is_empty() {
            self.spawn_batch(pending);
        }

        let handles = std::mem::take(&mut *self.background.lock());
        let results = self
            .runtime
            .block_on(futures::future::join_all(handles));
        for result in results {
            if let Err(err) = result {
                log::warn!("Precompile batch did not finish: {err}");
            }
        }
        std::mem::take(&mut *self.shared.background_report.lock())
    }

    fn enqueue_precompile(&self, keys: impl IntoIterator<Item = PipelineConfigKey>) {
        let batch_size = self.config.precompile_batch_size;
        let mut batches = Vec::new();
        {
            let mut queue = self.precompile_queue.lock();
            queue.extend(keys);
            while queue.len() >= batch_size {
                batches.push(queue.drain(..batch_size).collect::<Vec<_>>());
            }
        }
        for batch in batches {
            self.spawn_batch(batch);
        }
    }

    /// Drops a key that is no longer registered from the pending queue.
    /// Batches already running skip it through the registry check.
    fn discard_queued(&self, key: &PipelineConfigKey) {
        self.precompile_queue.lock().retain(|queued| queued != key);
    }

    fn spawn_batch(&self, keys: Vec<PipelineConfigKey>) {
        let shared = self.shared.clone();
        let token = self.shutdown.child_token();
        let handle = self.runtime.spawn(async move {
            let report = precompile_batch(shared.clone(), keys, token).await;
            shared.background_report.lock().merge(&report);
        });
        let mut background = self.background.lock();
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    // ========================================================================
    // Catalogue
    // ========================================================================

    /// Writes every registered key with its cache metadata. Returns the
    /// number of keys written.
    pub fn save_catalog<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let resident: FxHashMap<PipelineConfigKey, (SystemTime, u64)> = self
            .shared
            .cache
            .entries_snapshot()
            .into_iter()
            .map(|s| (s.key, (s.created_at, s.access_count)))
            .collect();

        let entries: Vec<_> = self
            .shared
            .registry
            .entries()
            .into_iter()
            .map(|m| {
                let (created_at, access_count) = resident
                    .get(&m.key)
                    .copied()
                    .unwrap_or((m.registered_at, 0));
                CatalogEntry {
                    key: m.key,
                    created_at,
                    access_count,
                }
            })
            .collect();

        let catalog = Catalog {
            saved_at: SystemTime::now(),
            entries,
        };
        catalog.write_to(writer)?;
        log::info!("Saved pipeline catalogue with {} keys", catalog.entries.len());
        Ok(catalog.entries.len())
    }

    /// Registers every key in the catalogue and queues them for background
    /// creation. Nothing is inserted into the cache directly.
    pub fn load_catalog<R: Read>(&self, reader: &mut R) -> Result<usize> {
        let catalog = Catalog::read_from(reader)?;
        let count = catalog.entries.len();

        let mut to_precompile = Vec::with_capacity(count);
        for entry in catalog.entries {
            let (result, replaced) = self.shared.registry.register(entry.key.clone());
            if let Some(old) = &replaced {
                self.discard_queued(old);
            }
            if !result.is_new && !result.was_updated {
                log::trace!("Catalogue key for '{}' already registered", entry.key.material_name());
            }
            to_precompile.push(entry.key);
        }
        self.enqueue_precompile(to_precompile);

        log::info!("Loaded pipeline catalogue with {count} keys");
        Ok(count)
    }

    // ========================================================================
    // Budget & statistics
    // ========================================================================

    /// Channel for engines that report frame timing from another thread.
    /// Signals are applied on the next maintenance tick, optimization pass or
    /// statistics call.
    #[must_use]
    pub fn budget_sender(&self) -> flume::Sender<FrameBudgetSignal> {
        self.budget_tx.clone()
    }

    fn apply_budget_signal(&self, signal: &FrameBudgetSignal) -> Result<()> {
        let action = self
            .budget
            .lock()
            .observe(signal, self.config.pressure_cooldown_frames);
        match action {
            BudgetAction::Shrink => {
                let current = self.shared.cache.capacity();
                let target = current
                    .saturating_sub(self.config.budget_shrink_step)
                    .max(self.config.min_capacity)
                    .min(current);
                if target != current {
                    log::info!(
                        "Frame {:.2} ms over {:.2} ms budget, shrinking pipeline cache",
                        signal.frame_time_ms,
                        signal.budget_ms
                    );
                    self.shared.cache.resize(target)?;
                }
            }
            BudgetAction::PressureRelieved => {
                log::info!("Frame budget pressure relieved");
            }
            BudgetAction::None => {}
        }
        Ok(())
    }

    fn drain_budget_signals(&self) -> Result<()> {
        for signal in self.budget_rx.try_iter() {
            self.apply_budget_signal(&signal)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn under_budget_pressure(&self) -> bool {
        if let Err(err) = self.drain_budget_signals() {
            log::warn!("Failed to apply frame budget signal: {err}");
        }
        self.budget.lock().under_pressure()
    }

    pub fn statistics(&self) -> ServiceStatistics {
        if let Err(err) = self.drain_budget_signals() {
            log::warn!("Failed to apply frame budget signal: {err}");
        }
        let cache = self.shared.cache.statistics();
        let counters = &self.shared.counters;
        let budget = self.budget.lock();
        ServiceStatistics {
            memory_mb: cache.memory_estimate as f64 / (1024.0 * 1024.0),
            cache,
            registered_materials: self.shared.registry.len(),
            precompiled: counters.precompiled.load(Ordering::Relaxed),
            precompile_failures: counters.precompile_failures.load(Ordering::Relaxed),
            pending_precompile: self.precompile_queue.lock().len(),
            stale_references: counters.stale_references.load(Ordering::Relaxed),
            under_pressure: budget.under_pressure(),
            over_budget_frames: budget.over_budget_frames(),
        }
    }
}

impl<F: PipelineObjectFactory> RenderEngineHooks for CacheService<F> {
    fn on_frame_budget(&self, signal: FrameBudgetSignal) {
        if let Err(err) = self.apply_budget_signal(&signal) {
            log::warn!("Failed to apply frame budget signal: {err}");
        }
    }

    fn on_maintenance_tick(&self) {
        if let Err(err) = self.drain_budget_signals() {
            log::warn!("Failed to apply frame budget signal: {err}");
        }
        let tick = self.maintenance_ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let every = u64::from(self.config.optimize_every_ticks);
        if every > 0
            && tick % every == 0
            && let Err(err) = self.optimize_cache()
        {
            log::warn!("Pipeline cache optimization failed: {err}");
        }
    }
}

impl<F: PipelineObjectFactory> Drop for CacheService<F> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        log::debug!("Pipeline cache service shutting down");
    }
}
