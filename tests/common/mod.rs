//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use myth_pipeline_cache::{
    BackendError, CacheResource, CacheServiceConfig, LruCacheConfig, PipelineConfigKey,
    PipelineObjectFactory,
};

pub const MOCK_PIPELINE_BYTES: u64 = 4096;

/// Stand-in for a native pipeline; counts its releases.
#[derive(Debug)]
pub struct MockPipeline {
    pub serial: usize,
    pub material: String,
    released: Arc<AtomicUsize>,
}

impl CacheResource for MockPipeline {
    fn memory_estimate(&self) -> u64 {
        MOCK_PIPELINE_BYTES
    }

    fn release(&self) -> Result<(), BackendError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Gate {
    started: flume::Sender<()>,
    proceed: flume::Receiver<()>,
}

/// Counting factory with optional latency, failures and a start/proceed gate.
#[derive(Default)]
pub struct MockFactory {
    created: AtomicUsize,
    calls: AtomicUsize,
    released: Arc<AtomicUsize>,
    delay: Duration,
    failing_material: Option<String>,
    gate: Option<Gate>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Fails every creation for `material`.
    pub fn failing(material: &str) -> Self {
        Self {
            failing_material: Some(material.to_string()),
            ..Self::default()
        }
    }

    /// Each creation announces itself on the first channel, then waits for a
    /// message on the second.
    pub fn gated() -> (Self, flume::Receiver<()>, flume::Sender<()>) {
        let (started_tx, started_rx) = flume::unbounded();
        let (proceed_tx, proceed_rx) = flume::unbounded();
        let factory = Self {
            gate: Some(Gate {
                started: started_tx,
                proceed: proceed_rx,
            }),
            ..Self::default()
        };
        (factory, started_rx, proceed_tx)
    }

    /// Successful creations.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// All factory invocations, including failures.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl PipelineObjectFactory for MockFactory {
    type Handle = MockPipeline;

    fn create(&self, key: &PipelineConfigKey) -> Result<MockPipeline, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.started.send(());
            let _ = gate.proceed.recv();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.failing_material.as_deref() == Some(key.material_name()) {
            return Err(BackendError::Other(format!(
                "driver rejected {}",
                key.material_name()
            )));
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockPipeline {
            serial,
            material: key.material_name().to_string(),
            released: self.released.clone(),
        })
    }
}

pub fn lru_config(capacity: usize) -> LruCacheConfig {
    LruCacheConfig {
        capacity,
        max_age: None,
        sweep_interval: None,
    }
}

pub fn service_config(capacity: usize) -> CacheServiceConfig {
    CacheServiceConfig {
        cache: lru_config(capacity),
        min_capacity: 1,
        ..CacheServiceConfig::default()
    }
}

pub fn material(name: &str) -> PipelineConfigKey {
    PipelineConfigKey::builder(name)
        .vertex_shader(format!("{name}_vs"))
        .pixel_shader(format!("{name}_ps"))
        .build()
        .expect("valid key")
}
