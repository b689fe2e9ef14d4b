#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! Pipeline configuration cache.
//!
//! Maps immutable, structurally-keyed pipeline descriptions
//! ([`PipelineConfigKey`]) to expensive native pipeline objects, with LRU
//! eviction, expiration, background precompilation and frame-budget driven
//! resizing. [`CacheService`] is the entry point; [`WgpuPipelineFactory`]
//! builds `wgpu` render pipelines.

pub mod cache;
pub mod errors;
pub mod pipeline;
pub mod service;
pub mod utils;

pub use cache::{CacheLookup, CacheResource, CacheStatistics, EntrySnapshot, LruCache, LruCacheConfig};
pub use errors::{BackendError, CacheError, Result};
pub use pipeline::{
    ParamValue, PipelineConfigKey, PipelineConfigKeyBuilder, PipelineObjectFactory, ShaderLibrary,
    ShaderMacro, ShaderStages, WgpuPipeline, WgpuPipelineFactory,
};
pub use service::budget::{FrameBudgetSignal, RenderEngineHooks};
pub use service::catalog::{CATALOG_MAGIC, CATALOG_VERSION, Catalog, CatalogEntry};
pub use service::config::CacheServiceConfig;
pub use service::precompile::PrecompileReport;
pub use service::{
    CacheService, OptimizationReport, PipelineResult, RegisteredMaterial, RegistrationResult,
    ServiceStatistics,
};
pub use tokio_util::sync::CancellationToken;
