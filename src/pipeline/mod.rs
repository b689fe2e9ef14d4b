//! Pipeline Description Module
//!
//! Describes pipelines and turns descriptions into native objects:
//! - states: hashable fixed-function sub-states with stable wire codes
//! - pipeline_key: the immutable structural key and its builder
//! - factory: the backend abstraction the cache creates through
//! - shader_library / wgpu_factory: the `wgpu` backend

pub mod conversions;
pub mod factory;
pub mod pipeline_key;
pub mod shader_library;
pub mod states;
pub mod wgpu_factory;

pub use factory::PipelineObjectFactory;
pub use pipeline_key::{
    DEFAULT_PIXEL_SHADER, DEFAULT_VERTEX_SHADER, ParamValue, PipelineConfigKey,
    PipelineConfigKeyBuilder, ShaderMacro, ShaderStages,
};
pub use shader_library::ShaderLibrary;
pub use states::*;
pub use wgpu_factory::{WgpuPipeline, WgpuPipelineFactory};
