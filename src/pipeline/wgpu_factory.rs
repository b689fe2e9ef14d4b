//! `wgpu` backend for the pipeline cache.
//!
//! [`WgpuPipelineFactory`] builds a `wgpu::RenderPipeline` from a
//! [`PipelineConfigKey`]. Vertex and pixel stages are looked up in a shared
//! [`ShaderLibrary`] and must expose `vs_main` / `fs_main` entry points.
//!
//! Keys the backend cannot express (geometry, hull or domain stages, odd
//! sample counts, stencil on a depth-only format) are rejected up front with
//! [`BackendError::Unsupported`]. Shader compilation and pipeline creation run
//! inside a validation error scope; a captured error becomes
//! [`BackendError::Other`] so nothing invalid reaches the cache.

use std::sync::Arc;

use crate::cache::CacheResource;
use crate::errors::BackendError;
use crate::pipeline::{PipelineConfigKey, PipelineObjectFactory, ShaderLibrary};

/// Runs `f` inside a validation error scope on the calling thread and turns a
/// captured error into [`BackendError::Other`].
pub(crate) fn validation_scope<T>(
    device: &wgpu::Device,
    what: &str,
    f: impl FnOnce() -> T,
) -> Result<T, BackendError> {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(scope.pop()) {
        None => Ok(value),
        Some(err) => {
            log::warn!("wgpu validation failed for {what}: {err}");
            Err(BackendError::Other(format!("{what}: {err}")))
        }
    }
}

const VERTEX_ENTRY: &str = "vs_main";
const FRAGMENT_ENTRY: &str = "fs_main";

/// A cached `wgpu` render pipeline.
#[derive(Debug)]
pub struct WgpuPipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub label: String,
    memory_estimate: u64,
}

impl CacheResource for WgpuPipeline {
    fn memory_estimate(&self) -> u64 {
        self.memory_estimate
    }
}

pub struct WgpuPipelineFactory {
    device: wgpu::Device,
    shaders: Arc<ShaderLibrary>,
    layout: Option<wgpu::PipelineLayout>,
    memory_estimate: u64,
}

impl WgpuPipelineFactory {
    /// Pipelines built without an explicit layout use `wgpu`'s automatic layout.
    #[must_use]
    pub fn new(device: wgpu::Device, shaders: Arc<ShaderLibrary>) -> Self {
        Self {
            device,
            shaders,
            layout: None,
            memory_estimate: 64 * 1024,
        }
    }

    #[must_use]
    pub fn with_layout(mut self, layout: wgpu::PipelineLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Bytes reported per pipeline in cache statistics.
    #[must_use]
    pub fn with_memory_estimate(mut self, bytes: u64) -> Self {
        self.memory_estimate = bytes;
        self
    }

    #[must_use]
    pub fn shaders(&self) -> &Arc<ShaderLibrary> {
        &self.shaders
    }

    fn check_supported(key: &PipelineConfigKey) -> Result<(), BackendError> {
        let stages = key.shaders();
        for (name, stage) in [
            ("geometry", &stages.geometry),
            ("hull", &stages.hull),
            ("domain", &stages.domain),
        ] {
            if stage.is_some() {
                return Err(BackendError::Unsupported(format!(
                    "{name} shader stage is not available on this backend"
                )));
            }
        }

        let samples = key.multisample().count;
        if !matches!(samples, 1 | 2 | 4 | 8 | 16) {
            return Err(BackendError::Unsupported(format!(
                "sample count {samples}"
            )));
        }

        if let Some(ds) = key.depth_stencil()
            && ds.stencil.is_enabled()
            && !ds.format.has_stencil()
        {
            return Err(BackendError::Unsupported(format!(
                "stencil test on {:?}, which has no stencil aspect",
                ds.format
            )));
        }
        Ok(())
    }
}

impl PipelineObjectFactory for WgpuPipelineFactory {
    type Handle = WgpuPipeline;

    fn create(&self, key: &PipelineConfigKey) -> Result<WgpuPipeline, BackendError> {
        Self::check_supported(key)?;

        let stages = key.shaders();
        let vs_module = self
            .shaders
            .get_or_compile(&self.device, &stages.vertex, key.macros())?;
        let fs_module = self
            .shaders
            .get_or_compile(&self.device, &stages.pixel, key.macros())?;

        let color_targets: Vec<Option<wgpu::ColorTargetState>> =
            key.color_targets().iter().map(|t| t.to_wgpu()).collect();
        let depth_stencil = match key.depth_stencil() {
            Some(ds) => Some(ds.to_wgpu().ok_or_else(|| {
                BackendError::Unsupported(format!("{:?} is not a depth format", ds.format))
            })?),
            None => None,
        };

        let label = format!("{} [{:016x}]", key.material_name(), key.stable_hash());
        log::debug!("Creating render pipeline {label}");

        let pipeline = validation_scope(&self.device, &label, || {
            self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: self.layout.as_ref(),
                vertex: wgpu::VertexState {
                    module: &vs_module,
                    entry_point: Some(VERTEX_ENTRY),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fs_module,
                    entry_point: Some(FRAGMENT_ENTRY),
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: key.rasterizer().to_wgpu(key.topology()),
                depth_stencil,
                multisample: (*key.multisample()).into(),
                multiview_mask: None,
                cache: None,
            })
        })?;

        Ok(WgpuPipeline {
            pipeline,
            label,
            memory_estimate: self.memory_estimate,
        })
    }
}
