//! Structural pipeline configuration key.
//!
//! A [`PipelineConfigKey`] fully describes one native pipeline object: the
//! shader stages, the ordered macro list, the material parameters, and every
//! fixed-function sub-state from [`states`](super::states).
//!
//! Keys are immutable and cheap to clone (the payload lives behind an `Arc`).
//! The stable hash is the xxh3-64 of the serialized bytes, computed once at
//! construction, so it is identical across processes and can be persisted.
//!
//! # Macro ordering
//!
//! Macros compare as an *ordered* sequence: `[A=1, B=2]` and `[B=2, A=1]` are
//! different keys and will occupy different cache entries. Builders that
//! assemble macros from unordered sources should sort them first.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::sync::Arc;

use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::{CacheError, Result};
use crate::pipeline::states::{
    ColorTargetKey, DepthStencilKey, MAX_RENDER_TARGETS, MultisampleKey, PrimitiveTopology,
    RasterizerKey, TextureFormat,
};
use crate::utils::io::{PutLe, ReadLeExt};

/// Version byte leading every serialized key.
pub const KEY_ENCODING_VERSION: u8 = 1;

/// Upper bound for any single string inside a serialized key.
const MAX_KEY_STRING_BYTES: usize = 64 * 1024;

/// Shader entry used when a material is requested before it was registered.
pub const DEFAULT_VERTEX_SHADER: &str = "default_vs";
pub const DEFAULT_PIXEL_SHADER: &str = "default_ps";

// ─── Building blocks ──────────────────────────────────────────────────────────

/// Source identifiers for each programmable stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ShaderStages {
    pub vertex: String,
    pub pixel: String,
    pub geometry: Option<String>,
    pub hull: Option<String>,
    pub domain: Option<String>,
}

/// A single preprocessor definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderMacro {
    pub name: String,
    pub value: String,
}

impl ShaderMacro {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A material parameter value. Floats are kept as raw bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(u64),
    Vec4([u32; 4]),
    Text(String),
}

impl ParamValue {
    #[must_use]
    pub fn float(v: f64) -> Self {
        Self::Float(v.to_bits())
    }

    #[must_use]
    pub fn vec4(v: [f32; 4]) -> Self {
        Self::Vec4(v.map(f32::to_bits))
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(bits) => Some(f64::from_bits(*bits)),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Bool(b) => {
                buf.put_u8(0);
                buf.put_bool(*b);
            }
            Self::Int(i) => {
                buf.put_u8(1);
                buf.put_i64_le(*i);
            }
            Self::Float(bits) => {
                buf.put_u8(2);
                buf.put_u64_le(*bits);
            }
            Self::Vec4(v) => {
                buf.put_u8(3);
                for c in v {
                    buf.put_u32_le(*c);
                }
            }
            Self::Text(s) => {
                buf.put_u8(4);
                buf.put_str(s);
            }
        }
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(match r.read_u8()? {
            0 => Self::Bool(r.read_bool()?),
            1 => Self::Int(r.read_i64_le()?),
            2 => Self::Float(r.read_u64_le()?),
            3 => Self::Vec4([
                r.read_u32_le()?,
                r.read_u32_le()?,
                r.read_u32_le()?,
                r.read_u32_le()?,
            ]),
            4 => Self::Text(r.read_string_u32(MAX_KEY_STRING_BYTES)?),
            tag => {
                return Err(CacheError::CatalogFormat(format!(
                    "invalid parameter tag {tag}"
                )));
            }
        })
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Self::Vec4(v) => {
                let [x, y, z, w] = v.map(f32::from_bits);
                write!(f, "({x}, {y}, {z}, {w})")
            }
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

// ─── Key ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyData {
    material_name: String,
    shaders: ShaderStages,
    macros: Vec<ShaderMacro>,
    parameters: BTreeMap<String, ParamValue>,
    color_targets: SmallVec<[ColorTargetKey; 2]>,
    depth_stencil: Option<DepthStencilKey>,
    rasterizer: RasterizerKey,
    topology: PrimitiveTopology,
    multisample: MultisampleKey,
    node_mask: u32,
}

impl KeyData {
    /// Checks shared by the builder and the decoder.
    fn validate(&self) -> std::result::Result<(), String> {
        if self.material_name.trim().is_empty() {
            return Err("material name must not be empty".to_string());
        }
        if self.shaders.vertex.is_empty() || self.shaders.pixel.is_empty() {
            return Err(format!(
                "material '{}' needs both a vertex and a pixel shader reference",
                self.material_name
            ));
        }
        if self.color_targets.len() > MAX_RENDER_TARGETS {
            return Err(format!(
                "{} render targets exceeds the limit of {MAX_RENDER_TARGETS}",
                self.color_targets.len()
            ));
        }
        if let Some(m) = self.macros.iter().find(|m| m.name.is_empty()) {
            return Err(format!("macro with empty name (value '{}')", m.value));
        }
        if let Some(ds) = &self.depth_stencil
            && !ds.format.is_depth()
        {
            return Err(format!("{:?} is not a depth format", ds.format));
        }
        if self.multisample.count == 0 {
            return Err("sample count must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Immutable description of a complete pipeline configuration.
#[derive(Clone)]
pub struct PipelineConfigKey {
    data: Arc<KeyData>,
    hash: u64,
}

impl PipelineConfigKey {
    /// Starts a builder for `material_name` with engine defaults for every state.
    pub fn builder(material_name: impl Into<String>) -> PipelineConfigKeyBuilder {
        PipelineConfigKeyBuilder::new(material_name.into())
    }

    /// Key synthesized for a material that was never registered: default
    /// shaders, one opaque `Rgba8Unorm` target, `Depth32Float` depth test.
    pub fn default_for_material(material_name: &str) -> Result<Self> {
        Self::builder(material_name).build()
    }

    /// Returns a builder pre-filled with this key's fields.
    #[must_use]
    pub fn to_builder(&self) -> PipelineConfigKeyBuilder {
        PipelineConfigKeyBuilder {
            data: (*self.data).clone(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn material_name(&self) -> &str {
        &self.data.material_name
    }

    #[inline]
    #[must_use]
    pub fn shaders(&self) -> &ShaderStages {
        &self.data.shaders
    }

    #[inline]
    #[must_use]
    pub fn macros(&self) -> &[ShaderMacro] {
        &self.data.macros
    }

    #[inline]
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.data.parameters
    }

    #[inline]
    #[must_use]
    pub fn color_targets(&self) -> &[ColorTargetKey] {
        &self.data.color_targets
    }

    #[inline]
    #[must_use]
    pub fn depth_stencil(&self) -> Option<&DepthStencilKey> {
        self.data.depth_stencil.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn rasterizer(&self) -> &RasterizerKey {
        &self.data.rasterizer
    }

    #[inline]
    #[must_use]
    pub fn topology(&self) -> PrimitiveTopology {
        self.data.topology
    }

    #[inline]
    #[must_use]
    pub fn multisample(&self) -> &MultisampleKey {
        &self.data.multisample
    }

    #[inline]
    #[must_use]
    pub fn node_mask(&self) -> u32 {
        self.data.node_mask
    }

    /// Process-independent hash of the full key.
    #[inline]
    #[must_use]
    pub fn stable_hash(&self) -> u64 {
        self.hash
    }

    // ── Serialization ────────────────────────────────────────────────────────

    /// Deterministic byte encoding. Equal keys always produce equal bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.data)
    }

    /// Decodes bytes produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = bytes;
        let version = r.read_u8()?;
        if version != KEY_ENCODING_VERSION {
            return Err(CacheError::CatalogFormat(format!(
                "unsupported key encoding version {version}"
            )));
        }

        let material_name = r.read_string_u32(MAX_KEY_STRING_BYTES)?;
        let shaders = ShaderStages {
            vertex: r.read_string_u32(MAX_KEY_STRING_BYTES)?,
            pixel: r.read_string_u32(MAX_KEY_STRING_BYTES)?,
            geometry: read_opt_string(&mut r)?,
            hull: read_opt_string(&mut r)?,
            domain: read_opt_string(&mut r)?,
        };

        let macro_count = r.read_u32_le()? as usize;
        let mut macros = Vec::with_capacity(macro_count.min(256));
        for _ in 0..macro_count {
            let name = r.read_string_u32(MAX_KEY_STRING_BYTES)?;
            let value = r.read_string_u32(MAX_KEY_STRING_BYTES)?;
            macros.push(ShaderMacro { name, value });
        }

        let param_count = r.read_u32_le()? as usize;
        let mut parameters: BTreeMap<String, ParamValue> = BTreeMap::new();
        for _ in 0..param_count {
            let name = r.read_string_u32(MAX_KEY_STRING_BYTES)?;
            // Encoded in map order, so names must be strictly increasing.
            if parameters
                .last_key_value()
                .is_some_and(|(last, _)| last.as_str() >= name.as_str())
            {
                return Err(CacheError::CatalogFormat(format!(
                    "parameter '{name}' is duplicated or out of order"
                )));
            }
            let value = ParamValue::read_from(&mut r)?;
            parameters.insert(name, value);
        }

        let target_count = r.read_u8()? as usize;
        if target_count > MAX_RENDER_TARGETS {
            return Err(CacheError::CatalogFormat(format!(
                "{target_count} render targets exceeds the limit of {MAX_RENDER_TARGETS}"
            )));
        }
        let mut color_targets = SmallVec::new();
        for _ in 0..target_count {
            color_targets.push(ColorTargetKey::read_from(&mut r)?);
        }

        let depth_stencil = if r.read_bool()? {
            Some(DepthStencilKey::read_from(&mut r)?)
        } else {
            None
        };
        let rasterizer = RasterizerKey::read_from(&mut r)?;
        let topology = PrimitiveTopology::read_from(&mut r)?;
        let multisample = MultisampleKey::read_from(&mut r)?;
        let node_mask = r.read_u32_le()?;

        if !r.is_empty() {
            return Err(CacheError::CatalogFormat(format!(
                "{} trailing bytes after key",
                r.len()
            )));
        }

        let data = KeyData {
            material_name,
            shaders,
            macros,
            parameters,
            color_targets,
            depth_stencil,
            rasterizer,
            topology,
            multisample,
            node_mask,
        };
        data.validate().map_err(CacheError::CatalogFormat)?;
        Ok(Self::from_data(data))
    }

    /// Compact single-line description for logs.
    #[must_use]
    pub fn to_debug_string(&self) -> String {
        let d = &self.data;
        let macros = d
            .macros
            .iter()
            .map(|m| format!("{}={}", m.name, m.value))
            .collect::<Vec<_>>()
            .join(",");
        let targets = d
            .color_targets
            .iter()
            .map(|t| format!("{:?}", t.format))
            .collect::<Vec<_>>()
            .join(",");
        let depth = d
            .depth_stencil
            .as_ref()
            .map_or_else(|| "none".to_string(), |ds| format!("{:?}", ds.format));

        format!(
            "PSO[{}] vs={} ps={} macros=[{}] params={} targets=[{}] depth={} topo={:?} samples={} node={:#x} hash={:016x}",
            d.material_name,
            d.shaders.vertex,
            d.shaders.pixel,
            macros,
            d.parameters.len(),
            targets,
            depth,
            d.topology,
            d.multisample.count,
            d.node_mask,
            self.hash,
        )
    }

    fn from_data(data: KeyData) -> Self {
        let hash = xxh3_64(&encode(&data));
        Self {
            data: Arc::new(data),
            hash,
        }
    }
}

impl PartialEq for PipelineConfigKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && (Arc::ptr_eq(&self.data, &other.data) || self.data == other.data)
    }
}

impl Eq for PipelineConfigKey {}

impl Hash for PipelineConfigKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for PipelineConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipelineConfigKey({:?}, {:016x})", self.data.material_name, self.hash)
    }
}

impl fmt::Display for PipelineConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_debug_string())
    }
}

fn encode(d: &KeyData) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    buf.put_u8(KEY_ENCODING_VERSION);
    buf.put_str(&d.material_name);

    buf.put_str(&d.shaders.vertex);
    buf.put_str(&d.shaders.pixel);
    put_opt_string(&mut buf, d.shaders.geometry.as_deref());
    put_opt_string(&mut buf, d.shaders.hull.as_deref());
    put_opt_string(&mut buf, d.shaders.domain.as_deref());

    buf.put_u32_le(d.macros.len() as u32);
    for m in &d.macros {
        buf.put_str(&m.name);
        buf.put_str(&m.value);
    }

    // BTreeMap iteration order is sorted, which keeps the bytes deterministic.
    buf.put_u32_le(d.parameters.len() as u32);
    for (name, value) in &d.parameters {
        buf.put_str(name);
        value.write_to(&mut buf);
    }

    buf.put_u8(d.color_targets.len() as u8);
    for target in &d.color_targets {
        target.write_to(&mut buf);
    }

    match &d.depth_stencil {
        Some(ds) => {
            buf.put_bool(true);
            ds.write_to(&mut buf);
        }
        None => buf.put_bool(false),
    }
    d.rasterizer.write_to(&mut buf);
    buf.put_u8(d.topology.code());
    d.multisample.write_to(&mut buf);
    buf.put_u32_le(d.node_mask);
    buf
}

fn put_opt_string(buf: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.put_bool(true);
            buf.put_str(s);
        }
        None => buf.put_bool(false),
    }
}

fn read_opt_string<R: Read>(r: &mut R) -> Result<Option<String>> {
    if r.read_bool()? {
        Ok(Some(r.read_string_u32(MAX_KEY_STRING_BYTES)?))
    } else {
        Ok(None)
    }
}

// ─── Builder ──────────────────────────────────────────────────────────────────

/// Assembles a [`PipelineConfigKey`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PipelineConfigKeyBuilder {
    data: KeyData,
}

impl PipelineConfigKeyBuilder {
    fn new(material_name: String) -> Self {
        Self {
            data: KeyData {
                material_name,
                shaders: ShaderStages {
                    vertex: DEFAULT_VERTEX_SHADER.to_string(),
                    pixel: DEFAULT_PIXEL_SHADER.to_string(),
                    ..Default::default()
                },
                macros: Vec::new(),
                parameters: BTreeMap::new(),
                color_targets: smallvec::smallvec![ColorTargetKey::opaque(
                    TextureFormat::Rgba8Unorm
                )],
                depth_stencil: Some(DepthStencilKey::depth_test(TextureFormat::Depth32Float)),
                rasterizer: RasterizerKey::default(),
                topology: PrimitiveTopology::TriangleList,
                multisample: MultisampleKey::default(),
                node_mask: 0,
            },
        }
    }

    #[must_use]
    pub fn material_name(mut self, name: impl Into<String>) -> Self {
        self.data.material_name = name.into();
        self
    }

    #[must_use]
    pub fn vertex_shader(mut self, source_id: impl Into<String>) -> Self {
        self.data.shaders.vertex = source_id.into();
        self
    }

    #[must_use]
    pub fn pixel_shader(mut self, source_id: impl Into<String>) -> Self {
        self.data.shaders.pixel = source_id.into();
        self
    }

    #[must_use]
    pub fn geometry_shader(mut self, source_id: Option<String>) -> Self {
        self.data.shaders.geometry = source_id;
        self
    }

    #[must_use]
    pub fn hull_shader(mut self, source_id: Option<String>) -> Self {
        self.data.shaders.hull = source_id;
        self
    }

    #[must_use]
    pub fn domain_shader(mut self, source_id: Option<String>) -> Self {
        self.data.shaders.domain = source_id;
        self
    }

    /// Appends a macro. Order is significant for equality.
    #[must_use]
    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.macros.push(ShaderMacro::new(name, value));
        self
    }

    #[must_use]
    pub fn macros(mut self, macros: impl IntoIterator<Item = ShaderMacro>) -> Self {
        self.data.macros = macros.into_iter().collect();
        self
    }

    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.data.parameters.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn color_targets(mut self, targets: impl IntoIterator<Item = ColorTargetKey>) -> Self {
        self.data.color_targets = targets.into_iter().collect();
        self
    }

    #[must_use]
    pub fn depth_stencil(mut self, depth_stencil: Option<DepthStencilKey>) -> Self {
        self.data.depth_stencil = depth_stencil;
        self
    }

    #[must_use]
    pub fn rasterizer(mut self, rasterizer: RasterizerKey) -> Self {
        self.data.rasterizer = rasterizer;
        self
    }

    #[must_use]
    pub fn topology(mut self, topology: PrimitiveTopology) -> Self {
        self.data.topology = topology;
        self
    }

    #[must_use]
    pub fn multisample(mut self, multisample: MultisampleKey) -> Self {
        self.data.multisample = multisample;
        self
    }

    #[must_use]
    pub fn node_mask(mut self, mask: u32) -> Self {
        self.data.node_mask = mask;
        self
    }

    pub fn build(self) -> Result<PipelineConfigKey> {
        self.data.validate().map_err(CacheError::InvalidArgument)?;
        Ok(PipelineConfigKey::from_data(self.data))
    }
}
