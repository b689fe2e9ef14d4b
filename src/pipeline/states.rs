//! Hashable fixed-function pipeline states.
//!
//! These are the nested sub-states of a [`PipelineConfigKey`]. Every enum
//! carries an explicit one-byte wire code so the serialized form of a key is
//! stable across builds and platforms. Floating point values are stored as raw
//! bits so that `Eq` / `Hash` stay total.
//!
//! [`PipelineConfigKey`]: super::pipeline_key::PipelineConfigKey

use std::io::Read;

use bitflags::bitflags;

use crate::errors::{CacheError, Result};
use crate::utils::io::{PutLe, ReadLeExt};

/// Maximum number of simultaneously bound render targets.
pub const MAX_RENDER_TARGETS: usize = 8;

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $code ),+
        }

        impl $name {
            /// Stable one-byte wire code.
            #[inline]
            #[must_use]
            pub const fn code(self) -> u8 {
                self as u8
            }

            #[must_use]
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }

            pub(crate) fn read_from<R: Read>(r: &mut R) -> Result<Self> {
                let code = r.read_u8()?;
                Self::from_code(code).ok_or_else(|| {
                    CacheError::CatalogFormat(format!(
                        concat!("invalid ", stringify!($name), " code {}"),
                        code
                    ))
                })
            }
        }
    };
}

wire_enum! {
    pub enum BlendFactor {
        Zero = 0,
        One = 1,
        SrcColor = 2,
        OneMinusSrcColor = 3,
        SrcAlpha = 4,
        OneMinusSrcAlpha = 5,
        DstColor = 6,
        OneMinusDstColor = 7,
        DstAlpha = 8,
        OneMinusDstAlpha = 9,
        SrcAlphaSaturated = 10,
        Constant = 11,
        OneMinusConstant = 12,
    }
}

wire_enum! {
    pub enum BlendOperation {
        Add = 0,
        Subtract = 1,
        ReverseSubtract = 2,
        Min = 3,
        Max = 4,
    }
}

wire_enum! {
    pub enum CompareFunction {
        Never = 0,
        Less = 1,
        Equal = 2,
        LessEqual = 3,
        Greater = 4,
        NotEqual = 5,
        GreaterEqual = 6,
        Always = 7,
    }
}

wire_enum! {
    pub enum StencilOperation {
        Keep = 0,
        Zero = 1,
        Replace = 2,
        Invert = 3,
        IncrementClamp = 4,
        DecrementClamp = 5,
        IncrementWrap = 6,
        DecrementWrap = 7,
    }
}

wire_enum! {
    pub enum FillMode {
        Solid = 0,
        Wireframe = 1,
    }
}

wire_enum! {
    pub enum CullMode {
        None = 0,
        Front = 1,
        Back = 2,
    }
}

wire_enum! {
    pub enum FrontFace {
        Ccw = 0,
        Cw = 1,
    }
}

wire_enum! {
    pub enum PrimitiveTopology {
        PointList = 0,
        LineList = 1,
        LineStrip = 2,
        TriangleList = 3,
        TriangleStrip = 4,
    }
}

wire_enum! {
    /// Render-target and depth formats a key may reference.
    pub enum TextureFormat {
        /// No attachment bound to this slot.
        Unknown = 0,
        R8Unorm = 1,
        Rg8Unorm = 2,
        Rgba8Unorm = 3,
        Rgba8UnormSrgb = 4,
        Bgra8Unorm = 5,
        Bgra8UnormSrgb = 6,
        Rgb10a2Unorm = 7,
        R16Float = 8,
        Rg16Float = 9,
        Rgba16Float = 10,
        R32Float = 11,
        Rg32Float = 12,
        Rgba32Float = 13,
        Depth16Unorm = 32,
        Depth24Plus = 33,
        Depth24PlusStencil8 = 34,
        Depth32Float = 35,
        Depth32FloatStencil8 = 36,
    }
}

impl TextureFormat {
    #[inline]
    #[must_use]
    pub fn is_depth(self) -> bool {
        self.code() >= Self::Depth16Unorm.code()
    }

    #[inline]
    #[must_use]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8)
    }
}

bitflags! {
    /// Per-channel color write mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWrites: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const COLOR = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits();
        const ALL = Self::COLOR.bits() | Self::ALPHA.bits();
    }
}

impl Default for ColorWrites {
    fn default() -> Self {
        Self::ALL
    }
}

// ─── Blend ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponentKey {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl BlendComponentKey {
    pub const REPLACE: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::Zero,
        operation: BlendOperation::Add,
    };

    pub const OVER: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::OneMinusSrcAlpha,
        operation: BlendOperation::Add,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateKey {
    pub color: BlendComponentKey,
    pub alpha: BlendComponentKey,
}

impl BlendStateKey {
    /// Standard alpha blending.
    pub const ALPHA_BLENDING: Self = Self {
        color: BlendComponentKey {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOperation::Add,
        },
        alpha: BlendComponentKey::OVER,
    };

    /// Additive blending, used by particles and light accumulation.
    pub const ADDITIVE: Self = Self {
        color: BlendComponentKey {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
            operation: BlendOperation::Add,
        },
        alpha: BlendComponentKey {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
            operation: BlendOperation::Add,
        },
    };
}

/// Blend state and format for a single render-target slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetKey {
    pub format: TextureFormat,
    pub blend: Option<BlendStateKey>,
    pub write_mask: ColorWrites,
}

impl ColorTargetKey {
    #[must_use]
    pub fn opaque(format: TextureFormat) -> Self {
        Self {
            format,
            blend: None,
            write_mask: ColorWrites::ALL,
        }
    }

    #[must_use]
    pub fn blended(format: TextureFormat, blend: BlendStateKey) -> Self {
        Self {
            format,
            blend: Some(blend),
            write_mask: ColorWrites::ALL,
        }
    }
}

// ─── Depth / Stencil ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceKey {
    pub compare: CompareFunction,
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
}

impl StencilFaceKey {
    pub const IGNORE: Self = Self {
        compare: CompareFunction::Always,
        fail_op: StencilOperation::Keep,
        depth_fail_op: StencilOperation::Keep,
        pass_op: StencilOperation::Keep,
    };
}

impl Default for StencilFaceKey {
    fn default() -> Self {
        Self::IGNORE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StencilStateKey {
    pub front: StencilFaceKey,
    pub back: StencilFaceKey,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl StencilStateKey {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.front != StencilFaceKey::IGNORE || self.back != StencilFaceKey::IGNORE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthBiasKey {
    pub constant: i32,
    pub slope_scale_bits: u32,
    pub clamp_bits: u32,
}

impl DepthBiasKey {
    #[must_use]
    pub fn new(constant: i32, slope_scale: f32, clamp: f32) -> Self {
        Self {
            constant,
            slope_scale_bits: slope_scale.to_bits(),
            clamp_bits: clamp.to_bits(),
        }
    }

    #[inline]
    #[must_use]
    pub fn slope_scale(&self) -> f32 {
        f32::from_bits(self.slope_scale_bits)
    }

    #[inline]
    #[must_use]
    pub fn clamp(&self) -> f32 {
        f32::from_bits(self.clamp_bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilKey {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    pub stencil: StencilStateKey,
    pub bias: DepthBiasKey,
}

impl DepthStencilKey {
    /// Depth test `Less` with writes enabled and stencil off.
    #[must_use]
    pub fn depth_test(format: TextureFormat) -> Self {
        Self {
            format,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
            stencil: StencilStateKey::default(),
            bias: DepthBiasKey::default(),
        }
    }
}

// ─── Rasterizer / Multisample ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerKey {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub unclipped_depth: bool,
    pub conservative: bool,
}

impl Default for RasterizerKey {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Ccw,
            unclipped_depth: false,
            conservative: false,
        }
    }
}

/// Sample description plus sample mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MultisampleKey {
    pub count: u32,
    pub quality: u32,
    pub mask: u64,
    pub alpha_to_coverage_enabled: bool,
}

impl Default for MultisampleKey {
    fn default() -> Self {
        Self {
            count: 1,
            quality: 0,
            mask: !0,
            alpha_to_coverage_enabled: false,
        }
    }
}

// ─── Wire encoding ────────────────────────────────────────────────────────────

impl BlendComponentKey {
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.src_factor.code());
        buf.put_u8(self.dst_factor.code());
        buf.put_u8(self.operation.code());
    }

    pub(crate) fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            src_factor: BlendFactor::read_from(r)?,
            dst_factor: BlendFactor::read_from(r)?,
            operation: BlendOperation::read_from(r)?,
        })
    }
}

impl ColorTargetKey {
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.format.code());
        match &self.blend {
            Some(blend) => {
                buf.put_bool(true);
                blend.color.write_to(buf);
                blend.alpha.write_to(buf);
            }
            None => buf.put_bool(false),
        }
        buf.put_u8(self.write_mask.bits());
    }

    pub(crate) fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let format = TextureFormat::read_from(r)?;
        let blend = if r.read_bool()? {
            Some(BlendStateKey {
                color: BlendComponentKey::read_from(r)?,
                alpha: BlendComponentKey::read_from(r)?,
            })
        } else {
            None
        };
        let mask_bits = r.read_u8()?;
        let write_mask = ColorWrites::from_bits(mask_bits).ok_or_else(|| {
            CacheError::CatalogFormat(format!("invalid color write mask {mask_bits:#x}"))
        })?;
        Ok(Self {
            format,
            blend,
            write_mask,
        })
    }
}

impl StencilFaceKey {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.compare.code());
        buf.put_u8(self.fail_op.code());
        buf.put_u8(self.depth_fail_op.code());
        buf.put_u8(self.pass_op.code());
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            compare: CompareFunction::read_from(r)?,
            fail_op: StencilOperation::read_from(r)?,
            depth_fail_op: StencilOperation::read_from(r)?,
            pass_op: StencilOperation::read_from(r)?,
        })
    }
}

impl DepthStencilKey {
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.format.code());
        buf.put_bool(self.depth_write_enabled);
        buf.put_u8(self.depth_compare.code());
        self.stencil.front.write_to(buf);
        self.stencil.back.write_to(buf);
        buf.put_u32_le(self.stencil.read_mask);
        buf.put_u32_le(self.stencil.write_mask);
        buf.put_i32_le(self.bias.constant);
        buf.put_u32_le(self.bias.slope_scale_bits);
        buf.put_u32_le(self.bias.clamp_bits);
    }

    pub(crate) fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            format: TextureFormat::read_from(r)?,
            depth_write_enabled: r.read_bool()?,
            depth_compare: CompareFunction::read_from(r)?,
            stencil: StencilStateKey {
                front: StencilFaceKey::read_from(r)?,
                back: StencilFaceKey::read_from(r)?,
                read_mask: r.read_u32_le()?,
                write_mask: r.read_u32_le()?,
            },
            bias: DepthBiasKey {
                constant: r.read_i32_le()?,
                slope_scale_bits: r.read_u32_le()?,
                clamp_bits: r.read_u32_le()?,
            },
        })
    }
}

impl RasterizerKey {
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.fill_mode.code());
        buf.put_u8(self.cull_mode.code());
        buf.put_u8(self.front_face.code());
        buf.put_bool(self.unclipped_depth);
        buf.put_bool(self.conservative);
    }

    pub(crate) fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            fill_mode: FillMode::read_from(r)?,
            cull_mode: CullMode::read_from(r)?,
            front_face: FrontFace::read_from(r)?,
            unclipped_depth: r.read_bool()?,
            conservative: r.read_bool()?,
        })
    }
}

impl MultisampleKey {
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.count);
        buf.put_u32_le(self.quality);
        buf.put_u64_le(self.mask);
        buf.put_bool(self.alpha_to_coverage_enabled);
    }

    pub(crate) fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            count: r.read_u32_le()?,
            quality: r.read_u32_le()?,
            mask: r.read_u64_le()?,
            alpha_to_coverage_enabled: r.read_bool()?,
        })
    }
}
