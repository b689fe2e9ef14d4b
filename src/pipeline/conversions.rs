//! Key state → `wgpu` descriptor conversions.

use super::states::{
    BlendComponentKey, BlendFactor, BlendOperation, BlendStateKey, ColorTargetKey,
    CompareFunction, CullMode, DepthBiasKey, DepthStencilKey, FillMode, FrontFace,
    MultisampleKey, PrimitiveTopology, RasterizerKey, StencilFaceKey, StencilOperation,
    StencilStateKey, TextureFormat,
};

impl TextureFormat {
    /// `None` for [`TextureFormat::Unknown`].
    #[must_use]
    pub fn to_wgpu(self) -> Option<wgpu::TextureFormat> {
        use wgpu::TextureFormat as W;
        Some(match self {
            Self::Unknown => return None,
            Self::R8Unorm => W::R8Unorm,
            Self::Rg8Unorm => W::Rg8Unorm,
            Self::Rgba8Unorm => W::Rgba8Unorm,
            Self::Rgba8UnormSrgb => W::Rgba8UnormSrgb,
            Self::Bgra8Unorm => W::Bgra8Unorm,
            Self::Bgra8UnormSrgb => W::Bgra8UnormSrgb,
            Self::Rgb10a2Unorm => W::Rgb10a2Unorm,
            Self::R16Float => W::R16Float,
            Self::Rg16Float => W::Rg16Float,
            Self::Rgba16Float => W::Rgba16Float,
            Self::R32Float => W::R32Float,
            Self::Rg32Float => W::Rg32Float,
            Self::Rgba32Float => W::Rgba32Float,
            Self::Depth16Unorm => W::Depth16Unorm,
            Self::Depth24Plus => W::Depth24Plus,
            Self::Depth24PlusStencil8 => W::Depth24PlusStencil8,
            Self::Depth32Float => W::Depth32Float,
            Self::Depth32FloatStencil8 => W::Depth32FloatStencil8,
        })
    }
}

impl From<BlendFactor> for wgpu::BlendFactor {
    fn from(f: BlendFactor) -> Self {
        match f {
            BlendFactor::Zero => Self::Zero,
            BlendFactor::One => Self::One,
            BlendFactor::SrcColor => Self::Src,
            BlendFactor::OneMinusSrcColor => Self::OneMinusSrc,
            BlendFactor::SrcAlpha => Self::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => Self::OneMinusSrcAlpha,
            BlendFactor::DstColor => Self::Dst,
            BlendFactor::OneMinusDstColor => Self::OneMinusDst,
            BlendFactor::DstAlpha => Self::DstAlpha,
            BlendFactor::OneMinusDstAlpha => Self::OneMinusDstAlpha,
            BlendFactor::SrcAlphaSaturated => Self::SrcAlphaSaturated,
            BlendFactor::Constant => Self::Constant,
            BlendFactor::OneMinusConstant => Self::OneMinusConstant,
        }
    }
}

impl From<BlendOperation> for wgpu::BlendOperation {
    fn from(op: BlendOperation) -> Self {
        match op {
            BlendOperation::Add => Self::Add,
            BlendOperation::Subtract => Self::Subtract,
            BlendOperation::ReverseSubtract => Self::ReverseSubtract,
            BlendOperation::Min => Self::Min,
            BlendOperation::Max => Self::Max,
        }
    }
}

impl From<CompareFunction> for wgpu::CompareFunction {
    fn from(c: CompareFunction) -> Self {
        match c {
            CompareFunction::Never => Self::Never,
            CompareFunction::Less => Self::Less,
            CompareFunction::Equal => Self::Equal,
            CompareFunction::LessEqual => Self::LessEqual,
            CompareFunction::Greater => Self::Greater,
            CompareFunction::NotEqual => Self::NotEqual,
            CompareFunction::GreaterEqual => Self::GreaterEqual,
            CompareFunction::Always => Self::Always,
        }
    }
}

impl From<StencilOperation> for wgpu::StencilOperation {
    fn from(op: StencilOperation) -> Self {
        match op {
            StencilOperation::Keep => Self::Keep,
            StencilOperation::Zero => Self::Zero,
            StencilOperation::Replace => Self::Replace,
            StencilOperation::Invert => Self::Invert,
            StencilOperation::IncrementClamp => Self::IncrementClamp,
            StencilOperation::DecrementClamp => Self::DecrementClamp,
            StencilOperation::IncrementWrap => Self::IncrementWrap,
            StencilOperation::DecrementWrap => Self::DecrementWrap,
        }
    }
}

impl From<PrimitiveTopology> for wgpu::PrimitiveTopology {
    fn from(t: PrimitiveTopology) -> Self {
        match t {
            PrimitiveTopology::PointList => Self::PointList,
            PrimitiveTopology::LineList => Self::LineList,
            PrimitiveTopology::LineStrip => Self::LineStrip,
            PrimitiveTopology::TriangleList => Self::TriangleList,
            PrimitiveTopology::TriangleStrip => Self::TriangleStrip,
        }
    }
}

impl From<BlendComponentKey> for wgpu::BlendComponent {
    fn from(c: BlendComponentKey) -> Self {
        Self {
            src_factor: c.src_factor.into(),
            dst_factor: c.dst_factor.into(),
            operation: c.operation.into(),
        }
    }
}

impl From<BlendStateKey> for wgpu::BlendState {
    fn from(b: BlendStateKey) -> Self {
        Self {
            color: b.color.into(),
            alpha: b.alpha.into(),
        }
    }
}

impl ColorTargetKey {
    /// `None` when the slot has no format bound.
    #[must_use]
    pub fn to_wgpu(&self) -> Option<wgpu::ColorTargetState> {
        Some(wgpu::ColorTargetState {
            format: self.format.to_wgpu()?,
            blend: self.blend.map(Into::into),
            write_mask: wgpu::ColorWrites::from_bits_truncate(u32::from(self.write_mask.bits())),
        })
    }
}

impl From<StencilFaceKey> for wgpu::StencilFaceState {
    fn from(s: StencilFaceKey) -> Self {
        Self {
            compare: s.compare.into(),
            fail_op: s.fail_op.into(),
            depth_fail_op: s.depth_fail_op.into(),
            pass_op: s.pass_op.into(),
        }
    }
}

impl From<StencilStateKey> for wgpu::StencilState {
    fn from(s: StencilStateKey) -> Self {
        Self {
            front: s.front.into(),
            back: s.back.into(),
            read_mask: s.read_mask,
            write_mask: s.write_mask,
        }
    }
}

impl From<DepthBiasKey> for wgpu::DepthBiasState {
    fn from(b: DepthBiasKey) -> Self {
        Self {
            constant: b.constant,
            slope_scale: b.slope_scale(),
            clamp: b.clamp(),
        }
    }
}

impl DepthStencilKey {
    /// `None` when the format is not a depth format.
    #[must_use]
    pub fn to_wgpu(&self) -> Option<wgpu::DepthStencilState> {
        if !self.format.is_depth() {
            return None;
        }
        Some(wgpu::DepthStencilState {
            format: self.format.to_wgpu()?,
            depth_write_enabled: Some(self.depth_write_enabled),
            depth_compare: Some(self.depth_compare.into()),
            stencil: self.stencil.into(),
            bias: self.bias.into(),
        })
    }
}

impl RasterizerKey {
    #[must_use]
    pub fn to_wgpu(&self, topology: PrimitiveTopology) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: topology.into(),
            front_face: match self.front_face {
                FrontFace::Ccw => wgpu::FrontFace::Ccw,
                FrontFace::Cw => wgpu::FrontFace::Cw,
            },
            cull_mode: match self.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            polygon_mode: match self.fill_mode {
                FillMode::Solid => wgpu::PolygonMode::Fill,
                FillMode::Wireframe => wgpu::PolygonMode::Line,
            },
            unclipped_depth: self.unclipped_depth,
            conservative: self.conservative,
            ..Default::default()
        }
    }
}

impl From<MultisampleKey> for wgpu::MultisampleState {
    fn from(m: MultisampleKey) -> Self {
        Self {
            count: m.count,
            mask: m.mask,
            alpha_to_coverage_enabled: m.alpha_to_coverage_enabled,
        }
    }
}
