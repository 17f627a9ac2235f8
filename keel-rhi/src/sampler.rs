//! Sampler descriptions.

use crate::error::{RhiError, RhiResult};
use crate::pipeline::CompareOp;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SamplerFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SamplerMip {
    #[default]
    Disabled,
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SamplerWrap {
    #[default]
    Repeat,
    Clamp,
    MirrorRepeat,
}

/// Sampler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub name: String,
    pub min_filter: SamplerFilter,
    pub mag_filter: SamplerFilter,
    pub mip_map: SamplerMip,
    pub wrap_u: SamplerWrap,
    pub wrap_v: SamplerWrap,
    pub wrap_w: SamplerWrap,
    pub depth_compare_op: CompareOp,
    pub depth_compare_enabled: bool,
    pub mip_lod_min: u8,
    pub mip_lod_max: u8,
    pub max_anisotropic: u8,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            min_filter: SamplerFilter::Linear,
            mag_filter: SamplerFilter::Linear,
            mip_map: SamplerMip::Disabled,
            wrap_u: SamplerWrap::Repeat,
            wrap_v: SamplerWrap::Repeat,
            wrap_w: SamplerWrap::Repeat,
            depth_compare_op: CompareOp::LessEqual,
            depth_compare_enabled: false,
            mip_lod_min: 0,
            mip_lod_max: 15,
            max_anisotropic: 1,
        }
    }
}

impl SamplerDesc {
    /// Create a linear filtering sampler config.
    pub fn linear(name: &str) -> Self {
        Self { name: name.to_owned(), ..Default::default() }
    }

    /// Create a nearest (point) filtering sampler config.
    pub fn nearest(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            min_filter: SamplerFilter::Nearest,
            mag_filter: SamplerFilter::Nearest,
            mip_map: SamplerMip::Nearest,
            ..Default::default()
        }
    }

    /// Create a sampler config with anisotropic filtering.
    pub fn anisotropic(name: &str, max_anisotropic: u8) -> Self {
        Self {
            name: name.to_owned(),
            mip_map: SamplerMip::Linear,
            max_anisotropic,
            ..Default::default()
        }
    }

    /// Set address mode for all axes.
    pub fn with_wrap(mut self, wrap: SamplerWrap) -> Self {
        self.wrap_u = wrap;
        self.wrap_v = wrap;
        self.wrap_w = wrap;
        self
    }

    /// Enable depth comparison, as used by shadow map samplers.
    pub fn with_depth_compare(mut self, op: CompareOp) -> Self {
        self.depth_compare_enabled = true;
        self.depth_compare_op = op;
        self
    }

    pub(crate) fn validate(&self, max_anisotropy: f32) -> RhiResult<()> {
        if self.mip_lod_min > self.mip_lod_max {
            return Err(RhiError::out_of_range(format!(
                "sampler `{}` has min lod {} above max lod {}",
                self.name, self.mip_lod_min, self.mip_lod_max
            )));
        }
        if self.max_anisotropic == 0 || f32::from(self.max_anisotropic) > max_anisotropy {
            return Err(RhiError::out_of_range(format!(
                "sampler `{}` requests anisotropy {} (device max {max_anisotropy})",
                self.name, self.max_anisotropic
            )));
        }
        Ok(())
    }
}

/// A pooled sampler.
pub struct Sampler<N> {
    pub(crate) native: N,
    pub(crate) name: String,
}

impl<N> Sampler<N> {
    #[inline]
    pub fn native(&self) -> &N { &self.native }

    #[inline]
    pub fn name(&self) -> &str { &self.name }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anisotropy_is_bounded_by_the_device() {
        assert!(SamplerDesc::anisotropic("aniso", 16).validate(16.0).is_ok());
        assert!(SamplerDesc::anisotropic("aniso", 16).validate(8.0).is_err());
        assert!(SamplerDesc::anisotropic("zero", 0).validate(16.0).is_err());
    }

    #[test]
    fn lod_range_must_be_ordered() {
        let desc = SamplerDesc { mip_lod_min: 4, mip_lod_max: 2, ..SamplerDesc::linear("bad") };
        assert!(desc.validate(1.0).is_err());
    }
}
