//! Texture descriptions and the per-texture runtime record.

use enumflags2::{bitflags, BitFlags};
use parking_lot::Mutex;
use crate::buffer::StorageType;
use crate::error::{RhiError, RhiResult};
use crate::synchronization::{TextureState, TextureUse};

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R_UN8,
    R_UI16,
    R_UN16,
    R_F16,
    R_F32,

    RG_UN8,
    RG_UI16,
    RG_UN16,
    RG_F16,
    RG_F32,

    RGBA_UN8,
    RGBA_UI32,
    RGBA_F16,
    RGBA_F32,
    RGBA_SRGB8,

    BGRA_UN8,
    BGRA_SRGB8,

    ETC2_RGB8,
    ETC2_SRGB8,
    BC7_RGBA,

    Z_UN16,
    Z_UN24,
    Z_F32,
    Z_UN24_S_UI8,
}

impl TextureFormat {
    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Z_UN16 | Self::Z_UN24 | Self::Z_F32 | Self::Z_UN24_S_UI8)
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Z_UN24_S_UI8)
    }

    #[inline]
    pub fn is_depth_or_stencil(self) -> bool {
        self.is_depth() || self.has_stencil()
    }

    #[inline]
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::ETC2_RGB8 | Self::ETC2_SRGB8 | Self::BC7_RGBA)
    }

    /// Bytes per texel block and the block's edge in texels (1 for uncompressed formats).
    pub fn block(self) -> (u32, u32) {
        match self {
            Self::R_UN8 => (1, 1),
            Self::R_UI16 | Self::R_UN16 | Self::R_F16 | Self::RG_UN8 | Self::Z_UN16 => (2, 1),
            Self::R_F32
            | Self::RG_UI16
            | Self::RG_UN16
            | Self::RG_F16
            | Self::RGBA_UN8
            | Self::RGBA_SRGB8
            | Self::BGRA_UN8
            | Self::BGRA_SRGB8
            | Self::Z_UN24
            | Self::Z_F32
            | Self::Z_UN24_S_UI8 => (4, 1),
            Self::RG_F32 | Self::RGBA_F16 => (8, 1),
            Self::RGBA_UI32 | Self::RGBA_F32 => (16, 1),
            Self::ETC2_RGB8 | Self::ETC2_SRGB8 => (8, 4),
            Self::BC7_RGBA => (16, 4),
        }
    }

    /// Tightly packed byte size of an image of `extent`.
    pub fn image_size(self, extent: Dimensions) -> u64 {
        let (bytes, edge) = self.block();
        let blocks_x = extent.width.div_ceil(edge) as u64;
        let blocks_y = extent.height.div_ceil(edge) as u64;
        blocks_x * blocks_y * extent.depth as u64 * bytes as u64
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureType {
    #[default]
    Texture2D,
    Texture3D,
    Cube,
}

#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    Sampled = 1 << 0,
    Storage = 1 << 1,
    Attachment = 1 << 2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self { width, height, depth }
    }

    /// Size of mip `level`, never smaller than one texel.
    pub fn at_mip(&self, level: u32) -> Self {
        Self {
            width: self.width.checked_shr(level).unwrap_or(0).max(1),
            height: self.height.checked_shr(level).unwrap_or(0).max(1),
            depth: self.depth.checked_shr(level).unwrap_or(0).max(1),
        }
    }
}

/// A box inside a run of mip levels of a run of layers.
///
/// `offset` and `dimensions` describe the box at `mip_level`; further levels use the same box
/// scaled down. Upload data is tightly packed, layer by layer, each layer holding its mips in
/// ascending order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureRangeDesc {
    pub offset: [u32; 3],
    pub dimensions: Dimensions,
    pub layer: u32,
    pub num_layers: u32,
    pub mip_level: u32,
    pub num_mip_levels: u32,
}

impl TextureRangeDesc {
    /// All of mip 0 of layer 0.
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            offset: [0; 3],
            dimensions,
            layer: 0,
            num_layers: 1,
            mip_level: 0,
            num_mip_levels: 1,
        }
    }

    /// A `width` x `height` rectangle at `(x, y)` of mip 0, layer 0.
    pub fn rect(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { offset: [x, y, 0], ..Self::new(Dimensions::new(width, height, 1)) }
    }

    pub fn with_layers(mut self, layer: u32, num_layers: u32) -> Self {
        self.layer = layer;
        self.num_layers = num_layers;
        self
    }

    pub fn with_mip_levels(mut self, mip_level: u32, num_mip_levels: u32) -> Self {
        self.mip_level = mip_level;
        self.num_mip_levels = num_mip_levels;
        self
    }

    /// Absolute mip levels covered.
    pub fn levels(&self) -> std::ops::Range<u32> {
        self.mip_level..self.mip_level + self.num_mip_levels
    }

    /// Absolute layers covered.
    pub fn layers(&self) -> std::ops::Range<u32> {
        self.layer..self.layer + self.num_layers
    }

    /// Extent of the box at absolute mip `level`.
    pub fn extent_at(&self, level: u32) -> Dimensions {
        self.dimensions.at_mip(level.saturating_sub(self.mip_level))
    }

    /// Offset of the box at absolute mip `level`.
    pub fn offset_at(&self, level: u32) -> [u32; 3] {
        let shift = level.saturating_sub(self.mip_level);
        self.offset.map(|o| o.checked_shr(shift).unwrap_or(0))
    }

    /// Bytes the range takes when tightly packed in `format`.
    pub fn data_size(&self, format: TextureFormat) -> u64 {
        let per_layer: u64 = self.levels().map(|level| format.image_size(self.extent_at(level))).sum();
        per_layer * self.num_layers as u64
    }
}

/// Full mip chain length for a `width` x `height` image.
pub fn calc_num_mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Texture descriptor for creating GPU textures.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub name: String,
    pub texture_type: TextureType,
    pub format: TextureFormat,
    pub dimensions: Dimensions,
    pub num_layers: u32,
    pub num_samples: u32,
    pub num_mip_levels: u32,
    pub usage: BitFlags<TextureUsage>,
    pub storage: StorageType,
}

impl TextureDesc {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(name: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            name: name.to_owned(),
            texture_type: TextureType::Texture2D,
            format,
            dimensions: Dimensions::new(width, height, 1),
            num_layers: 1,
            num_samples: 1,
            num_mip_levels: 1,
            usage: TextureUsage::Sampled.into(),
            storage: StorageType::Device,
        }
    }

    /// Create a new 3D texture descriptor.
    pub fn new_3d(name: &str, width: u32, height: u32, depth: u32, format: TextureFormat) -> Self {
        Self {
            texture_type: TextureType::Texture3D,
            dimensions: Dimensions::new(width, height, depth),
            ..Self::new_2d(name, width, height, format)
        }
    }

    /// Create a cube map texture descriptor.
    pub fn new_cube(name: &str, size: u32, format: TextureFormat) -> Self {
        Self {
            texture_type: TextureType::Cube,
            num_layers: 6,
            ..Self::new_2d(name, size, size, format)
        }
    }

    /// Create a render target descriptor that can also be sampled.
    pub fn new_attachment(name: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            usage: TextureUsage::Attachment | TextureUsage::Sampled,
            ..Self::new_2d(name, width, height, format)
        }
    }

    pub fn with_usage(mut self, usage: impl Into<BitFlags<TextureUsage>>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.num_samples = samples;
        self
    }

    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.num_mip_levels = levels;
        self
    }

    /// Request the full mip chain for the current dimensions.
    pub fn with_full_mip_chain(mut self) -> Self {
        self.num_mip_levels = calc_num_mip_levels(self.dimensions.width, self.dimensions.height);
        self
    }

    pub fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    pub(crate) fn validate(&self) -> RhiResult<()> {
        let Dimensions { width, height, depth } = self.dimensions;
        if width == 0 || height == 0 || depth == 0 {
            return Err(RhiError::out_of_range(format!(
                "texture `{}` has zero dimensions {width}x{height}x{depth}", self.name
            )));
        }
        if self.texture_type != TextureType::Texture3D && depth != 1 {
            return Err(RhiError::out_of_range(format!("texture `{}` is not 3D but has depth {depth}", self.name)));
        }
        if self.texture_type == TextureType::Cube && (width != height || self.num_layers != 6) {
            return Err(RhiError::out_of_range(format!("cube texture `{}` must be square with 6 layers", self.name)));
        }
        if self.num_layers == 0 {
            return Err(RhiError::out_of_range(format!("texture `{}` has zero layers", self.name)));
        }
        if self.num_samples == 0 || !self.num_samples.is_power_of_two() || self.num_samples > 64 {
            return Err(RhiError::out_of_range(format!(
                "texture `{}` has an invalid sample count {}", self.name, self.num_samples
            )));
        }
        let max_levels = calc_num_mip_levels(width, height);
        if self.num_mip_levels == 0 || self.num_mip_levels > max_levels {
            return Err(RhiError::out_of_range(format!(
                "texture `{}` requests {} mip levels, at most {max_levels} allowed",
                self.name, self.num_mip_levels
            )));
        }
        if self.num_samples > 1 && self.num_mip_levels > 1 {
            return Err(RhiError::out_of_range(format!("multisampled texture `{}` cannot have mips", self.name)));
        }
        if self.usage.is_empty() {
            return Err(RhiError::out_of_range(format!("texture `{}` has no usage", self.name)));
        }
        if self.storage == StorageType::Memoryless && !self.usage.contains(TextureUsage::Attachment) {
            return Err(RhiError::out_of_range(format!(
                "memoryless texture `{}` must be an attachment", self.name
            )));
        }
        Ok(())
    }
}

/// A pooled texture: the backend object plus the state the recorder tracks for it.
pub struct Texture<N> {
    pub(crate) native: N,
    pub(crate) name: String,
    pub(crate) format: TextureFormat,
    pub(crate) dimensions: Dimensions,
    pub(crate) num_samples: u32,
    pub(crate) num_mip_levels: u32,
    pub(crate) num_layers: u32,
    pub(crate) usage: BitFlags<TextureUsage>,
    pub(crate) swapchain: bool,
    pub(crate) state: Mutex<TextureState>,
}

impl<N> Texture<N> {
    pub(crate) fn new(native: N, desc: &TextureDesc, swapchain: bool) -> Self {
        Self {
            native,
            name: desc.name.clone(),
            format: desc.format,
            dimensions: desc.dimensions,
            num_samples: desc.num_samples,
            num_mip_levels: desc.num_mip_levels,
            num_layers: desc.num_layers,
            usage: desc.usage,
            swapchain,
            state: Mutex::new(TextureState::default()),
        }
    }

    #[inline]
    pub fn native(&self) -> &N { &self.native }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    #[inline]
    pub fn format(&self) -> TextureFormat { self.format }

    #[inline]
    pub fn dimensions(&self) -> Dimensions { self.dimensions }

    #[inline]
    pub fn num_samples(&self) -> u32 { self.num_samples }

    #[inline]
    pub fn num_mip_levels(&self) -> u32 { self.num_mip_levels }

    #[inline]
    pub fn num_layers(&self) -> u32 { self.num_layers }

    #[inline]
    pub fn is_storage(&self) -> bool { self.usage.contains(TextureUsage::Storage) }

    /// The role a texture settles into after its contents are written by a transfer.
    pub(crate) fn resting_use(&self) -> Option<TextureUse> {
        if self.usage.contains(TextureUsage::Sampled) {
            Some(TextureUse::ShaderRead)
        } else if self.is_storage() {
            Some(TextureUse::Storage)
        } else {
            None
        }
    }

    /// Check that `range` lies inside this texture.
    pub(crate) fn validate_range(&self, range: &TextureRangeDesc) -> RhiResult<()> {
        let Dimensions { width, height, depth } = range.dimensions;
        if width == 0 || height == 0 || depth == 0 || range.num_layers == 0 || range.num_mip_levels == 0 {
            return Err(RhiError::out_of_range(format!("empty range {range:?} of texture `{}`", self.name)));
        }
        if range.layer.checked_add(range.num_layers).is_none_or(|end| end > self.num_layers) {
            return Err(RhiError::out_of_range(format!(
                "layers {}..+{} of texture `{}` with {} layers",
                range.layer, range.num_layers, self.name, self.num_layers
            )));
        }
        if range.mip_level.checked_add(range.num_mip_levels).is_none_or(|end| end > self.num_mip_levels) {
            return Err(RhiError::out_of_range(format!(
                "mips {}..+{} of texture `{}` with {} levels",
                range.mip_level, range.num_mip_levels, self.name, self.num_mip_levels
            )));
        }
        let mip = self.dimensions.at_mip(range.mip_level);
        let fits = |offset: u32, size: u32, limit: u32| offset.checked_add(size).is_some_and(|end| end <= limit);
        if !(fits(range.offset[0], width, mip.width)
            && fits(range.offset[1], height, mip.height)
            && fits(range.offset[2], depth, mip.depth))
        {
            return Err(RhiError::out_of_range(format!(
                "range {range:?} exceeds mip {} of texture `{}` ({}x{}x{})",
                range.mip_level, self.name, mip.width, mip.height, mip.depth
            )));
        }
        if range.num_mip_levels > 1 && (range.offset != [0; 3] || range.dimensions != mip) {
            return Err(RhiError::out_of_range(format!(
                "multi-level range of texture `{}` must cover whole mips", self.name
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn is_swapchain(&self) -> bool { self.swapchain }

    /// Snapshot of the tracked layout and last stage.
    #[inline]
    pub fn state(&self) -> TextureState { *self.state.lock() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn mip_chain_length() {
        assert_eq!(calc_num_mip_levels(1, 1), 1);
        assert_eq!(calc_num_mip_levels(512, 512), 10);
        assert_eq!(calc_num_mip_levels(640, 480), 10);
        assert_eq!(Dimensions::new(512, 256, 1).at_mip(9), Dimensions::new(1, 1, 1));
        assert_eq!(Dimensions::new(512, 256, 1).at_mip(2), Dimensions::new(128, 64, 1));
    }

    #[test]
    fn validation_rejects_bad_descriptions() {
        let ok = TextureDesc::new_2d("ok", 64, 64, TextureFormat::RGBA_UN8);
        assert!(ok.validate().is_ok());

        let zero = TextureDesc::new_2d("zero", 0, 64, TextureFormat::RGBA_UN8);
        assert_eq!(zero.validate().unwrap_err().code, ErrorCode::ArgumentOutOfRange);

        let msaa_mips = TextureDesc::new_attachment("msaa", 64, 64, TextureFormat::RGBA_UN8)
            .with_samples(4)
            .with_mip_levels(2);
        assert!(msaa_mips.validate().is_err());

        let too_many = TextureDesc::new_2d("mips", 4, 4, TextureFormat::RGBA_UN8).with_mip_levels(4);
        assert!(too_many.validate().is_err());
        assert!(TextureDesc::new_2d("mips", 4, 4, TextureFormat::RGBA_UN8).with_full_mip_chain().validate().is_ok());

        let memoryless = TextureDesc::new_2d("transient", 8, 8, TextureFormat::Z_F32)
            .with_storage(StorageType::Memoryless);
        assert!(memoryless.validate().is_err());
    }

    #[test]
    fn range_sizes_follow_format_blocks() {
        assert_eq!(TextureFormat::RGBA_UN8.image_size(Dimensions::new(4, 4, 1)), 64);
        assert_eq!(TextureFormat::BC7_RGBA.image_size(Dimensions::new(5, 4, 1)), 32);
        assert_eq!(TextureFormat::R_F16.image_size(Dimensions::new(3, 1, 2)), 12);

        let range = TextureRangeDesc::new(Dimensions::new(4, 4, 1)).with_mip_levels(0, 3).with_layers(0, 6);
        // 4x4 + 2x2 + 1x1 texels per layer.
        assert_eq!(range.data_size(TextureFormat::RGBA_UN8), (16 + 4 + 1) * 4 * 6);
        assert_eq!(range.extent_at(2), Dimensions::new(1, 1, 1));
        assert_eq!(TextureRangeDesc::rect(8, 4, 2, 2).with_mip_levels(1, 1).offset_at(2), [4, 2, 0]);
    }

    #[test]
    fn ranges_must_fit_the_texture() {
        let desc = TextureDesc::new_2d("atlas", 64, 32, TextureFormat::RGBA_UN8).with_mip_levels(3);
        let tex = Texture::new((), &desc, false);

        assert!(tex.validate_range(&TextureRangeDesc::new(Dimensions::new(64, 32, 1))).is_ok());
        assert!(tex.validate_range(&TextureRangeDesc::rect(60, 0, 4, 32)).is_ok());
        assert!(tex.validate_range(&TextureRangeDesc::rect(61, 0, 4, 32)).is_err());
        assert!(tex.validate_range(&TextureRangeDesc::rect(0, 0, 32, 16).with_mip_levels(1, 1)).is_ok());
        assert!(tex.validate_range(&TextureRangeDesc::rect(0, 0, 64, 32).with_mip_levels(1, 1)).is_err());
        assert!(tex.validate_range(&TextureRangeDesc::new(Dimensions::new(64, 32, 1)).with_mip_levels(0, 4)).is_err());
        assert!(tex.validate_range(&TextureRangeDesc::new(Dimensions::new(64, 32, 1)).with_layers(1, 1)).is_err());
        assert!(tex.validate_range(&TextureRangeDesc::rect(0, 0, 0, 4)).is_err());

        // Several levels at once only as whole mips.
        assert!(tex.validate_range(&TextureRangeDesc::new(Dimensions::new(64, 32, 1)).with_mip_levels(0, 3)).is_ok());
        assert!(tex.validate_range(&TextureRangeDesc::rect(0, 0, 32, 32).with_mip_levels(0, 2)).is_err());
    }

    #[test]
    fn depth_formats() {
        assert!(TextureFormat::Z_F32.is_depth());
        assert!(TextureFormat::Z_UN24_S_UI8.has_stencil());
        assert!(!TextureFormat::BGRA_UN8.is_depth_or_stencil());
    }
}
