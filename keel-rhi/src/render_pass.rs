//! Render pass and framebuffer descriptions consumed by `begin_rendering`.

use keel_core::collections::SmallVec;
use crate::handle::TextureHandle;
use crate::pipeline::MAX_COLOR_ATTACHMENTS;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Invalid,
    #[default]
    DontCare,
    Load,
    Clear,
    None,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StoreOp {
    DontCare,
    #[default]
    Store,
    MsaaResolve,
    None,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum QueueType {
    Compute,
    #[default]
    Graphics,
    Transfer,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// How one attachment is loaded and stored during a pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttachmentDesc {
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub layer: u32,
    pub level: u32,
    pub clear_color: Color,
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

impl Default for AttachmentDesc {
    fn default() -> Self {
        Self {
            load_op: LoadOp::DontCare,
            store_op: StoreOp::Store,
            layer: 0,
            level: 0,
            clear_color: Color::BLACK,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

impl AttachmentDesc {
    pub fn clear(color: Color) -> Self {
        Self { load_op: LoadOp::Clear, clear_color: color, ..Default::default() }
    }

    pub fn clear_depth(depth: f32) -> Self {
        Self { load_op: LoadOp::Clear, clear_depth: depth, ..Default::default() }
    }

    pub fn load() -> Self {
        Self { load_op: LoadOp::Load, ..Default::default() }
    }

    pub fn with_store_op(mut self, store_op: StoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderPass {
    pub color: SmallVec<[AttachmentDesc; MAX_COLOR_ATTACHMENTS]>,
    pub depth: AttachmentDesc,
    /// `LoadOp::Invalid` means the pass has no stencil attachment.
    pub stencil: AttachmentDesc,
}

impl Default for RenderPass {
    fn default() -> Self {
        Self {
            color: SmallVec::new(),
            depth: AttachmentDesc { store_op: StoreOp::DontCare, ..Default::default() },
            stencil: AttachmentDesc { load_op: LoadOp::Invalid, store_op: StoreOp::DontCare, ..Default::default() },
        }
    }
}

impl RenderPass {
    pub fn new(color: &[AttachmentDesc]) -> Self {
        Self { color: SmallVec::from_slice(color), ..Default::default() }
    }

    pub fn with_depth(mut self, depth: AttachmentDesc) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_stencil(mut self, stencil: AttachmentDesc) -> Self {
        self.stencil = stencil;
        self
    }

    #[inline]
    pub fn has_stencil(&self) -> bool {
        self.stencil.load_op != LoadOp::Invalid
    }

    #[inline]
    pub fn num_color_attachments(&self) -> usize {
        self.color.len()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FramebufferAttachment {
    pub texture: TextureHandle,
    /// Single-sampled target for a `StoreOp::MsaaResolve` colour attachment.
    pub resolve_texture: TextureHandle,
}

impl FramebufferAttachment {
    pub fn new(texture: TextureHandle) -> Self {
        Self { texture, resolve_texture: TextureHandle::EMPTY }
    }

    pub fn with_resolve(mut self, resolve_texture: TextureHandle) -> Self {
        self.resolve_texture = resolve_texture;
        self
    }
}

/// The textures a pass renders into. Attachments are looked up by handle, so several
/// framebuffers may alias one render target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Framebuffer {
    pub color: SmallVec<[FramebufferAttachment; MAX_COLOR_ATTACHMENTS]>,
    pub depth_stencil: Option<FramebufferAttachment>,
    pub debug_name: String,
}

impl Framebuffer {
    pub fn new(color: &[TextureHandle]) -> Self {
        Self {
            color: color.iter().copied().map(FramebufferAttachment::new).collect(),
            ..Default::default()
        }
    }

    pub fn with_depth_stencil(mut self, texture: TextureHandle) -> Self {
        self.depth_stencil = Some(FramebufferAttachment::new(texture));
        self
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = name.into();
        self
    }

    #[inline]
    pub fn num_color_attachments(&self) -> usize {
        self.color.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { x: 0.0, y: 0.0, width, height, min_depth: 0.0, max_depth: 1.0 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn new(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }
}

pub const MAX_DEPENDENCIES: usize = 4;

/// Textures a draw or dispatch reads. Each is moved into the matching layout first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dependencies {
    pub textures: [TextureHandle; MAX_DEPENDENCIES],
}

impl Dependencies {
    pub fn new(textures: &[TextureHandle]) -> Self {
        let mut deps = Self::default();
        for (slot, texture) in deps.textures.iter_mut().zip(textures) {
            *slot = *texture;
        }
        deps
    }

    pub fn iter(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.textures.iter().copied().take_while(|handle| handle.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;

    #[test]
    fn dependencies_stop_at_the_first_empty_slot() {
        let a: TextureHandle = Handle::new(1, 1);
        let b: TextureHandle = Handle::new(2, 1);
        let deps = Dependencies::new(&[a, b]);
        assert_eq!(deps.iter().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(Dependencies::default().iter().count(), 0);
    }

    #[test]
    fn framebuffer_from_handles() {
        let fb = Framebuffer::new(&[Handle::new(0, 1)]).with_depth_stencil(Handle::new(1, 1));
        assert_eq!(fb.num_color_attachments(), 1);
        assert!(fb.color[0].resolve_texture.is_empty());
        assert!(fb.depth_stencil.is_some());
    }
}
