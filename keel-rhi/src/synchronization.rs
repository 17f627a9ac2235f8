//! Per-texture layout tracking.
//!
//! Every texture carries one [`TextureState`]. Before a texture is used in a new role the
//! recorder asks [`transition`] for the barrier into that role; the tracked state then becomes
//! the new layout plus the stage that last wrote the texture. There is no cross-pass
//! dependency graph: a storage image already in `General` is assumed to have been written by
//! compute, anything else waits on the whole pipe.

use crate::barrier::{PipelineStage, PipelineStages, TextureBarrier, TextureLayout};
use crate::texture::Texture;
use crate::utility::verify;

/// Current layout of a texture and the last stage known to write it. `TopOfPipe` means no
/// write has been tracked yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureState {
    pub layout: TextureLayout,
    pub stage: PipelineStages,
}

impl Default for TextureState {
    fn default() -> Self {
        Self {
            layout: TextureLayout::Undefined,
            stage: PipelineStage::TopOfPipe.into(),
        }
    }
}

impl TextureState {
    pub fn new(layout: TextureLayout, stage: impl Into<PipelineStages>) -> Self {
        Self { layout, stage: stage.into() }
    }

    /// State of a colour target once its render pass has ended.
    pub fn color_after_rendering() -> Self {
        Self::new(TextureLayout::ColorAttachment, PipelineStage::ColorAttachmentOutput)
    }

    /// State of a depth/stencil target once its render pass has ended.
    pub fn depth_after_rendering() -> Self {
        Self::new(TextureLayout::DepthStencilAttachment, PipelineStage::LateFragmentTests)
    }
}

/// The role a texture is about to play.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureUse {
    ColorAttachment,
    DepthStencilAttachment,
    ShaderRead,
    /// Read/write image access from compute.
    Storage,
    /// Destination of a copy or blit.
    TransferDst,
    Present,
}

impl TextureUse {
    /// Stage that writes the texture in this role, or `None` for read-only roles.
    pub fn writer(self) -> Option<PipelineStage> {
        match self {
            TextureUse::ColorAttachment => Some(PipelineStage::ColorAttachmentOutput),
            TextureUse::DepthStencilAttachment => Some(PipelineStage::LateFragmentTests),
            TextureUse::Storage => Some(PipelineStage::ComputeShader),
            TextureUse::TransferDst => Some(PipelineStage::Transfer),
            TextureUse::ShaderRead | TextureUse::Present => None,
        }
    }
}

/// Layout and stage masks for moving from `current` into `role`.
///
/// `is_depth` picks the attachment writer to wait on for shader reads; a tracked transfer or
/// compute writer takes precedence.
pub fn plan(current: TextureState, role: TextureUse, is_depth: bool) -> (TextureLayout, PipelineStages, PipelineStages) {
    let shader_stages = PipelineStages::from(PipelineStage::FragmentShader | PipelineStage::ComputeShader);
    match role {
        TextureUse::ColorAttachment => (
            TextureLayout::ColorAttachment,
            PipelineStage::ColorAttachmentOutput.into(),
            shader_stages,
        ),
        TextureUse::DepthStencilAttachment => (
            TextureLayout::DepthStencilAttachment,
            PipelineStage::LateFragmentTests.into(),
            PipelineStage::TopOfPipe.into(),
        ),
        TextureUse::ShaderRead => {
            let src = if current.stage.contains(PipelineStage::Transfer) {
                PipelineStage::Transfer
            } else if current.stage.contains(PipelineStage::ComputeShader) {
                PipelineStage::ComputeShader
            } else if is_depth {
                PipelineStage::LateFragmentTests
            } else {
                PipelineStage::ColorAttachmentOutput
            };
            (TextureLayout::ShaderReadOnly, src.into(), shader_stages)
        }
        TextureUse::Storage => {
            let src = if current.layout == TextureLayout::General {
                PipelineStage::ComputeShader
            } else if current.stage.contains(PipelineStage::Transfer) {
                PipelineStage::Transfer
            } else {
                PipelineStage::BottomOfPipe
            };
            (TextureLayout::General, src.into(), PipelineStage::ComputeShader.into())
        }
        TextureUse::TransferDst => (TextureLayout::TransferDst, current.stage, PipelineStage::Transfer.into()),
        TextureUse::Present => (
            TextureLayout::Present,
            PipelineStage::ColorAttachmentOutput.into(),
            PipelineStage::BottomOfPipe.into(),
        ),
    }
}

/// Build the barrier moving `texture` into `role` and record the new state.
///
/// Returns `None` for shader reads of multisampled textures, which can never be sampled, and
/// for shader reads of swapchain images, which are a fault.
pub fn transition<N>(texture: &Texture<N>, role: TextureUse) -> Option<TextureBarrier<'_, N>> {
    if role == TextureUse::ShaderRead {
        if texture.num_samples > 1 {
            return None;
        }
        if !verify!(!texture.swapchain, "swapchain image `{}` cannot be read by shaders", texture.name) {
            return None;
        }
    }

    let mut state = texture.state.lock();
    let (barrier, next) = barrier_from(texture, *state, role);
    *state = next;
    Some(barrier)
}

/// The barrier moving `texture` from `current` into `role` and the state it leaves behind,
/// without touching the tracked state.
pub fn barrier_from<N>(
    texture: &Texture<N>,
    current: TextureState,
    role: TextureUse,
) -> (TextureBarrier<'_, N>, TextureState) {
    let (new_layout, src_stage, dst_stage) = plan(current, role, texture.format.is_depth_or_stencil());
    let barrier = TextureBarrier {
        texture: &texture.native,
        old_layout: current.layout,
        new_layout,
        src_stage,
        dst_stage,
    };
    let stage = role.writer().map_or(current.stage, |writer| writer.into());
    (barrier, TextureState { layout: new_layout, stage })
}

/// Barriers around a transfer write into `texture`: into `TransferDst`, then into the role the
/// texture settles in, if any. Also returns the state after both.
pub(crate) fn transfer_write<N>(
    texture: &Texture<N>,
    current: TextureState,
) -> (TextureBarrier<'_, N>, Option<TextureBarrier<'_, N>>, TextureState) {
    let (before, written) = barrier_from(texture, current, TextureUse::TransferDst);
    match texture.resting_use() {
        Some(role) => {
            let (after, next) = barrier_from(texture, written, role);
            (before, Some(after), next)
        }
        None => (before, None, written),
    }
}

/// Overwrite the tracked state without emitting a barrier, e.g. after a render pass.
pub fn set_state<N>(texture: &Texture<N>, state: TextureState) {
    *texture.state.lock() = state;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::{TextureDesc, TextureFormat};

    fn texture(desc: TextureDesc) -> Texture<u32> {
        Texture::new(7, &desc, false)
    }

    #[test]
    fn colour_attachment_then_shader_read() {
        let tex = texture(TextureDesc::new_attachment("rt", 64, 64, TextureFormat::RGBA_UN8));

        let barrier = transition(&tex, TextureUse::ColorAttachment).unwrap();
        assert_eq!(*barrier.texture, 7);
        assert_eq!(barrier.old_layout, TextureLayout::Undefined);
        assert_eq!(barrier.new_layout, TextureLayout::ColorAttachment);
        assert!(barrier.src_stage.contains(PipelineStage::ColorAttachmentOutput));
        assert!(barrier.dst_stage.contains(PipelineStage::FragmentShader));
        assert!(barrier.dst_stage.contains(PipelineStage::ComputeShader));

        assert_eq!(tex.state(), TextureState::color_after_rendering());

        set_state(&tex, TextureState::color_after_rendering());
        let barrier = transition(&tex, TextureUse::ShaderRead).unwrap();
        assert_eq!(barrier.old_layout, TextureLayout::ColorAttachment);
        assert_eq!(barrier.src_stage, PipelineStage::ColorAttachmentOutput.into());
        // Reading keeps the writer.
        assert_eq!(
            tex.state(),
            TextureState::new(TextureLayout::ShaderReadOnly, PipelineStage::ColorAttachmentOutput)
        );
    }

    #[test]
    fn shader_read_after_upload_waits_for_the_transfer() {
        let tex = texture(TextureDesc::new_2d("albedo", 64, 64, TextureFormat::RGBA_UN8));
        let copy = transition(&tex, TextureUse::TransferDst).unwrap();
        assert_eq!(copy.src_stage, PipelineStage::TopOfPipe.into());
        assert_eq!(copy.dst_stage, PipelineStage::Transfer.into());
        assert_eq!(tex.state(), TextureState::new(TextureLayout::TransferDst, PipelineStage::Transfer));

        let read = transition(&tex, TextureUse::ShaderRead).unwrap();
        assert_eq!(read.old_layout, TextureLayout::TransferDst);
        assert_eq!(read.src_stage, PipelineStage::Transfer.into());

        // A later copy waits for whoever wrote last.
        set_state(&tex, TextureState::color_after_rendering());
        let again = transition(&tex, TextureUse::TransferDst).unwrap();
        assert_eq!(again.src_stage, PipelineStage::ColorAttachmentOutput.into());
    }

    #[test]
    fn barrier_from_leaves_the_tracked_state_alone() {
        let tex = texture(TextureDesc::new_2d("mips", 16, 16, TextureFormat::RGBA_UN8));
        let (barrier, next) = barrier_from(&tex, TextureState::default(), TextureUse::TransferDst);
        assert_eq!(barrier.new_layout, TextureLayout::TransferDst);
        assert_eq!(next.stage, PipelineStage::Transfer.into());
        assert_eq!(tex.state(), TextureState::default());
    }

    #[test]
    fn depth_read_waits_for_late_tests() {
        let tex = texture(TextureDesc::new_attachment("depth", 64, 64, TextureFormat::Z_F32));
        let barrier = transition(&tex, TextureUse::DepthStencilAttachment).unwrap();
        assert_eq!(barrier.dst_stage, PipelineStage::TopOfPipe.into());

        let barrier = transition(&tex, TextureUse::ShaderRead).unwrap();
        assert_eq!(barrier.src_stage, PipelineStage::LateFragmentTests.into());
    }

    #[test]
    fn storage_heuristic_depends_on_general_layout() {
        let tex = texture(TextureDesc::new_2d("img", 16, 16, TextureFormat::RGBA_F32));
        let first = transition(&tex, TextureUse::Storage).unwrap();
        assert_eq!(first.src_stage, PipelineStage::BottomOfPipe.into());
        let second = transition(&tex, TextureUse::Storage).unwrap();
        assert_eq!(second.old_layout, TextureLayout::General);
        assert_eq!(second.src_stage, PipelineStage::ComputeShader.into());
        assert_eq!(tex.state(), TextureState::new(TextureLayout::General, PipelineStage::ComputeShader));
    }

    #[test]
    fn multisampled_textures_skip_shader_reads() {
        let tex = texture(TextureDesc::new_attachment("msaa", 64, 64, TextureFormat::RGBA_UN8).with_samples(4));
        assert!(transition(&tex, TextureUse::ShaderRead).is_none());
        assert_eq!(tex.state(), TextureState::default());
    }

    #[test]
    fn barrier_is_emitted_even_without_a_layout_change() {
        let tex = texture(TextureDesc::new_attachment("rt", 8, 8, TextureFormat::BGRA_UN8));
        transition(&tex, TextureUse::ColorAttachment).unwrap();
        let again = transition(&tex, TextureUse::ColorAttachment).unwrap();
        assert_eq!(again.old_layout, again.new_layout);
    }
}
