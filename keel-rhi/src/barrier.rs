use enumflags2::BitFlags;

#[enumflags2::bitflags]
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    TopOfPipe = 1 << 0,
    Host = 1 << 1,
    Transfer = 1 << 2,
    VertexAttributeInput = 1 << 3,
    IndexInput = 1 << 4,
    VertexShader = 1 << 5,
    FragmentShader = 1 << 6,
    ComputeShader = 1 << 7,
    GeometryShader = 1 << 8,
    ColorAttachmentOutput = 1 << 9,
    EarlyFragmentTests = 1 << 10,
    LateFragmentTests = 1 << 11,
    BottomOfPipe = 1 << 12,
    AllCommands = 1 << 13,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineStages(BitFlags<PipelineStage>);

impl PipelineStages {
    pub fn empty() -> Self {
        Self(BitFlags::empty())
    }

    pub fn insert(&mut self, stage: PipelineStage) {
        self.0.insert(stage);
    }

    #[inline]
    pub fn contains(&self, stage: PipelineStage) -> bool {
        self.0.contains(stage)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PipelineStage> {
        self.0.iter()
    }
}

impl From<PipelineStage> for PipelineStages {
    fn from(value: PipelineStage) -> Self {
        Self(BitFlags::from_flag(value))
    }
}

impl From<BitFlags<PipelineStage>> for PipelineStages {
    fn from(value: BitFlags<PipelineStage>) -> Self {
        Self(value)
    }
}

impl core::ops::BitOr for PipelineStages {
    type Output = PipelineStages;
    fn bitor(self, rhs: PipelineStages) -> Self::Output {
        PipelineStages(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for PipelineStages {
    fn bitor_assign(&mut self, rhs: PipelineStages) {
        self.0 |= rhs.0;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureLayout {
    #[default]
    Undefined,
    General,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
    ColorAttachment,
    DepthStencilAttachment,
    Present,
}

/// A one-shot layout transition of a whole texture (all mips, all layers).
pub struct TextureBarrier<'a, T> {
    pub texture: &'a T,
    pub old_layout: TextureLayout,
    pub new_layout: TextureLayout,
    pub src_stage: PipelineStages,
    pub dst_stage: PipelineStages,
}

impl<T> std::fmt::Debug for TextureBarrier<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureBarrier")
            .field("old_layout", &self.old_layout)
            .field("new_layout", &self.new_layout)
            .field("src_stage", &self.src_stage)
            .field("dst_stage", &self.dst_stage)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_union() {
        let stages = PipelineStages::from(PipelineStage::FragmentShader | PipelineStage::ComputeShader);
        assert!(stages.contains(PipelineStage::FragmentShader));
        assert!(stages.contains(PipelineStage::ComputeShader));
        assert!(!stages.contains(PipelineStage::TopOfPipe));
        assert_eq!(stages.iter().count(), 2);

        let mut more = PipelineStages::empty();
        assert!(more.is_empty());
        more |= stages;
        more.insert(PipelineStage::BottomOfPipe);
        assert_eq!(more.iter().count(), 3);
    }
}
