use crate::error::{RhiError, RhiResult};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
    Compute,
}

/// Pre-compiled SPIR-V module. Compiling shader source is left to the caller's toolchain.
#[derive(Debug, Clone)]
pub struct ShaderModuleDesc<'a> {
    pub name: String,
    pub stage: ShaderStage,
    pub spirv: &'a [u32],
    pub entry_point: String,
}

impl<'a> ShaderModuleDesc<'a> {
    pub fn new(name: &str, stage: ShaderStage, spirv: &'a [u32]) -> Self {
        Self {
            name: name.to_owned(),
            stage,
            spirv,
            entry_point: "main".to_owned(),
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub(crate) fn validate(&self) -> RhiResult<()> {
        match self.spirv.first() {
            None => Err(RhiError::out_of_range(format!("shader module `{}` is empty", self.name))),
            Some(&magic) if magic != SPIRV_MAGIC => Err(RhiError::runtime(format!(
                "shader module `{}` is not SPIR-V (magic {magic:#010x})", self.name
            ))),
            Some(_) if self.entry_point.is_empty() => Err(RhiError::out_of_range(format!(
                "shader module `{}` has no entry point", self.name
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// A pooled shader module.
pub struct ShaderModule<N> {
    pub(crate) native: N,
    pub(crate) name: String,
    pub(crate) stage: ShaderStage,
    pub(crate) entry_point: String,
}

impl<N> ShaderModule<N> {
    #[inline]
    pub fn native(&self) -> &N { &self.native }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    #[inline]
    pub fn stage(&self) -> ShaderStage { self.stage }

    #[inline]
    pub fn entry_point(&self) -> &str { &self.entry_point }
}
