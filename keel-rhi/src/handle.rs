//! Typed generational handles.
//!
//! A handle is a plain `(index, generation)` pair. It owns nothing; the [`Pool`](crate::pool::Pool)
//! that issued it decides whether it still refers to a live value. Generation `0` is never
//! issued, so a default-constructed handle is always empty.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const EMPTY: Self = Self::new(0, 0);

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation, _marker: PhantomData }
    }

    #[inline]
    pub fn index(&self) -> u32 { self.index }

    #[inline]
    pub fn generation(&self) -> u32 { self.generation }

    #[inline]
    pub fn is_empty(&self) -> bool { self.generation == 0 }

    #[inline]
    pub fn is_valid(&self) -> bool { self.generation != 0 }

    /// Stable 64-bit encoding: index in the high half, generation in the low half.
    #[inline]
    pub fn to_bits(&self) -> u64 {
        (u64::from(self.index) << 32) | u64::from(self.generation)
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self::new((bits >> 32) as u32, bits as u32)
    }
}

// Manual impls: `T` is only a tag and must not pick up derive bounds.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self { *self }
}

impl<T> Copy for Handle<T> {}

impl<T> Default for Handle<T> {
    fn default() -> Self { Self::EMPTY }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bits().hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>();
        let name = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{name}>({}v{})", self.index, self.generation)
    }
}

macro_rules! handle_tags {
    ($($tag:ident => $alias:ident),* $(,)?) => {
        $crate::paste! {
            $(
                #[doc = "Tag type for [`" $alias "`]."]
                #[derive(Debug)]
                pub enum $tag {}

                pub type $alias = Handle<$tag>;
            )*
        }
    };
}

handle_tags! {
    BufferTag => BufferHandle,
    TextureTag => TextureHandle,
    SamplerTag => SamplerHandle,
    ShaderModuleTag => ShaderModuleHandle,
    RenderPipelineTag => RenderPipelineHandle,
    ComputePipelineTag => ComputePipelineHandle,
}
