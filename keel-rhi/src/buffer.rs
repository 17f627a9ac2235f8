//! Buffer descriptions and the per-buffer runtime record.

use std::ptr::NonNull;
use enumflags2::{bitflags, BitFlags};

#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Index = 1 << 0,
    Vertex = 1 << 1,
    Uniform = 1 << 2,
    Storage = 1 << 3,
    Indirect = 1 << 4,
}

/// Where a resource's memory lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StorageType {
    #[default]
    Device,
    HostVisible,
    Memoryless,
}

/// Buffer descriptor for creating GPU buffers.
#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub name: String,
    /// Size of the buffer in bytes.
    pub size: u64,
    pub usage: BitFlags<BufferUsage>,
    pub storage: StorageType,
    /// Initial contents, uploaded right after creation.
    pub data: Option<&'a [u8]>,
}

impl Default for BufferDesc<'_> {
    fn default() -> Self {
        Self {
            name: "Unnamed buffer".to_string(),
            size: 0,
            usage: BitFlags::empty(),
            storage: StorageType::HostVisible,
            data: None,
        }
    }
}

impl<'a> BufferDesc<'a> {
    /// Create a new buffer descriptor with the specified size.
    pub fn new(name: &str, size: u64) -> Self {
        Self {
            name: name.to_owned(),
            size,
            ..Default::default()
        }
    }

    /// Create a device-local vertex buffer descriptor.
    pub fn vertex(name: &str, size: u64) -> Self {
        Self {
            usage: BufferUsage::Vertex.into(),
            storage: StorageType::Device,
            ..Self::new(name, size)
        }
    }

    /// Create a device-local index buffer descriptor.
    pub fn index(name: &str, size: u64) -> Self {
        Self {
            usage: BufferUsage::Index.into(),
            storage: StorageType::Device,
            ..Self::new(name, size)
        }
    }

    /// Create a host-visible uniform buffer descriptor.
    pub fn uniform(name: &str, size: u64) -> Self {
        Self {
            usage: BufferUsage::Uniform.into(),
            storage: StorageType::HostVisible,
            ..Self::new(name, size)
        }
    }

    /// Create a device-local storage buffer descriptor.
    pub fn storage(name: &str, size: u64) -> Self {
        Self {
            usage: BufferUsage::Storage.into(),
            storage: StorageType::Device,
            ..Self::new(name, size)
        }
    }

    /// Create a host-visible indirect-arguments buffer descriptor.
    pub fn indirect(name: &str, size: u64) -> Self {
        Self {
            usage: BufferUsage::Indirect.into(),
            storage: StorageType::HostVisible,
            ..Self::new(name, size)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the buffer usage flags.
    pub fn with_usage(mut self, usage: impl Into<BitFlags<BufferUsage>>) -> Self {
        self.usage = usage.into();
        self
    }

    /// Add additional usage flags.
    pub fn with_additional_usage(mut self, usage: impl Into<BitFlags<BufferUsage>>) -> Self {
        self.usage |= usage.into();
        self
    }

    /// Initial contents; must not be longer than the buffer.
    pub fn with_data(mut self, data: &'a [u8]) -> Self {
        self.data = Some(data);
        self
    }

    /// Make the buffer host-visible and persistently mapped.
    pub fn host_visible(mut self) -> Self {
        self.storage = StorageType::HostVisible;
        self
    }

    /// Make the buffer device-local (GPU-only).
    pub fn device_local(mut self) -> Self {
        self.storage = StorageType::Device;
        self
    }

    /// Whether the backend should expose a shader-visible device address.
    #[inline]
    pub fn wants_device_address(&self) -> bool {
        self.usage.intersects(BufferUsage::Storage | BufferUsage::Uniform)
    }
}

/// Host pointer to a persistently mapped allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedPtr(NonNull<u8>);

// SAFETY: the pointer is only dereferenced through `Buffer`, whose owner keeps the mapping
// alive until the deferred teardown runs, and accesses are bounds-checked byte copies.
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

impl MappedPtr {
    /// # Safety
    /// `ptr` must stay valid for reads and writes of the whole buffer size until the buffer
    /// is destroyed.
    pub unsafe fn new(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.0.as_ptr()
    }
}

/// A pooled buffer: the backend object plus its mapping and device address.
pub struct Buffer<N> {
    pub(crate) native: N,
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) usage: BitFlags<BufferUsage>,
    pub(crate) storage: StorageType,
    pub(crate) mapped: Option<MappedPtr>,
    pub(crate) gpu_address: u64,
}

impl<N> Buffer<N> {
    #[inline]
    pub fn native(&self) -> &N { &self.native }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    #[inline]
    pub fn size(&self) -> u64 { self.size }

    #[inline]
    pub fn usage(&self) -> BitFlags<BufferUsage> { self.usage }

    #[inline]
    pub fn storage(&self) -> StorageType { self.storage }

    #[inline]
    pub fn is_mapped(&self) -> bool { self.mapped.is_some() }

    /// Copy into the mapping. The range must already be bounds-checked.
    pub(crate) fn write_mapped(&self, offset: u64, data: &[u8]) -> bool {
        let Some(mapped) = self.mapped else {
            return false;
        };
        debug_assert!(offset + data.len() as u64 <= self.size);
        // SAFETY: the caller validated `offset..offset + len` against `size`, and the mapping
        // covers the whole buffer for as long as the pool entry lives.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr().add(offset as usize), data.len());
        }
        true
    }

    /// Copy out of the mapping. The range must already be bounds-checked.
    pub(crate) fn read_mapped(&self, offset: u64, out: &mut [u8]) -> bool {
        let Some(mapped) = self.mapped else {
            return false;
        };
        debug_assert!(offset + out.len() as u64 <= self.size);
        // SAFETY: see `write_mapped`.
        unsafe {
            std::ptr::copy_nonoverlapping(mapped.as_ptr().add(offset as usize), out.as_mut_ptr(), out.len());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pick_storage() {
        assert_eq!(BufferDesc::vertex("vb", 64).storage, StorageType::Device);
        assert_eq!(BufferDesc::uniform("ub", 64).storage, StorageType::HostVisible);
        let desc = BufferDesc::storage("sb", 64).with_additional_usage(BufferUsage::Indirect);
        assert!(desc.usage.contains(BufferUsage::Storage | BufferUsage::Indirect));
        assert!(desc.wants_device_address());
        assert!(!BufferDesc::index("ib", 6).wants_device_address());
    }
}
