//! Buffers, images and the device memory behind them.

use std::ptr::NonNull;
use ash::vk;
use keel_core::log;
use crate::buffer::{BufferDesc, StorageType};
use crate::error::{RhiError, RhiResult};
use crate::texture::{TextureDesc, TextureUsage};
use super::convert;

/// Find a memory type allowed by `type_filter` that has all of `properties`.
pub(crate) fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let memory_type = memory_properties.memory_types[i as usize];
        (type_filter & (1 << i)) != 0 && memory_type.property_flags.contains(properties)
    })
}

/// First match wins; the returned flag tells whether the pick is host-coherent.
fn pick_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    candidates: &[vk::MemoryPropertyFlags],
) -> RhiResult<(u32, bool)> {
    candidates
        .iter()
        .find_map(|&flags| find_memory_type(memory_properties, type_filter, flags))
        .map(|index| {
            let flags = memory_properties.memory_types[index as usize].property_flags;
            (index, flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT))
        })
        .ok_or_else(|| RhiError::runtime(format!("no memory type matches {candidates:?}")))
}

fn memory_candidates(storage: StorageType) -> &'static [vk::MemoryPropertyFlags] {
    const HOST: &[vk::MemoryPropertyFlags] = &[
        vk::MemoryPropertyFlags::from_raw(
            vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
        ),
        vk::MemoryPropertyFlags::HOST_VISIBLE,
    ];
    const DEVICE: &[vk::MemoryPropertyFlags] = &[vk::MemoryPropertyFlags::DEVICE_LOCAL];
    const LAZY: &[vk::MemoryPropertyFlags] = &[
        vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ];
    match storage {
        StorageType::HostVisible => HOST,
        StorageType::Device => DEVICE,
        StorageType::Memoryless => LAZY,
    }
}

/// GPU buffer with its dedicated allocation.
pub struct VulkanBuffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) size: u64,
    pub(crate) coherent: bool,
}

impl VulkanBuffer {
    #[inline]
    pub fn handle(&self) -> vk::Buffer { self.buffer }

    #[inline]
    pub fn size(&self) -> u64 { self.size }

    /// Returns the buffer, its host mapping when `desc` asks for host-visible storage, and
    /// the device address when one was requested.
    pub(crate) fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        desc: &BufferDesc<'_>,
        device_address: bool,
    ) -> RhiResult<(Self, Option<NonNull<u8>>, u64)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(convert::buffer_usage(desc.usage, device_address))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocated = pick_memory_type(memory_properties, requirements.memory_type_bits, memory_candidates(desc.storage))
            .and_then(|(memory_type_index, coherent)| {
                let mut flags_info = vk::MemoryAllocateFlagsInfo::default()
                    .flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
                let mut alloc_info = vk::MemoryAllocateInfo::default()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);
                if device_address {
                    alloc_info = alloc_info.push_next(&mut flags_info);
                }
                let memory = unsafe { device.allocate_memory(&alloc_info, None)? };
                Ok((memory, coherent))
            });
        let (memory, coherent) = match allocated {
            Ok(allocated) => allocated,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        let buffer = Self { buffer, memory, size: desc.size, coherent };
        if let Err(err) = unsafe { device.bind_buffer_memory(buffer.buffer, buffer.memory, 0) } {
            buffer.destroy(device);
            return Err(err.into());
        }

        let mapped = if desc.storage == StorageType::HostVisible {
            match unsafe { device.map_memory(buffer.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) } {
                Ok(ptr) => NonNull::new(ptr.cast::<u8>()),
                Err(err) => {
                    buffer.destroy(device);
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        let gpu_address = if device_address {
            let info = vk::BufferDeviceAddressInfo::default().buffer(buffer.buffer);
            unsafe { device.get_buffer_device_address(&info) }
        } else {
            0
        };

        log::trace!("vulkan buffer `{}` created ({} bytes, {:?})", desc.name, desc.size, desc.storage);
        Ok((buffer, mapped, gpu_address))
    }

    /// Freeing the memory also drops any persistent mapping.
    pub(crate) fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// GPU image plus its sampling view and one attachment view per (mip, layer).
pub struct VulkanTexture {
    pub(crate) image: vk::Image,
    /// Null for images owned elsewhere, e.g. by a swapchain.
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) view: vk::ImageView,
    pub(crate) attachment_views: Vec<vk::ImageView>,
    pub(crate) format: vk::Format,
    pub(crate) aspect: vk::ImageAspectFlags,
    pub(crate) num_layers: u32,
    owned: bool,
}

impl VulkanTexture {
    /// Wrap an image and view owned by the caller, such as a swapchain image.
    ///
    /// Destroying the wrapper leaves both untouched.
    pub fn external(image: vk::Image, view: vk::ImageView, format: vk::Format) -> Self {
        Self {
            image,
            memory: vk::DeviceMemory::null(),
            view,
            attachment_views: Vec::new(),
            format,
            aspect: vk::ImageAspectFlags::COLOR,
            num_layers: 1,
            owned: false,
        }
    }

    #[inline]
    pub fn image(&self) -> vk::Image { self.image }

    #[inline]
    pub fn view(&self) -> vk::ImageView { self.view }

    /// View used when rendering into `level` of `layer`.
    pub(crate) fn attachment_view(&self, level: u32, layer: u32) -> vk::ImageView {
        self.attachment_views
            .get((level * self.num_layers + layer) as usize)
            .copied()
            .unwrap_or(self.view)
    }

    pub(crate) fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        desc: &TextureDesc,
    ) -> RhiResult<Self> {
        let memoryless = desc.storage == StorageType::Memoryless;
        let format = convert::texture_format(desc.format);
        let aspect = convert::aspect_mask(desc.format);

        let flags = if desc.texture_type == crate::texture::TextureType::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(convert::image_type(desc.texture_type))
            .format(format)
            .extent(vk::Extent3D {
                width: desc.dimensions.width,
                height: desc.dimensions.height,
                depth: desc.dimensions.depth,
            })
            .mip_levels(desc.num_mip_levels)
            .array_layers(desc.num_layers)
            .samples(convert::sample_count(desc.num_samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert::image_usage(desc.usage, desc.format, memoryless))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None)? };
        let mut texture = Self {
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            attachment_views: Vec::new(),
            format,
            aspect,
            num_layers: desc.num_layers,
            owned: true,
        };

        if let Err(err) = texture.allocate_and_bind(device, memory_properties, desc) {
            texture.destroy(device);
            return Err(err);
        }
        if let Err(err) = texture.create_views(device, desc) {
            texture.destroy(device);
            return Err(err);
        }

        log::trace!("vulkan texture `{}` created ({format:?})", desc.name);
        Ok(texture)
    }

    fn allocate_and_bind(
        &mut self,
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        desc: &TextureDesc,
    ) -> RhiResult<()> {
        let requirements = unsafe { device.get_image_memory_requirements(self.image) };
        let (memory_type_index, _) =
            pick_memory_type(memory_properties, requirements.memory_type_bits, memory_candidates(desc.storage))?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        self.memory = unsafe { device.allocate_memory(&alloc_info, None)? };
        unsafe { device.bind_image_memory(self.image, self.memory, 0)? };
        Ok(())
    }

    fn create_views(&mut self, device: &ash::Device, desc: &TextureDesc) -> RhiResult<()> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(convert::view_type(desc.texture_type, desc.num_layers))
            .format(self.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(self.aspect)
                    .base_mip_level(0)
                    .level_count(desc.num_mip_levels)
                    .base_array_layer(0)
                    .layer_count(desc.num_layers),
            );
        self.view = unsafe { device.create_image_view(&view_info, None)? };

        if !desc.usage.contains(TextureUsage::Attachment) {
            return Ok(());
        }
        let view_type = if desc.texture_type == crate::texture::TextureType::Texture3D {
            vk::ImageViewType::TYPE_3D
        } else {
            vk::ImageViewType::TYPE_2D
        };
        for level in 0..desc.num_mip_levels {
            for layer in 0..desc.num_layers {
                let info = vk::ImageViewCreateInfo::default()
                    .image(self.image)
                    .view_type(view_type)
                    .format(self.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(self.aspect)
                            .base_mip_level(level)
                            .level_count(1)
                            .base_array_layer(layer)
                            .layer_count(1),
                    );
                let view = unsafe { device.create_image_view(&info, None)? };
                self.attachment_views.push(view);
            }
        }
        Ok(())
    }

    pub(crate) fn destroy(self, device: &ash::Device) {
        if !self.owned {
            return;
        }
        unsafe {
            for view in self.attachment_views {
                device.destroy_image_view(view, None);
            }
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
            device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = flags;
        }
        props
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
        assert_eq!(find_memory_type(&props, 0b110, vk::MemoryPropertyFlags::HOST_VISIBLE), Some(1));
        assert_eq!(find_memory_type(&props, 0b001, vk::MemoryPropertyFlags::HOST_VISIBLE), None);
    }

    #[test]
    fn host_storage_prefers_coherent_memory() {
        let props = properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        assert_eq!(pick_memory_type(&props, 0b11, memory_candidates(StorageType::HostVisible)).unwrap(), (1, true));
        assert_eq!(pick_memory_type(&props, 0b01, memory_candidates(StorageType::HostVisible)).unwrap(), (0, false));
        assert!(pick_memory_type(&props, 0b11, memory_candidates(StorageType::Device)).is_err());
    }
}
