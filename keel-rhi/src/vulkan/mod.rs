//! Vulkan 1.3 backend: dynamic rendering, synchronization2 and one fence per submission.

mod backend;
mod command;
mod context;
pub mod convert;
mod memory;
mod pipeline;

pub use ash::vk;
pub use backend::VulkanBackend;
pub use command::{VulkanEncoder, VulkanSubmission};
pub use context::{PhysicalDevice, VulkanContext};
pub use memory::{VulkanBuffer, VulkanTexture};

#[allow(dead_code)]
pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Crate-only trait for objects that keep the `ash::Device` they are destroyed with.
pub(crate) trait DeviceObject: sealed::Sealed {
    fn device(&self) -> &ash::Device;
}

/// Attach a name to a Vulkan object for validation messages and captures.
pub(crate) fn set_debug_name<H: vk::Handle>(
    debug_utils: Option<&ash::ext::debug_utils::Device>,
    handle: H,
    name: &str,
) {
    let Some(debug_utils) = debug_utils else {
        return;
    };
    if name.is_empty() {
        return;
    }
    let Ok(name) = std::ffi::CString::new(name) else {
        return;
    };
    let info = vk::DebugUtilsObjectNameInfoEXT::default()
        .object_handle(handle)
        .object_name(&name);
    if let Err(err) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
        keel_core::log::debug!("failed to name vulkan object `{}`: {err}", name.to_string_lossy());
    }
}
