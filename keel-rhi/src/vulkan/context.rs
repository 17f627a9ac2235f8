//! Instance, physical device selection and the logical device the backend renders with.

use std::ffi::{CStr, CString};
use ash::{vk, Entry, Instance};
use keel_core::log;
use crate::error::{RhiError, RhiResult};

#[cfg(feature = "validation")]
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Scoring weights for physical device selection.
const SCORE_DISCRETE_GPU: u32 = 10000;
const SCORE_INTEGRATED_GPU: u32 = 1000;
const SCORE_PER_GB_VRAM: u32 = 100;
const SCORE_VULKAN_1_4: u32 = 600;

#[derive(Clone)]
pub struct PhysicalDevice {
    handle: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    features: vk::PhysicalDeviceFeatures,
    buffer_device_address: bool,
    queue_family: u32,
}

impl PhysicalDevice {
    #[inline]
    pub fn handle(&self) -> vk::PhysicalDevice { self.handle }

    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties { &self.properties }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties { &self.memory_properties }

    #[inline]
    pub fn queue_family(&self) -> u32 { self.queue_family }

    #[inline]
    pub fn supports_buffer_device_address(&self) -> bool { self.buffer_device_address }

    pub fn name(&self) -> String {
        // SAFETY: the driver fills `device_name` with a NUL-terminated string.
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }.to_string_lossy().into_owned()
    }
}

/// Everything the backend needs from Vulkan, created without any window surface.
///
/// The context owns the instance and logical device; drop every `Device` that uses it first.
pub struct VulkanContext {
    _entry: Entry,
    instance: Instance,
    physical_device: PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    #[cfg(feature = "validation")]
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanContext {
    #[profiling::function]
    pub fn new(app_name: &str) -> RhiResult<Self> {
        // SAFETY: the loaded library outlives every object created from it since `_entry`
        // is dropped last.
        let entry = unsafe { Entry::load() }
            .map_err(|err| RhiError::runtime(format!("failed to load the Vulkan loader: {err}")))?;

        let validation = validation_available(&entry);
        let instance = create_instance(&entry, app_name, validation)?;

        #[cfg(feature = "validation")]
        let debug_messenger = if validation {
            Some(setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let physical_device = select_physical_device(&instance)?;
        log::info!("using GPU `{}`", physical_device.name());

        let device = create_device(&instance, &physical_device)?;
        // SAFETY: queue 0 of `queue_family` was requested in `create_device`.
        let queue = unsafe { device.get_device_queue(physical_device.queue_family, 0) };
        let debug_utils = validation.then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        Ok(Self {
            _entry: entry,
            instance,
            physical_device,
            device,
            queue,
            debug_utils,
            #[cfg(feature = "validation")]
            debug_messenger,
        })
    }

    #[inline]
    pub fn instance(&self) -> &Instance { &self.instance }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDevice { &self.physical_device }

    #[inline]
    pub fn device(&self) -> &ash::Device { &self.device }

    #[inline]
    pub fn queue(&self) -> vk::Queue { self.queue }

    #[inline]
    pub(crate) fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> { self.debug_utils.as_ref() }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("vulkan device failed to go idle: {err}");
            }
            self.device.destroy_device(None);

            #[cfg(feature = "validation")]
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(feature = "validation")]
fn validation_available(entry: &Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let found = layers.iter().any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
    if !found {
        log::warn!("{} is not installed, running without validation", VALIDATION_LAYER.to_string_lossy());
    }
    found
}

#[cfg(not(feature = "validation"))]
fn validation_available(_entry: &Entry) -> bool {
    false
}

fn create_instance(entry: &Entry, app_name: &str, validation: bool) -> RhiResult<Instance> {
    let app_name = CString::new(app_name).map_err(|_| RhiError::out_of_range("application name contains NUL"))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Keel")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let mut extensions = Vec::new();
    let mut layers = Vec::new();
    #[cfg(feature = "validation")]
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }
    #[cfg(not(feature = "validation"))]
    let _ = validation;

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    Ok(unsafe { entry.create_instance(&create_info, None)? })
}

#[cfg(feature = "validation")]
fn setup_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> RhiResult<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
    Ok((debug_utils, messenger))
}

#[cfg(feature = "validation")]
unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };
    if callback_data.p_message.is_null() {
        return vk::FALSE;
    }
    let message = unsafe { CStr::from_ptr(callback_data.p_message) }.to_string_lossy();

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        _ => "[Unknown]",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("Vulkan {type_str}: {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("Vulkan {type_str}: {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("Vulkan {type_str}: {message}"),
        _ => log::trace!("Vulkan {type_str}: {message}"),
    }

    vk::FALSE
}

/// A universal queue family: graphics and compute on one queue.
fn find_queue_family(instance: &Instance, physical_device: vk::PhysicalDevice) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))
        .map(|index| index as u32)
}

/// Higher is better; zero means the device cannot run the backend.
fn score_physical_device(
    properties: &vk::PhysicalDeviceProperties,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> u32 {
    if properties.api_version < vk::API_VERSION_1_3 {
        return 0;
    }

    let mut score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => SCORE_DISCRETE_GPU,
        vk::PhysicalDeviceType::INTEGRATED_GPU => SCORE_INTEGRATED_GPU,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 500,
        vk::PhysicalDeviceType::CPU => 100,
        _ => 10,
    };

    if properties.api_version >= vk::make_api_version(0, 1, 4, 0) {
        score += SCORE_VULKAN_1_4;
    }

    let vram_bytes: u64 = memory_properties.memory_heaps[..memory_properties.memory_heap_count as usize]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum();
    score + (vram_bytes / (1024 * 1024 * 1024)) as u32 * SCORE_PER_GB_VRAM
}

fn select_physical_device(instance: &Instance) -> RhiResult<PhysicalDevice> {
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };

    let mut best: Option<(u32, PhysicalDevice)> = None;
    for handle in physical_devices {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(handle) };
        let Some(queue_family) = find_queue_family(instance, handle) else {
            continue;
        };

        let score = score_physical_device(&properties, &memory_properties);
        let features = unsafe { instance.get_physical_device_features(handle) };
        let mut features_12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features_12);
        unsafe { instance.get_physical_device_features2(handle, &mut features2) };
        let buffer_device_address = features_12.buffer_device_address == vk::TRUE;

        let candidate = PhysicalDevice {
            handle,
            properties,
            memory_properties,
            features,
            buffer_device_address,
            queue_family,
        };
        log::info!("found GPU `{}` (score: {score}, type: {:?})", candidate.name(), properties.device_type);

        if score > 0 && best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, device)| device)
        .ok_or_else(|| RhiError::runtime("no Vulkan 1.3 capable GPU found"))
}

fn create_device(instance: &Instance, physical_device: &PhysicalDevice) -> RhiResult<ash::Device> {
    let queue_priority = 1.0f32;
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(physical_device.queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let supported = &physical_device.features;
    let features = vk::PhysicalDeviceFeatures::default()
        .geometry_shader(supported.geometry_shader == vk::TRUE)
        .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
        .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
        .multi_draw_indirect(supported.multi_draw_indirect == vk::TRUE);

    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(physical_device.buffer_device_address);

    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features)
        .push_next(&mut vulkan_13_features);

    Ok(unsafe { instance.create_device(physical_device.handle, &create_info, None)? })
}
