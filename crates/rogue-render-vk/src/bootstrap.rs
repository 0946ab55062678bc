// SPDX-License-Identifier: CEPL-1.0
//! One-time Vulkan setup: loader, instance, optional validation messenger,
//! window surface, physical device choice and the logical device.
use std::ffi::{c_char, CStr, CString};

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use rogue_platform::winit::window::Window;
use tracing::{debug, error, info, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// First graphics-capable family and first family that can present, scanning
/// in index order. `None` unless both exist.
pub(crate) fn find_queue_families(
    flags: &[vk::QueueFlags],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, f) in flags.iter().enumerate() {
        let i = i as u32;
        if graphics.is_none() && f.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(i);
        }
        if present.is_none() && can_present(i) {
            present = Some(i);
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

pub(crate) fn device_type_score(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 0,
    }
}

/// Highest score wins; ties keep the earlier candidate. `None` scores are unsuitable.
pub(crate) fn pick_best<T>(candidates: impl IntoIterator<Item = (T, Option<u32>)>) -> Option<T> {
    let mut best: Option<(T, u32)> = None;
    for (c, score) in candidates {
        let Some(score) = score else { continue };
        if best.as_ref().map_or(true, |(_, b)| score > *b) {
            best = Some((c, score));
        }
    }
    best.map(|(c, _)| c)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {}", msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {}", msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {}", msg);
    } else {
        tracing::trace!("[vulkan] {}", msg);
    }
    vk::FALSE
}

unsafe fn layer_available(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == name)
}

unsafe fn extension_available(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default()
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
}

/// Returns the instance and whether validation ended up enabled.
unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    want_validation: bool,
) -> Result<(Instance, bool)> {
    let app = CString::new("RogueLikeGame")?;
    let engine = CString::new("rogue")?;

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: engine.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let mut ext_vec: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    let validation = want_validation
        && layer_available(entry, VALIDATION_LAYER)
        && extension_available(entry, debug_utils::NAME);
    if want_validation && !validation {
        warn!("validation requested but {:?} is not installed", VALIDATION_LAYER);
    }

    let layers = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if validation {
        ext_vec.push(debug_utils::NAME.as_ptr());
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0u32, std::ptr::null())
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;
    Ok((instance, validation))
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .context("create_debug_utils_messenger")?;
    Ok((loader, messenger))
}

/// `None` if the device cannot drive this surface at all.
unsafe fn rate_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Option<(u32, QueueFamilies)> {
    let flags: Vec<vk::QueueFlags> = instance
        .get_physical_device_queue_family_properties(phys)
        .iter()
        .map(|q| q.queue_flags)
        .collect();
    let families = find_queue_families(&flags, |i| {
        surface_loader
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false)
    })?;

    let has_swapchain = instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default()
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);
    if !has_swapchain {
        return None;
    }

    let formats = surface_loader
        .get_physical_device_surface_formats(phys, surface)
        .unwrap_or_default();
    let modes = surface_loader
        .get_physical_device_surface_present_modes(phys, surface)
        .unwrap_or_default();
    if formats.is_empty() || modes.is_empty() {
        return None;
    }

    let props = instance.get_physical_device_properties(phys);
    Some((device_type_score(props.device_type), families))
}

unsafe fn pick_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;
    if devices.is_empty() {
        return Err(anyhow!("no Vulkan-capable GPU found"));
    }

    let rated = devices.into_iter().filter_map(|phys| {
        rate_device(instance, surface_loader, surface, phys)
            .map(|(score, families)| ((phys, families), Some(score)))
    });
    let (phys, families) =
        pick_best(rated).ok_or_else(|| anyhow!("failed to find a suitable GPU"))?;

    let props = instance.get_physical_device_properties(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
    info!(
        "vk: using GPU \"{}\" ({:?}), graphics family {}, present family {}",
        name, props.device_type, families.graphics, families.present
    );
    Ok((phys, families))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let qinfos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();
    let device_exts = [swapchain::NAME.as_ptr()];

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    instance
        .create_device(phys, &dinfo, None)
        .context("create_device")
}

/// Instance- and device-level handles shared by every other part of the backend.
///
/// Dropping a `Gpu` destroys the device, surface, messenger and instance in that
/// order; everything created from the device must be gone by then.
pub struct Gpu {
    /// Keeps the Vulkan loader mapped for as long as the instance lives.
    _entry: Entry,
    pub instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub phys: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Gpu {
    // STRICT ORDER:
    // 1) instance (+ WSI extensions, + debug utils when validating)
    // 2) debug messenger
    // 3) surface from THIS instance
    // 4) physical device rated AGAINST this surface
    // 5) logical device + queues
    pub fn new(window: &Window, validation: bool) -> Result<Self> {
        let dh = window
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        unsafe {
            let entry = Entry::load().context("load Vulkan loader")?;
            let (instance, validation) = create_instance(&entry, dh, validation)?;

            let debug = if validation {
                match create_debug_messenger(&entry, &instance) {
                    Ok(d) => Some(d),
                    Err(e) => {
                        warn!("vk: debug messenger unavailable: {e:#}");
                        None
                    }
                }
            } else {
                None
            };
            let validation_on = debug.is_some();
            info!("vk: instance created (validation={})", validation_on);

            let destroy_instance = |debug: &Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>| {
                if let Some((loader, messenger)) = debug {
                    loader.destroy_debug_utils_messenger(*messenger, None);
                }
                instance.destroy_instance(None);
            };

            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
                .context("ash_window::create_surface")
                .inspect_err(|_| destroy_instance(&debug))?;

            let picked = pick_physical_device(&instance, &surface_loader, surface).and_then(
                |(phys, families)| Ok((phys, families, create_device(&instance, phys, families)?)),
            );
            let (phys, families, device) = match picked {
                Ok(v) => v,
                Err(e) => {
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance(&debug);
                    return Err(e);
                }
            };

            let graphics_queue = device.get_device_queue(families.graphics, 0);
            let present_queue = device.get_device_queue(families.present, 0);
            let swapchain_loader = swapchain::Device::new(&instance, &device);
            let memory_properties = instance.get_physical_device_memory_properties(phys);

            Ok(Self {
                _entry: entry,
                instance,
                debug,
                surface_loader,
                surface,
                phys,
                families,
                device,
                graphics_queue,
                present_queue,
                swapchain_loader,
                memory_properties,
            })
        }
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("device_wait_idle")
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("vk: device, surface and instance destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_beats_integrated_beats_other() {
        let d = device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU);
        let i = device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU);
        let c = device_type_score(vk::PhysicalDeviceType::CPU);
        assert!(d > i && i > c);
    }

    #[test]
    fn unsuitable_devices_are_never_picked() {
        let picked = pick_best([("cpu", Some(0)), ("broken-dgpu", None), ("igpu", Some(100))]);
        assert_eq!(picked, Some("igpu"));
        assert_eq!(pick_best([("a", None)]), None);
    }

    #[test]
    fn first_of_equal_scores_wins() {
        assert_eq!(pick_best([("first", Some(0)), ("second", Some(0))]), Some("first"));
    }

    #[test]
    fn single_family_does_both() {
        let flags = [vk::QueueFlags::TRANSFER, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE];
        let fam = find_queue_families(&flags, |i| i == 1).unwrap();
        assert_eq!(fam, QueueFamilies { graphics: 1, present: 1 });
        assert!(fam.is_shared());
        assert_eq!(fam.unique(), vec![1]);
    }

    #[test]
    fn split_families_are_both_reported() {
        let flags = [vk::QueueFlags::GRAPHICS, vk::QueueFlags::TRANSFER];
        let fam = find_queue_families(&flags, |i| i == 1).unwrap();
        assert_eq!(fam.unique(), vec![0, 1]);
        assert!(!fam.is_shared());
    }

    #[test]
    fn missing_present_or_graphics_is_unsuitable() {
        let flags = [vk::QueueFlags::GRAPHICS];
        assert!(find_queue_families(&flags, |_| false).is_none());
        let flags = [vk::QueueFlags::COMPUTE];
        assert!(find_queue_families(&flags, |_| true).is_none());
    }
}
