//! Vulkan loader 探测
//!
//! 先找系统 loader，找不到再加载打包的副本。探测还会创建一个最小实例，
//! 确认至少有一个支持图形队列的物理设备。

use std::ffi::CStr;
use std::sync::OnceLock;

use ash::vk;

use crate::core::error::{BackendError, Result};
use crate::gfx::native::{self, LoadState};
use crate::renderer::Backend;

static ENTRY: OnceLock<ash::Entry> = OnceLock::new();

/// 当前平台的 loader 文件名
pub fn library_file() -> &'static str {
    if cfg!(target_os = "windows") {
        "vulkan-1.dll"
    } else if cfg!(target_os = "macos") {
        "libvulkan.1.dylib"
    } else {
        "libvulkan.so.1"
    }
}

/// 探测一次并缓存结果
pub fn native_support() -> &'static LoadState {
    native::detect_once(Backend::Vulkan.id(), || {
        let entry = match load() {
            Ok(entry) => entry,
            Err(reason) => return LoadState::NotFound(reason),
        };
        if let Err(reason) = check_device(&entry) {
            return LoadState::InitFailed(reason);
        }
        let _ = ENTRY.set(entry);
        LoadState::Loaded
    })
}

/// 已加载的 loader
pub fn entry() -> Result<ash::Entry> {
    if let Some(err) = native_support().to_error() {
        return Err(err);
    }
    ENTRY
        .get()
        .cloned()
        .ok_or_else(|| BackendError::LibraryNotFound(library_file().to_string()).into())
}

fn load() -> std::result::Result<ash::Entry, String> {
    let system_error = match unsafe { ash::Entry::load() } {
        Ok(entry) => return Ok(entry),
        Err(e) => e.to_string(),
    };
    tracing::debug!("System Vulkan loader unavailable: {}", system_error);

    let bundled = native::locate_bundled(library_file()).ok_or_else(|| {
        format!("{} not found on the library search path ({})", library_file(), system_error)
    })?;
    let copy = native::extract_bundled(&bundled)
        .map_err(|e| format!("failed to extract {}: {}", bundled.display(), e))?;
    let entry = unsafe { ash::Entry::load_from(&copy) }
        .map_err(|e| format!("failed to load bundled {}: {}", copy.display(), e));
    native::release_extracted();
    entry
}

/// 实例需要的扩展和标志（MoltenVK 需要 portability 枚举）
pub fn instance_extensions() -> (Vec<&'static CStr>, vk::InstanceCreateFlags) {
    if cfg!(target_os = "macos") {
        (
            vec![c"VK_KHR_portability_enumeration"],
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR,
        )
    } else {
        (Vec::new(), vk::InstanceCreateFlags::empty())
    }
}

/// 创建一个不带验证层的最小实例
pub fn create_instance(entry: &ash::Entry, layers: &[&CStr]) -> std::result::Result<ash::Instance, String> {
    let app_name = c"chart_render";
    let app_info = vk::ApplicationInfo::builder()
        .application_name(app_name)
        .application_version(1)
        .engine_name(app_name)
        .engine_version(1)
        .api_version(vk::API_VERSION_1_1);

    let (extensions, flags) = instance_extensions();
    let extension_ptrs: Vec<*const std::os::raw::c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
    let layer_ptrs: Vec<*const std::os::raw::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extension_ptrs)
        .enabled_layer_names(&layer_ptrs)
        .flags(flags);

    unsafe { entry.create_instance(&create_info, None) }.map_err(|e| format!("vkCreateInstance failed: {}", e))
}

/// 选择物理设备：独立显卡 > 集成显卡 > 虚拟 > CPU > 其他
///
/// # 返回值
///
/// 物理设备和图形队列族下标
pub fn pick_physical_device(instance: &ash::Instance) -> std::result::Result<(vk::PhysicalDevice, u32), String> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| format!("vkEnumeratePhysicalDevices failed: {}", e))?;

    devices
        .into_iter()
        .filter_map(|pd| {
            let families = unsafe { instance.get_physical_device_queue_family_properties(pd) };
            families
                .iter()
                .position(|q| q.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|i| (pd, i as u32))
        })
        .min_by_key(|(pd, _)| {
            let props = unsafe { instance.get_physical_device_properties(*pd) };
            match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                vk::PhysicalDeviceType::CPU => 3,
                _ => 4,
            }
        })
        .ok_or_else(|| "no physical device with a graphics queue".to_string())
}

fn check_device(entry: &ash::Entry) -> std::result::Result<(), String> {
    let instance = create_instance(entry, &[])?;
    let picked = pick_physical_device(&instance);
    unsafe { instance.destroy_instance(None) };
    picked.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_file_matches_platform() {
        let file = library_file();
        if cfg!(target_os = "linux") {
            assert_eq!(file, "libvulkan.so.1");
        }
        assert!(file.contains("vulkan"));
    }

    #[test]
    fn test_native_support_is_cached() {
        let first = native_support();
        let second = native_support();
        assert!(std::ptr::eq(first, second));
        assert_eq!(native::load_state(Backend::Vulkan), Some(first));
    }
}
