//! Physical device (GPU) selection.
//!
//! A device is suitable when it reports Vulkan 1.3, exposes a graphics queue
//! family and a family that can present to the target surface, supports every
//! extension in [`REQUIRED_DEVICE_EXTENSIONS`], and enables the features the
//! renderer relies on (anisotropic sampling, synchronization2, dynamic
//! rendering, shader draw parameters). Among suitable devices the highest
//! [`rate_device`] score wins, so discrete GPUs are preferred.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Device extensions every candidate must expose.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Queue family indices used by the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for rendering and uploads.
    pub graphics_family: Option<u32>,
    /// Family used for presentation.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct families, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// Chooses graphics and present families.
///
/// A family that can do both is preferred so that submission and presentation
/// share one queue; otherwise the first family of each kind is used.
pub fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = supports_present(i);

        if graphics && present {
            return QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            };
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

/// Feature bits the renderer enables on the logical device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequiredFeatures {
    pub sampler_anisotropy: bool,
    /// The fragment shader indexes the texture array with a push constant.
    pub shader_sampled_image_array_dynamic_indexing: bool,
    pub shader_draw_parameters: bool,
    /// Depth barriers and attachments use `DEPTH_ATTACHMENT_OPTIMAL`.
    pub separate_depth_stencil_layouts: bool,
    pub synchronization2: bool,
    pub dynamic_rendering: bool,
}

impl RequiredFeatures {
    /// Names of the features that are not supported.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.sampler_anisotropy {
            missing.push("samplerAnisotropy");
        }
        if !self.shader_sampled_image_array_dynamic_indexing {
            missing.push("shaderSampledImageArrayDynamicIndexing");
        }
        if !self.shader_draw_parameters {
            missing.push("shaderDrawParameters");
        }
        if !self.separate_depth_stencil_layouts {
            missing.push("separateDepthStencilLayouts");
        }
        if !self.synchronization2 {
            missing.push("synchronization2");
        }
        if !self.dynamic_rendering {
            missing.push("dynamicRendering");
        }
        missing
    }
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    /// Name, limits, API version.
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Largest anisotropy a sampler may request on this device.
    #[inline]
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }

    /// Total device-local heap size in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field(
                "api_version",
                &format!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Returns `true` if `api_version` is at least 1.3.
pub fn supports_vulkan_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

/// Names from `required` that are absent from `available`.
pub fn missing_extensions<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .filter(|name| !available.contains(name))
        .copied()
        .collect()
}

/// Desirability score; higher is better.
pub fn rate_device(properties: &vk::PhysicalDeviceProperties, device_local_bytes: u64) -> u32 {
    let mut score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    // Tie-breakers, capped so neither outweighs the device type.
    score += properties.limits.max_image_dimension2_d.min(16384) / 16;
    score += ((device_local_bytes / (8 * 1024 * 1024)) as u32).min(1000);
    score
}

/// Selects the most suitable physical device for presenting to `surface`.
///
/// # Errors
///
/// [`RhiError::DeviceNotFound`] when no device qualifies. The message lists
/// why each candidate was rejected.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        return Err(RhiError::DeviceNotFound(
            "no Vulkan-capable GPUs found".to_string(),
        ));
    }
    info!("Found {} GPU(s)", devices.len());

    let mut rejections = Vec::new();
    let mut best: Option<(PhysicalDeviceInfo, u32)> = None;

    for device in devices {
        match check_device_suitability(instance, device, surface, surface_loader)? {
            Ok(info) => {
                let score = rate_device(&info.properties, info.device_local_memory());
                debug!(
                    "GPU '{}' ({}) suitable, score {}",
                    info.device_name(),
                    info.device_type_name(),
                    score
                );
                if best.as_ref().is_none_or(|(_, s)| score > *s) {
                    best = Some((info, score));
                }
            }
            Err(reason) => {
                debug!("GPU rejected: {}", reason);
                rejections.push(reason);
            }
        }
    }

    match best {
        Some((info, score)) => {
            info!(
                "Selected GPU: '{}' ({}), score {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            Ok(info)
        }
        None => {
            warn!("No suitable GPU found");
            Err(RhiError::DeviceNotFound(rejections.join("; ")))
        }
    }
}

/// Returns `Ok(Ok(info))` for a suitable device and `Ok(Err(reason))` for a
/// rejected one. Driver failures while querying propagate as the outer error.
fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<Result<PhysicalDeviceInfo, String>> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "Unknown".to_string());

    if !supports_vulkan_1_3(properties.api_version) {
        return Ok(Err(format!(
            "'{}' reports Vulkan {}.{}, 1.3 required",
            name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        )));
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = pick_queue_families(&families, |i| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, i, surface)
            .unwrap_or(false)
    });
    if !queue_families.is_complete() {
        return Ok(Err(format!(
            "'{}' lacks queue families (graphics={}, present={})",
            name,
            queue_families.graphics_family.is_some(),
            queue_families.present_family.is_some()
        )));
    }

    let extension_props = unsafe { instance.enumerate_device_extension_properties(device)? };
    let available: Vec<&CStr> = extension_props
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .collect();
    let missing = missing_extensions(&REQUIRED_DEVICE_EXTENSIONS, &available);
    if !missing.is_empty() {
        return Ok(Err(format!(
            "'{}' lacks extensions: {:?}",
            name, missing
        )));
    }

    let features = query_required_features(instance, device);
    let missing = features.missing();
    if !missing.is_empty() {
        return Ok(Err(format!(
            "'{}' lacks features: {}",
            name,
            missing.join(", ")
        )));
    }

    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    Ok(Ok(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    }))
}

fn query_required_features(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> RequiredFeatures {
    let mut features11 = vk::PhysicalDeviceVulkan11Features::default();
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features11)
        .push_next(&mut features12)
        .push_next(&mut features13);
    unsafe { instance.get_physical_device_features2(device, &mut features2) };
    let core = features2.features;

    RequiredFeatures {
        sampler_anisotropy: core.sampler_anisotropy == vk::TRUE,
        shader_sampled_image_array_dynamic_indexing: core
            .shader_sampled_image_array_dynamic_indexing
            == vk::TRUE,
        shader_draw_parameters: features11.shader_draw_parameters == vk::TRUE,
        separate_depth_stencil_layouts: features12.separate_depth_stencil_layouts == vk::TRUE,
        synchronization2: features13.synchronization2 == vk::TRUE,
        dynamic_rendering: features13.dynamic_rendering == vk::TRUE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
    }

    #[test]
    fn test_unique_families_shared() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn test_unique_families_split() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(1),
        };
        assert_eq!(indices.unique_families(), vec![2, 1]);
    }

    #[test]
    fn test_pick_prefers_combined_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // Family 1 and 2 can present; 2 also does graphics.
        let indices = pick_queue_families(&families, |i| i >= 1);
        assert_eq!(indices.graphics_family, Some(2));
        assert_eq!(indices.present_family, Some(2));
    }

    #[test]
    fn test_pick_split_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = pick_queue_families(&families, |i| i == 1);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
        assert!(indices.is_complete());
    }

    #[test]
    fn test_pick_skips_empty_families() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let indices = pick_queue_families(&[empty], |_| true);
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_pick_without_present() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = pick_queue_families(&families, |_| false);
        assert_eq!(indices.graphics_family, Some(0));
        assert!(indices.present_family.is_none());
    }

    #[test]
    fn test_vulkan_version_check() {
        assert!(supports_vulkan_1_3(vk::API_VERSION_1_3));
        assert!(supports_vulkan_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(!supports_vulkan_1_3(vk::API_VERSION_1_2));
        assert!(!supports_vulkan_1_3(vk::API_VERSION_1_0));
    }

    #[test]
    fn test_missing_extensions() {
        let available = [c"VK_KHR_swapchain", c"VK_EXT_foo"];
        assert!(missing_extensions(&REQUIRED_DEVICE_EXTENSIONS, &available).is_empty());
        let missing = missing_extensions(&REQUIRED_DEVICE_EXTENSIONS, &[c"VK_EXT_foo"]);
        assert_eq!(missing, vec![ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_required_features_missing() {
        let all = RequiredFeatures {
            sampler_anisotropy: true,
            shader_sampled_image_array_dynamic_indexing: true,
            shader_draw_parameters: true,
            separate_depth_stencil_layouts: true,
            synchronization2: true,
            dynamic_rendering: true,
        };
        assert!(all.missing().is_empty());

        let partial = RequiredFeatures {
            dynamic_rendering: false,
            sampler_anisotropy: false,
            ..all
        };
        assert_eq!(partial.missing(), vec!["samplerAnisotropy", "dynamicRendering"]);

        let no_indexing = RequiredFeatures {
            shader_sampled_image_array_dynamic_indexing: false,
            separate_depth_stencil_layouts: false,
            ..all
        };
        assert_eq!(
            no_indexing.missing(),
            vec![
                "shaderSampledImageArrayDynamicIndexing",
                "separateDepthStencilLayouts"
            ]
        );
    }

    #[test]
    fn test_discrete_outranks_integrated() {
        let mut discrete = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..Default::default()
        };
        discrete.limits.max_image_dimension2_d = 8192;
        let mut integrated = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            ..Default::default()
        };
        integrated.limits.max_image_dimension2_d = 16384;

        let huge_shared_memory = 64 * 1024 * 1024 * 1024;
        assert!(
            rate_device(&discrete, 2 * 1024 * 1024 * 1024)
                > rate_device(&integrated, huge_shared_memory)
        );
    }

    #[test]
    fn test_device_type_names() {
        assert_eq!(
            device_type_name(vk::PhysicalDeviceType::DISCRETE_GPU),
            "Discrete GPU"
        );
        assert_eq!(device_type_name(vk::PhysicalDeviceType::OTHER), "Other");
    }
}
