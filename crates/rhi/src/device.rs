//! Vulkan logical device and queue management.
//!
//! [`Device`] owns the `VkDevice`, its graphics and present queues, and the
//! gpu-allocator instance every buffer and image is allocated from. It keeps
//! the [`Instance`] alive, so resources that hold an `Arc<Device>` can never
//! outlive the instance they were created from.

use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};

/// Vulkan logical device wrapper.
///
/// Shared through `Arc`. The allocator sits behind a `Mutex`; everything else
/// is immutable after construction.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    /// `None` only while dropping, so it can be released before the device.
    allocator: Option<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_family: u32,
    present_family: u32,
    instance: Arc<Instance>,
}

impl Device {
    /// Creates the logical device for an already selected physical device.
    ///
    /// Enables `VK_KHR_swapchain` and every feature checked by
    /// [`RequiredFeatures`](crate::physical_device::RequiredFeatures).
    pub fn new(instance: Arc<Instance>, physical: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let (graphics_family, present_family) = complete_families(&physical.queue_families)?;

        let unique_families = physical.queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();
        debug!("Creating queues for families {:?}", unique_families);

        let mut features_1_1 =
            vk::PhysicalDeviceVulkan11Features::default().shader_draw_parameters(true);
        let mut features_1_2 =
            vk::PhysicalDeviceVulkan12Features::default().separate_depth_stencil_layouts(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .shader_sampled_image_array_dynamic_indexing(true);

        let extension_names: Vec<*const std::ffi::c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_1)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };
        info!("Logical device created on '{}'", physical.device_name());

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };
        debug!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: physical.device,
            allocator: Some(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            instance,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    #[inline]
    pub fn present_family(&self) -> u32 {
        self.present_family
    }

    /// Locks the memory allocator.
    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .as_ref()
            .ok_or_else(RhiError::allocator_poisoned)?
            .lock()
            .map_err(|_| RhiError::allocator_poisoned())
    }

    /// Format support on the physical device.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .handle()
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Blocks until every queue is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits work to the graphics queue.
    ///
    /// # Safety
    ///
    /// Command buffers must be fully recorded, and `fence` (if not null) must
    /// be unsignaled and not already pending.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }

    /// Blocks until the graphics queue is idle.
    pub fn wait_graphics_idle(&self) -> RhiResult<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue)? };
        Ok(())
    }
}

fn complete_families(families: &QueueFamilyIndices) -> RhiResult<(u32, u32)> {
    match (families.graphics_family, families.present_family) {
        (Some(graphics), Some(present)) => Ok((graphics, present)),
        _ => Err(RhiError::DeviceNotFound(
            "no queue family supports both graphics and presentation".to_string(),
        )),
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }
        }
        // The allocator frees its memory blocks, which needs a live device.
        drop(self.allocator.take());
        unsafe { self.device.destroy_device(None) };
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device and the queue handles are plain dispatchable handles;
// the allocator is guarded by a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_families() {
        let families = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(1),
        };
        assert_eq!(complete_families(&families).unwrap(), (0, 1));
    }

    #[test]
    fn test_incomplete_families_rejected() {
        let families = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        let err = complete_families(&families).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DeviceNotFound);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
