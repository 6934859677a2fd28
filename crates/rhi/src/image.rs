//! Device-local images and image views.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Parameters of a single-mip 2D image.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    /// Allocation label shown in allocator reports.
    pub name: &'static str,
}

impl ImageDesc {
    /// Optimal-tiling depth attachment.
    pub fn depth_attachment(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            width,
            height,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            name: "depth",
        }
    }

    /// Optimal-tiling image that is filled by transfer and then sampled.
    pub fn sampled_texture(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            width,
            height,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            name: "texture",
        }
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// A 2D `VkImage` in device-local memory.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    name: &'static str,
}

impl Image {
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::InvalidUsage(format!(
                "{} image dimensions must be greater than 0, got {}x{}",
                desc.name, desc.width, desc.height
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().and_then(|mut allocator| {
            Ok(allocator.allocate(&AllocationCreateDesc {
                name: desc.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: desc.tiling == vk::ImageTiling::LINEAR,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let image = Self {
            device,
            image,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent(),
            name: desc.name,
        };

        if let Some(allocation) = image.allocation.as_ref() {
            unsafe {
                image.device.handle().bind_image_memory(
                    image.image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        debug!(
            "Created {} image {}x{} ({:?})",
            desc.name, desc.width, desc.height, desc.format
        );
        Ok(image)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_image(self.image, None) };

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        tracing::error!("Failed to free {} image: {:?}", self.name, e);
                    }
                }
                Err(e) => tracing::error!("Leaking {} image memory: {}", self.name, e),
            }
        }

        debug!(
            "Destroyed {} image {}x{}",
            self.name, self.extent.width, self.extent.height
        );
    }
}

/// A 2D view over a single mip and layer of an image.
pub struct ImageView {
    device: Arc<Device>,
    view: vk::ImageView,
}

impl ImageView {
    /// Creates a view; works for owned images and swapchain images alike.
    pub fn new(
        device: Arc<Device>,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<Self> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(subresource_range(aspect));

        let view = unsafe { device.handle().create_image_view(&view_info, None)? };
        Ok(Self { device, view })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_image_view(self.view, None) };
    }
}

/// Full range of a single-mip, single-layer image.
pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_attachment_desc() {
        let desc = ImageDesc::depth_attachment(800, 600, vk::Format::D32_SFLOAT);
        assert_eq!(desc.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!(desc.tiling, vk::ImageTiling::OPTIMAL);
        assert_eq!(desc.extent().width, 800);
        assert_eq!(desc.extent().height, 600);
    }

    #[test]
    fn test_sampled_texture_desc() {
        let desc = ImageDesc::sampled_texture(4, 4, vk::Format::R8G8B8A8_SRGB);
        assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(desc.usage.contains(vk::ImageUsageFlags::SAMPLED));
    }

    #[test]
    fn test_subresource_range() {
        let range = subresource_range(vk::ImageAspectFlags::DEPTH);
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
    }
}
