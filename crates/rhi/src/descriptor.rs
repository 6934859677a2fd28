//! Descriptor set layouts, pools and writes.
//!
//! Every frame binds one set with the same shape:
//!
//! | binding | type                     | count          | stage    |
//! |---------|--------------------------|----------------|----------|
//! | 0       | uniform buffer           | 1              | vertex   |
//! | 1       | combined image sampler   | `max_textures` | fragment |
//!
//! [`frame_set_bindings`] and [`frame_pool_sizes`] describe that shape; the
//! RAII types below create the Vulkan objects.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::descriptor::{
//!     DescriptorPool, DescriptorSetLayout, frame_pool_sizes, frame_set_bindings,
//! };
//! use vkframe_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> vkframe_rhi::RhiResult<()> {
//! let layout = DescriptorSetLayout::new(device.clone(), &frame_set_bindings(256))?;
//! let pool = DescriptorPool::new(device.clone(), 2, &frame_pool_sizes(2, 256))?;
//! let sets = pool.allocate(layout.handle(), 2)?;
//! assert_eq!(sets.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! Texture slots are written with [`write_texture_array`]. Writing a set
//! that a pending submission still reads is undefined behavior, so callers
//! only patch sets while the graphics queue is idle.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binding index of the per-frame uniform buffer.
pub const UNIFORM_BINDING: u32 = 0;
/// Binding index of the texture array.
pub const TEXTURE_BINDING: u32 = 1;

/// Layout bindings of the per-frame set.
pub fn frame_set_bindings(max_textures: u32) -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding::default()
            .binding(UNIFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX),
        vk::DescriptorSetLayoutBinding::default()
            .binding(TEXTURE_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(max_textures)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ]
}

/// Pool sizes for `frames` per-frame sets.
pub fn frame_pool_sizes(frames: u32, max_textures: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(frames),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(frames * max_textures),
    ]
}

/// Descriptor set layout, destroyed on drop.
///
/// Shared by the pipeline layout and every per-frame set.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };
        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool; sets allocated from it are released with the pool.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        debug!("Created descriptor pool: max_sets={}", max_sets);

        Ok(Self { device, pool })
    }

    /// Allocates `count` sets sharing one layout.
    pub fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        debug!("Allocated {} descriptor set(s)", sets.len());
        Ok(sets)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Points the uniform binding of `set` at `buffer`.
pub fn write_uniform_buffer(
    device: &Device,
    set: vk::DescriptorSet,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    let buffer_info = [vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(range)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(UNIFORM_BINDING)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&buffer_info);

    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Writes texture array elements `first..first + images.len()` of `set`.
///
/// The set must not be in use by a pending command buffer.
pub fn write_texture_array(
    device: &Device,
    set: vk::DescriptorSet,
    first: u32,
    images: &[vk::DescriptorImageInfo],
) {
    if images.is_empty() {
        return;
    }

    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(TEXTURE_BINDING)
        .dst_array_element(first)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(images);

    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Shader-readable image info for one texture slot.
#[inline]
pub fn sampled_image_info(sampler: vk::Sampler, view: vk::ImageView) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(view)
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_set_bindings() {
        let [uniform, textures] = frame_set_bindings(256);

        assert_eq!(uniform.binding, 0);
        assert_eq!(uniform.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(uniform.descriptor_count, 1);
        assert_eq!(uniform.stage_flags, vk::ShaderStageFlags::VERTEX);

        assert_eq!(textures.binding, 1);
        assert_eq!(
            textures.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(textures.descriptor_count, 256);
        assert_eq!(textures.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_frame_pool_sizes() {
        let [uniform, samplers] = frame_pool_sizes(2, 256);
        assert_eq!(uniform.ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(uniform.descriptor_count, 2);
        assert_eq!(samplers.ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(samplers.descriptor_count, 512);
    }

    #[test]
    fn test_sampled_image_info_layout() {
        let info = sampled_image_info(vk::Sampler::null(), vk::ImageView::null());
        assert_eq!(info.image_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
