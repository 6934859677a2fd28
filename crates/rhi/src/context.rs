//! Device context: the GPU connection and resource-creation primitives.
//!
//! [`DeviceContext`] is built once per window. It selects a physical device,
//! creates the logical device and queues, and keeps a command pool for
//! one-shot upload work. Managers and the renderer receive it as
//! `Arc<DeviceContext>` and create every buffer, image and sampler through it.
//!
//! Uploads are synchronous: [`DeviceContext::single_time_commands`] submits
//! and waits for the graphics queue to drain before returning, so staging
//! buffers can be dropped right after.

use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use bytemuck::Pod;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc, ImageView};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, select_physical_device};
use crate::sampler::Sampler;
use crate::surface::Surface;

/// Format of every uploaded texture.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Checks that `len` bytes form a tightly packed RGBA8 image of `width`x`height`.
pub fn validate_rgba8(len: usize, width: u32, height: u32) -> RhiResult<()> {
    if width == 0 || height == 0 {
        return Err(RhiError::InvalidUsage(format!(
            "texture dimensions must be non-zero, got {width}x{height}"
        )));
    }

    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|texels| texels.checked_mul(4));
    if expected != Some(len) {
        return Err(RhiError::InvalidUsage(format!(
            "RGBA8 texture of {width}x{height} needs {} bytes, got {len}",
            expected.map_or_else(|| "too many".to_string(), |n| n.to_string())
        )));
    }

    Ok(())
}

pub struct DeviceContext {
    command_pool: Mutex<CommandPool>,
    device: Arc<Device>,
    physical: PhysicalDeviceInfo,
    surface: Arc<Surface>,
    instance: Arc<Instance>,
}

impl DeviceContext {
    /// Connects to the best GPU able to present to `target`.
    pub fn new<T>(target: &T, enable_validation: bool) -> RhiResult<Self>
    where
        T: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let display = target
            .display_handle()
            .map_err(|e| RhiError::SurfaceLost(format!("display handle unavailable: {e}")))?
            .as_raw();

        let instance = Arc::new(Instance::new(Some(display), enable_validation)?);
        let surface = Arc::new(Surface::new(instance.clone(), target)?);

        let physical =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        info!("Selected GPU: {:?}", physical);

        let device = Device::new(instance.clone(), &physical)?;
        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;

        Ok(Self {
            command_pool: Mutex::new(command_pool),
            device,
            physical,
            surface,
            instance,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn pool(&self) -> RhiResult<MutexGuard<'_, CommandPool>> {
        self.command_pool
            .lock()
            .map_err(|_| RhiError::InvalidUsage("command pool mutex poisoned".to_string()))
    }

    /// Allocates long-lived primary command buffers from the context's pool.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        self.pool()?.allocate(count)
    }

    /// Returns long-lived command buffers to the context's pool.
    ///
    /// The buffers must not be pending execution.
    pub fn free_command_buffers(
        &self,
        buffers: impl IntoIterator<Item = CommandBuffer>,
    ) -> RhiResult<()> {
        let pool = self.pool()?;
        for buffer in buffers {
            pool.free(buffer);
        }
        Ok(())
    }

    /// Creates an uninitialized buffer.
    pub fn create_buffer(&self, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Buffer> {
        Buffer::new(self.device.clone(), usage, size)
    }

    /// Uploads `data` into a new device-local buffer through a staging buffer.
    ///
    /// Blocks until the copy has finished.
    pub fn create_device_local_buffer<T: Pod>(
        &self,
        data: &[T],
        usage: BufferUsage,
    ) -> RhiResult<Buffer> {
        if usage.is_host_visible() {
            return Err(RhiError::InvalidUsage(format!(
                "{} buffers are host visible and need no staging",
                usage.name()
            )));
        }

        let bytes: &[u8] = bytemuck::cast_slice(data);
        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, bytes)?;
        let buffer = Buffer::new(self.device.clone(), usage, staging.size())?;

        self.single_time_commands(|cmd| {
            cmd.copy_buffer(staging.handle(), buffer.handle(), staging.size());
            Ok(())
        })?;

        debug!(
            "Uploaded {} bytes into device-local {} buffer",
            bytes.len(),
            usage.name()
        );
        Ok(buffer)
    }

    pub fn create_image(&self, desc: &ImageDesc) -> RhiResult<Image> {
        Image::new(self.device.clone(), desc)
    }

    pub fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<ImageView> {
        ImageView::new(self.device.clone(), image, format, aspect)
    }

    /// Uploads tightly packed RGBA8 pixels into a sampled image.
    ///
    /// On return the image is in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn create_texture_image_from_data(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> RhiResult<Image> {
        validate_rgba8(pixels.len(), width, height)?;

        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, pixels)?;
        let image = self.create_image(&ImageDesc::sampled_texture(width, height, TEXTURE_FORMAT))?;

        self.single_time_commands(|cmd| {
            cmd.transition_image(
                image.handle(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            cmd.copy_buffer_to_image(staging.handle(), image.handle(), image.extent());
            cmd.transition_image(
                image.handle(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        debug!("Uploaded {}x{} texture", width, height);
        Ok(image)
    }

    /// Sampler with the device's maximum anisotropy.
    pub fn create_texture_sampler(&self) -> RhiResult<Sampler> {
        Sampler::new(self.device.clone(), self.physical.max_sampler_anisotropy())
    }

    /// Records `record` into a one-shot command buffer, submits it and waits
    /// for the graphics queue to go idle.
    pub fn single_time_commands<R>(
        &self,
        record: impl FnOnce(&CommandBuffer) -> RhiResult<R>,
    ) -> RhiResult<R> {
        let pool = self.pool()?;
        let cmd = pool
            .allocate(1)?
            .pop()
            .ok_or_else(|| RhiError::InvalidUsage("no command buffer allocated".to_string()))?;

        let result = (|| -> RhiResult<R> {
            cmd.begin()?;
            let value = record(&cmd)?;
            cmd.end()?;

            let command_buffers = [cmd.handle()];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            unsafe {
                self.device
                    .submit_graphics(&[submit_info], vk::Fence::null())?
            };
            self.device.wait_graphics_idle()?;
            Ok(value)
        })();

        pool.free(cmd);
        result
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle: {}", e);
        }
        info!("Device context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_validate_rgba8_accepts_packed_pixels() {
        assert!(validate_rgba8(4, 1, 1).is_ok());
        assert!(validate_rgba8(4 * 4 * 4, 4, 4).is_ok());
        assert!(validate_rgba8(2 * 3 * 4, 2, 3).is_ok());
    }

    #[test]
    fn test_validate_rgba8_rejects_wrong_length() {
        let err = validate_rgba8(3, 1, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUsage);
        assert!(err.to_string().contains("needs 4 bytes"));
    }

    #[test]
    fn test_validate_rgba8_rejects_empty() {
        assert_eq!(
            validate_rgba8(0, 0, 4).unwrap_err().kind(),
            ErrorKind::InvalidUsage
        );
        assert_eq!(
            validate_rgba8(0, 4, 0).unwrap_err().kind(),
            ErrorKind::InvalidUsage
        );
    }

    #[test]
    fn test_texture_format_is_srgb() {
        assert_eq!(TEXTURE_FORMAT, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn test_device_context_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DeviceContext>();
    }
}
