//! Texture uploads and the fallback texture.
//!
//! The manager creates a 1x1 opaque white texture in its constructor, so
//! [`TextureId::DUMMY`] is valid for the manager's whole lifetime and every
//! texture created later gets a handle of 1 or more.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};
use vkframe_rhi::context::validate_rgba8;
use vkframe_rhi::descriptor::sampled_image_info;
use vkframe_rhi::image::{Image, ImageView};
use vkframe_rhi::sampler::Sampler;
use vkframe_rhi::{DeviceContext, RhiResult};

use crate::registry::Registry;
use crate::{MAX_TEXTURES, TextureId};

/// RGBA8 texel of the fallback texture.
pub const DUMMY_TEXTURE_PIXEL: [u8; 4] = [255, 255, 255, 255];

/// A sampled 2D texture.
pub struct Texture {
    // View and sampler go before the image they refer to.
    sampler: Sampler,
    view: ImageView,
    image: Image,
}

impl Texture {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    /// Descriptor info for a combined image-sampler binding.
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        sampled_image_info(self.sampler.handle(), self.view.handle())
    }
}

pub struct TextureManager {
    context: Arc<DeviceContext>,
    textures: Registry<Texture>,
}

impl TextureManager {
    /// Creates the manager and uploads the fallback texture as handle 0.
    pub fn new(context: Arc<DeviceContext>) -> RhiResult<Self> {
        let mut manager = Self {
            context,
            textures: Registry::new("texture"),
        };
        let dummy = manager.upload(&DUMMY_TEXTURE_PIXEL, 1, 1)?;
        debug_assert_eq!(dummy, TextureId::DUMMY);
        info!("Texture manager ready with fallback texture");
        Ok(manager)
    }

    /// Uploads tightly packed RGBA8 `pixels` and returns the texture's handle.
    pub fn create_texture(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> RhiResult<TextureId> {
        self.upload(pixels, width, height)
    }

    fn upload(&mut self, pixels: &[u8], width: u32, height: u32) -> RhiResult<TextureId> {
        validate_rgba8(pixels.len(), width, height)?;
        check_capacity(self.textures.len())?;

        let image = self
            .context
            .create_texture_image_from_data(pixels, width, height)?;
        let view = self.context.create_image_view(
            image.handle(),
            image.format(),
            vk::ImageAspectFlags::COLOR,
        )?;
        let sampler = self.context.create_texture_sampler()?;

        let id = self.textures.push(Texture {
            sampler,
            view,
            image,
        })?;
        debug!("Created texture {} ({}x{})", id, width, height);
        Ok(TextureId(id))
    }

    pub fn get(&self, id: TextureId) -> RhiResult<&Texture> {
        self.textures.get(id.0)
    }

    #[inline]
    pub fn contains(&self, id: TextureId) -> bool {
        self.textures.contains(id.0)
    }

    /// Number of textures, the fallback included.
    #[inline]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// Textures past the descriptor array could never be sampled.
pub(crate) fn check_capacity(registered: usize) -> RhiResult<()> {
    if registered >= MAX_TEXTURES as usize {
        return Err(vkframe_rhi::RhiError::InvalidUsage(format!(
            "texture limit of {MAX_TEXTURES} reached"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::ErrorKind;

    #[test]
    fn test_dummy_pixel_is_opaque_white() {
        assert_eq!(DUMMY_TEXTURE_PIXEL, [255; 4]);
        assert!(validate_rgba8(DUMMY_TEXTURE_PIXEL.len(), 1, 1).is_ok());
    }

    #[test]
    fn test_dummy_handle_is_zero() {
        assert_eq!(TextureId::DUMMY, TextureId(0));
        assert_eq!(TextureId::default(), TextureId::DUMMY);
    }

    #[test]
    fn test_check_capacity() {
        assert!(check_capacity(0).is_ok());
        assert!(check_capacity(MAX_TEXTURES as usize - 1).is_ok());
        assert_eq!(
            check_capacity(MAX_TEXTURES as usize).unwrap_err().kind(),
            ErrorKind::InvalidUsage
        );
    }
}
