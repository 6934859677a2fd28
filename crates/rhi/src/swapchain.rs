//! Swapchain and depth buffer lifecycle.
//!
//! [`Swapchain`] owns the presentable images, one view per image, and a single
//! depth image sized to the swapchain extent. When the surface changes, all of
//! them are rebuilt together by [`Swapchain::recreate`]:
//!
//! 1. wait for the device to go idle,
//! 2. destroy image views, the swapchain handle and the depth resources,
//! 3. create all three again for the new extent.
//!
//! Selection logic (format, present mode, extent, image count, depth format)
//! and acquire/present result handling are plain functions so they can be
//! tested without a device.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc, ImageView};
use crate::surface::Surface;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Lower bound on the requested image count.
pub const PREFERRED_MIN_IMAGE_COUNT: u32 = 3;

/// Surface properties relevant to swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(device: &Device, surface: &Surface) -> RhiResult<Self> {
        let loader = surface.loader();
        let physical_device = device.physical_device();
        let surface = surface.handle();

        let (capabilities, formats, present_modes) = unsafe {
            (
                loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                loader.get_physical_device_surface_formats(physical_device, surface)?,
                loader.get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Picks `B8G8R8A8_SRGB` / `SRGB_NONLINEAR`, else the first reported format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    match (preferred, formats.first()) {
        (Some(&format), _) => Ok(format),
        (None, Some(&first)) => {
            warn!("B8G8R8A8_SRGB unavailable, using {:?}", first.format);
            Ok(first)
        }
        (None, None) => Err(RhiError::ExtensionUnsupported(
            "surface reports no formats".to_string(),
        )),
    }
}

/// Uses `preferred` when the surface offers it, else FIFO (always available).
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or `width`x`height` clamped to its limits
/// when the surface leaves the size to the swapchain.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// `max(3, min_image_count)`, capped by `max_image_count` when non-zero.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = PREFERRED_MIN_IMAGE_COUNT.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Returns the first candidate whose `tiling` features contain `features`.
pub fn select_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    query: impl Fn(vk::Format) -> vk::FormatProperties,
) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = query(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                _ => props.optimal_tiling_features.contains(features),
            }
        })
        .ok_or_else(|| {
            RhiError::ExtensionUnsupported(format!(
                "none of {:?} supports {:?} with {:?} tiling",
                candidates, features, tiling
            ))
        })
}

/// Result of acquiring the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be recreated.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    #[inline]
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Only `ERROR_OUT_OF_DATE_KHR` is recoverable; everything else is an error.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(e.into()),
    }
}

/// `Ok(true)` from the driver means `VK_SUBOPTIMAL_KHR`.
pub fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(e.into()),
    }
}

/// Everything destroyed and rebuilt on recreation.
struct SwapchainResources {
    loader: ash::khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    // Dropped after the swapchain handle, view before image.
    depth_view: ImageView,
    depth_image: Image,
}

impl Drop for SwapchainResources {
    fn drop(&mut self) {
        self.image_views.clear();
        unsafe { self.loader.destroy_swapchain(self.handle, None) };
        debug!(
            "Swapchain destroyed ({}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

pub struct Swapchain {
    device: Arc<Device>,
    surface: Arc<Surface>,
    loader: ash::khr::swapchain::Device,
    preferred_present_mode: vk::PresentModeKHR,
    resources: Option<SwapchainResources>,
    recreations: u64,
}

impl Swapchain {
    pub fn new(
        device: Arc<Device>,
        surface: Arc<Surface>,
        extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(device.instance().handle(), device.handle());

        let mut swapchain = Self {
            device,
            surface,
            loader,
            preferred_present_mode,
            resources: None,
            recreations: 0,
        };
        swapchain.resources = Some(swapchain.create_resources(extent)?);
        Ok(swapchain)
    }

    /// Rebuilds the swapchain and depth buffer for `extent`.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!(
            "Recreating swapchain for {}x{}",
            extent.width, extent.height
        );
        self.resources = None;
        self.resources = Some(self.create_resources(extent)?);
        self.recreations += 1;
        Ok(())
    }

    fn create_resources(&self, requested: vk::Extent2D) -> RhiResult<SwapchainResources> {
        let support = SwapchainSupport::query(&self.device, &self.surface)?;
        if support.present_modes.is_empty() {
            return Err(RhiError::ExtensionUnsupported(
                "surface reports no present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, self.preferred_present_mode);
        let extent = choose_extent(&support.capabilities, requested.width, requested.height);
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images requested",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let graphics_family = self.device.graphics_family();
        let present_family = self.device.present_family();
        let family_indices = [graphics_family, present_family];
        let (sharing_mode, family_indices) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = unsafe { self.loader.create_swapchain(&create_info, None)? };

        let images = match unsafe { self.loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(handle, None) };
                return Err(e.into());
            }
        };

        let depth_format = match self.find_depth_format() {
            Ok(format) => format,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(handle, None) };
                return Err(e);
            }
        };

        // Views and depth clean themselves up; only the raw handle needs care.
        let build = || -> RhiResult<_> {
            let image_views = images
                .iter()
                .map(|&image| {
                    ImageView::new(
                        self.device.clone(),
                        image,
                        surface_format.format,
                        vk::ImageAspectFlags::COLOR,
                    )
                })
                .collect::<RhiResult<Vec<_>>>()?;

            let depth_image = Image::new(
                self.device.clone(),
                &ImageDesc::depth_attachment(extent.width, extent.height, depth_format),
            )?;
            let depth_view = ImageView::new(
                self.device.clone(),
                depth_image.handle(),
                depth_format,
                vk::ImageAspectFlags::DEPTH,
            )?;
            Ok((image_views, depth_image, depth_view))
        };

        let (image_views, depth_image, depth_view) = match build() {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(handle, None) };
                return Err(e);
            }
        };

        info!(
            "Swapchain created with {} images, depth format {:?}",
            images.len(),
            depth_format
        );

        Ok(SwapchainResources {
            loader: self.loader.clone(),
            handle,
            images,
            image_views,
            surface_format,
            present_mode,
            extent,
            depth_view,
            depth_image,
        })
    }

    fn find_depth_format(&self) -> RhiResult<vk::Format> {
        select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| self.device.format_properties(format),
        )
    }

    fn resources(&self) -> RhiResult<&SwapchainResources> {
        self.resources
            .as_ref()
            .ok_or_else(|| RhiError::InvalidUsage("swapchain is not initialized".to_string()))
    }

    /// Acquires the next image, signalling `semaphore` when it is ready.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        let resources = self.resources()?;
        let result = unsafe {
            self.loader
                .acquire_next_image(resources.handle, u64::MAX, semaphore, vk::Fence::null())
        };
        classify_acquire(result)
    }

    /// Queues `image_index` for presentation after `wait_semaphore` signals.
    pub fn present(
        &self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let resources = self.resources()?;
        let swapchains = [resources.handle];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.loader
                .queue_present(self.device.present_queue(), &present_info)
        };
        classify_present(result)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.resources
            .as_ref()
            .map_or_else(vk::Extent2D::default, |r| r.extent)
    }

    /// Color attachment format.
    pub fn format(&self) -> vk::Format {
        self.resources
            .as_ref()
            .map_or(vk::Format::UNDEFINED, |r| r.surface_format.format)
    }

    pub fn depth_format(&self) -> vk::Format {
        self.resources
            .as_ref()
            .map_or(vk::Format::UNDEFINED, |r| r.depth_image.format())
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.resources
            .as_ref()
            .map_or(vk::PresentModeKHR::FIFO, |r| r.present_mode)
    }

    pub fn image_count(&self) -> usize {
        self.resources.as_ref().map_or(0, |r| r.images.len())
    }

    /// Number of completed [`recreate`](Self::recreate) calls.
    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Image, view and depth handles for one acquired image.
    pub fn frame_target(&self, image_index: u32) -> RhiResult<FrameTarget> {
        let resources = self.resources()?;
        let index = image_index as usize;
        let (image, view) = resources
            .images
            .get(index)
            .zip(resources.image_views.get(index))
            .ok_or(RhiError::HandleOutOfRange {
                kind: "swapchain image",
                index: image_index,
                len: resources.images.len(),
            })?;

        Ok(FrameTarget {
            color_image: *image,
            color_view: view.handle(),
            depth_image: resources.depth_image.handle(),
            depth_view: resources.depth_view.handle(),
            extent: resources.extent,
        })
    }
}

/// Attachments for recording one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    pub color_image: vk::Image,
    pub color_view: vk::ImageView,
    pub depth_image: vk::Image,
    pub depth_view: vk::ImageView,
    pub extent: vk::Extent2D,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_bgra_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_is_stable() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            choose_surface_format(&formats).unwrap().format
        );
    }

    #[test]
    fn test_choose_surface_format_empty() {
        let err = choose_surface_format(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtensionUnsupported);
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let mut caps = capabilities(2, 8);
        caps.current_extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        let extent = choose_extent(&caps, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_requested() {
        let caps = capabilities(2, 8);
        let extent = choose_extent(&caps, 10_000, 0);
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn test_image_count() {
        assert_eq!(determine_image_count(&capabilities(2, 8)), 3);
        assert_eq!(determine_image_count(&capabilities(4, 8)), 4);
        assert_eq!(determine_image_count(&capabilities(2, 2)), 2);
        // Zero max means unbounded.
        assert_eq!(determine_image_count(&capabilities(1, 0)), 3);
    }

    #[test]
    fn test_select_supported_depth_format() {
        let query = |format: vk::Format| {
            let features = if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            };
            vk::FormatProperties {
                optimal_tiling_features: features,
                ..Default::default()
            }
        };

        let format = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            query,
        )
        .unwrap();
        assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn test_select_supported_format_prefers_first_candidate() {
        let all = |_| vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        let format = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            all,
        )
        .unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_select_supported_format_none() {
        let none = |_| vk::FormatProperties::default();
        let err = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            none,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtensionUnsupported);
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        let err = classify_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SurfaceLost);
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(classify_present(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());

        assert!(!PresentOutcome::Presented.needs_recreate());
        assert!(PresentOutcome::Suboptimal.needs_recreate());
        assert!(PresentOutcome::OutOfDate.needs_recreate());
    }
}
