//! Presentation surface.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// RAII wrapper for a `VkSurfaceKHR`.
///
/// Holds the instance it was created from, so the instance outlives it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
    _instance: Arc<Instance>,
}

impl Surface {
    /// Creates a surface for any window exposing raw display and window handles.
    pub fn new<T>(instance: Arc<Instance>, target: &T) -> RhiResult<Self>
    where
        T: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let display = target
            .display_handle()
            .map_err(|e| RhiError::SurfaceLost(format!("display handle unavailable: {e}")))?;
        let window = target
            .window_handle()
            .map_err(|e| RhiError::SurfaceLost(format!("window handle unavailable: {e}")))?;

        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display.as_raw(),
                window.as_raw(),
                None,
            )?
        };
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        tracing::info!("Vulkan surface created");

        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Surface extension loader, for capability and format queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
        tracing::debug!("Vulkan surface destroyed");
    }
}
