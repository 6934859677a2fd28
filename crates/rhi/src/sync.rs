//! Synchronization primitives.
//!
//! - [`Semaphore`] orders work between queue operations (acquire, submit,
//!   present).
//! - [`Fence`] lets the host wait for submitted work.
//!
//! # Overview
//!
//! Each frame slot owns one "image available" semaphore and one in-flight
//! fence. "Render finished" semaphores belong to swapchain images instead,
//! because presentation may still be waiting on one after its frame slot
//! has been reused.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::device::Device;
//! use vkframe_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<Device>) -> vkframe_rhi::RhiResult<()> {
//! let image_available = Semaphore::new(device.clone())?;
//!
//! // Signaled, so the first frame does not wait.
//! let in_flight = Fence::new(device.clone(), true)?;
//!
//! in_flight.wait_looped()?;
//! // ... acquire with `image_available`, then reset right before submit ...
//! in_flight.reset()?;
//! # let _ = image_available.handle();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::device::Device;
use crate::error::RhiResult;

/// Timeout used by [`Fence::wait_looped`] for a single wait call.
pub const FENCE_WAIT_SLICE_NS: u64 = 1_000_000_000;

/// Vulkan semaphore wrapper, destroyed on drop.
///
/// # Thread Safety
///
/// Immutable after creation. Submissions that wait on or signal it must
/// still be externally ordered, which the single-threaded frame loop does.
pub struct Semaphore {
    /// Keeps the device alive until the semaphore is destroyed.
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.semaphore, None) };
    }
}

/// Vulkan fence wrapper, destroyed on drop.
///
/// # Thread Safety
///
/// `wait` may be called from any thread; `reset` must not race with a
/// submission that signals the fence.
pub struct Fence {
    /// Keeps the device alive until the fence is destroyed.
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence; `signaled` fences let the first wait return at once.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits up to `timeout` nanoseconds. `VK_TIMEOUT` comes back as an error.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, timeout)?
        };
        Ok(())
    }

    /// Waits until signaled, retrying on `VK_TIMEOUT`.
    pub fn wait_looped(&self) -> RhiResult<()> {
        loop {
            match self.wait(FENCE_WAIT_SLICE_NS) {
                Err(crate::RhiError::VulkanError(vk::Result::TIMEOUT)) => {
                    trace!("Fence wait timed out, retrying");
                }
                other => return other,
            }
        }
    }

    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.fence, None) };
    }
}
