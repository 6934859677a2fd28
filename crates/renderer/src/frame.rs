//! Frame-in-flight bookkeeping shared by every backend.
//!
//! # Overview
//!
//! A backend owns the GPU objects, but the decisions of the frame protocol
//! live here so that each backend takes them the same way:
//!
//! - [`FrameCounter`] maps the number of finished frames onto a slot
//! - [`FrameLoop`] tracks the drawable size, the pending-resize flag and
//!   turns acquire/present outcomes into [`AcquireStep`]/[`PresentStep`]
//! - [`PerImage`] holds objects kept one per swapchain image
//! - [`FrameStats`] is the snapshot a backend reports to the application
//!
//! # Protocol
//!
//! ```text
//! is_drawable? ──no──> skip (slot unchanged)
//!     │ yes
//! wait fence, acquire ──OutOfDate──> recreate, skip (slot unchanged)
//!     │ Render { image_index, suboptimal }
//! reset fence, record, submit, present
//!     │
//! after_present ──Recreate──> recreate, swapchain_rebuilt
//!     │
//! frame_submitted (slot advances)
//! ```

use ash::vk;
use vkframe_rhi::swapchain::{AcquireOutcome, PresentOutcome};
use vkframe_rhi::{RhiError, RhiResult};

use crate::MAX_FRAMES_IN_FLIGHT;

/// Tracks which frame slot the next `draw_frame` uses.
///
/// The slot is `frames_rendered mod MAX_FRAMES_IN_FLIGHT`; it only advances
/// once a frame has been submitted and presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounter {
    frames_rendered: u64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the current frame slot.
    #[inline]
    pub fn slot(&self) -> usize {
        (self.frames_rendered % MAX_FRAMES_IN_FLIGHT as u64) as usize
    }

    /// Total number of frames that completed the protocol.
    #[inline]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Moves to the next frame slot.
    pub fn advance(&mut self) {
        self.frames_rendered += 1;
    }
}

/// What to do with the image returned by acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStep {
    /// Reset the slot's fence and render into `image_index`.
    Render { image_index: u32, suboptimal: bool },
    /// The swapchain is stale. Rebuild it and skip the frame; the fence
    /// stays signaled and the slot does not advance.
    RecreateAndSkip,
}

/// What to do with the swapchain once the image was queued for present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStep {
    Keep,
    Recreate,
}

/// Per-backend frame protocol state.
#[derive(Debug, Clone, Copy)]
pub struct FrameLoop {
    counter: FrameCounter,
    extent: vk::Extent2D,
    /// Set by [`FrameLoop::resize`], cleared when the swapchain is rebuilt.
    resized: bool,
}

impl FrameLoop {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            counter: FrameCounter::new(),
            extent,
            resized: false,
        }
    }

    /// Records a new drawable size. Returns `false` if nothing changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == self.extent.width && height == self.extent.height {
            return false;
        }
        self.extent = vk::Extent2D { width, height };
        self.resized = true;
        true
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn resize_pending(&self) -> bool {
        self.resized
    }

    /// A zero-area surface (minimized window) cannot be drawn to.
    #[inline]
    pub fn is_drawable(&self) -> bool {
        self.extent.width != 0 && self.extent.height != 0
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.counter.slot()
    }

    #[inline]
    pub fn frames_rendered(&self) -> u64 {
        self.counter.frames_rendered()
    }

    pub fn after_acquire(&self, outcome: AcquireOutcome) -> AcquireStep {
        match outcome {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => AcquireStep::Render {
                image_index,
                suboptimal,
            },
            AcquireOutcome::OutOfDate => AcquireStep::RecreateAndSkip,
        }
    }

    /// A suboptimal acquire still renders, so it is handled here too.
    pub fn after_present(&self, outcome: PresentOutcome, acquired_suboptimal: bool) -> PresentStep {
        if outcome.needs_recreate() || acquired_suboptimal || self.resized {
            PresentStep::Recreate
        } else {
            PresentStep::Keep
        }
    }

    /// Call after every successful swapchain recreation.
    pub fn swapchain_rebuilt(&mut self) {
        self.resized = false;
    }

    /// Call once per frame whose commands reached the queue.
    pub fn frame_submitted(&mut self) {
        self.counter.advance();
    }
}

/// Objects kept one per swapchain image, indexed by image index.
#[derive(Debug)]
pub struct PerImage<T> {
    items: Vec<T>,
}

impl<T> PerImage<T> {
    /// Builds `count` items with `make(image_index)`.
    pub fn build(count: usize, make: impl FnMut(usize) -> RhiResult<T>) -> RhiResult<Self> {
        let items = (0..count).map(make).collect::<RhiResult<Vec<_>>>()?;
        Ok(Self { items })
    }

    /// Replaces every item for a swapchain with `count` images.
    ///
    /// The new set is built before the old one is dropped, so a failure
    /// leaves the current items in place.
    pub fn rebuild(
        &mut self,
        count: usize,
        make: impl FnMut(usize) -> RhiResult<T>,
    ) -> RhiResult<()> {
        *self = Self::build(count, make)?;
        Ok(())
    }

    pub fn get(&self, image_index: u32) -> RhiResult<&T> {
        self.items
            .get(image_index as usize)
            .ok_or(RhiError::HandleOutOfRange {
                kind: "swapchain image",
                index: image_index,
                len: self.items.len(),
            })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Counters exposed to the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Slot the next frame uses.
    pub frame_index: usize,
    pub frames_rendered: u64,
    pub instance_count: usize,
    pub swapchain_recreations: u64,
    pub swapchain_images: usize,
    /// Live "image available" semaphores, one per frame slot.
    pub image_available_semaphores: usize,
    /// Live "render finished" semaphores, one per swapchain image.
    pub render_finished_semaphores: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::ErrorKind;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn acquired(image_index: u32, suboptimal: bool) -> AcquireOutcome {
        AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        }
    }

    #[test]
    fn test_frame_counter_starts_at_zero() {
        let counter = FrameCounter::new();
        assert_eq!(counter.slot(), 0);
        assert_eq!(counter.frames_rendered(), 0);
    }

    #[test]
    fn test_frame_counter_wraps() {
        let mut counter = FrameCounter::new();
        counter.advance();
        assert_eq!(counter.slot(), 1);
        counter.advance();
        assert_eq!(counter.slot(), 0);
        assert_eq!(counter.frames_rendered(), 2);
    }

    #[test]
    fn test_frame_counter_slot_is_modulo() {
        let mut counter = FrameCounter::new();
        for n in 1..=1000u64 {
            counter.advance();
            assert_eq!(counter.slot() as u64, n % MAX_FRAMES_IN_FLIGHT as u64);
        }
    }

    #[test]
    fn test_zero_area_is_not_drawable() {
        assert!(FrameLoop::new(extent(800, 600)).is_drawable());
        assert!(!FrameLoop::new(extent(0, 600)).is_drawable());
        assert!(!FrameLoop::new(extent(800, 0)).is_drawable());
    }

    #[test]
    fn test_acquire_renders_into_returned_image() {
        let frames = FrameLoop::new(extent(800, 600));
        assert_eq!(
            frames.after_acquire(acquired(2, false)),
            AcquireStep::Render {
                image_index: 2,
                suboptimal: false
            }
        );
        // Suboptimal images are still rendered and presented.
        assert_eq!(
            frames.after_acquire(acquired(0, true)),
            AcquireStep::Render {
                image_index: 0,
                suboptimal: true
            }
        );
    }

    #[test]
    fn test_out_of_date_acquire_skips_without_advancing() {
        let mut frames = FrameLoop::new(extent(800, 600));
        frames.frame_submitted();
        assert_eq!(
            frames.after_acquire(AcquireOutcome::OutOfDate),
            AcquireStep::RecreateAndSkip
        );
        frames.swapchain_rebuilt();
        assert_eq!(frames.slot(), 1);
        assert_eq!(frames.frames_rendered(), 1);
    }

    #[test]
    fn test_present_keeps_healthy_swapchain() {
        let frames = FrameLoop::new(extent(800, 600));
        assert_eq!(
            frames.after_present(PresentOutcome::Presented, false),
            PresentStep::Keep
        );
    }

    #[test]
    fn test_present_recreates_on_stale_or_suboptimal() {
        let frames = FrameLoop::new(extent(800, 600));
        assert_eq!(
            frames.after_present(PresentOutcome::Suboptimal, false),
            PresentStep::Recreate
        );
        assert_eq!(
            frames.after_present(PresentOutcome::OutOfDate, false),
            PresentStep::Recreate
        );
        assert_eq!(
            frames.after_present(PresentOutcome::Presented, true),
            PresentStep::Recreate
        );
    }

    #[test]
    fn test_resize_requests_recreate_until_rebuilt() {
        let mut frames = FrameLoop::new(extent(800, 600));
        assert!(!frames.resize(800, 600));
        assert!(!frames.resize_pending());

        assert!(frames.resize(1024, 768));
        assert_eq!(frames.extent(), extent(1024, 768));
        assert_eq!(
            frames.after_present(PresentOutcome::Presented, false),
            PresentStep::Recreate
        );

        frames.swapchain_rebuilt();
        assert!(!frames.resize_pending());
        assert_eq!(
            frames.after_present(PresentOutcome::Presented, false),
            PresentStep::Keep
        );
    }

    #[test]
    fn test_frame_submitted_advances_slot() {
        let mut frames = FrameLoop::new(extent(800, 600));
        for n in 1..=5usize {
            frames.frame_submitted();
            assert_eq!(frames.slot(), n % MAX_FRAMES_IN_FLIGHT);
        }
        assert_eq!(frames.frames_rendered(), 5);
    }

    #[test]
    fn test_per_image_rebuild_follows_image_count() {
        let mut semaphores = PerImage::build(3, |i| Ok(i as u64)).unwrap();
        assert_eq!(semaphores.len(), 3);

        semaphores.rebuild(4, |i| Ok(100 + i as u64)).unwrap();
        assert_eq!(semaphores.len(), 4);
        assert_eq!(*semaphores.get(3).unwrap(), 103);

        semaphores.rebuild(2, |i| Ok(200 + i as u64)).unwrap();
        assert_eq!(semaphores.len(), 2);
        assert_eq!(
            semaphores.get(2).unwrap_err().kind(),
            ErrorKind::HandleOutOfRange
        );
    }

    #[test]
    fn test_per_image_failed_rebuild_keeps_old_set() {
        let mut semaphores = PerImage::build(3, |i| Ok(i as u64)).unwrap();
        let result = semaphores.rebuild(5, |i| {
            if i == 4 {
                Err(RhiError::AllocationFailed("out of memory".to_string()))
            } else {
                Ok(i as u64)
            }
        });
        assert!(result.is_err());
        assert_eq!(semaphores.len(), 3);
    }
}
