//! Image layout transitions.
//!
//! Only the transitions the frame loop and texture uploads perform are
//! supported; any other pair is rejected before a command is recorded.

use ash::vk;

use crate::error::{RhiError, RhiResult};

/// Stage and access masks of a single `VkImageMemoryBarrier2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// Returns the masks for moving an image from `old` to `new`.
pub fn layout_transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RhiResult<TransitionMasks> {
    use vk::AccessFlags2 as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags2 as S;

    let masks = match (old, new) {
        // Texture upload.
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::TRANSFER,
            src_access: A::NONE,
            dst_access: A::TRANSFER_WRITE,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_stage: S::TRANSFER,
            dst_stage: S::FRAGMENT_SHADER,
            src_access: A::TRANSFER_WRITE,
            dst_access: A::SHADER_READ,
        },
        // Per-frame attachments.
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_stage: S::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: S::COLOR_ATTACHMENT_OUTPUT,
            src_access: A::NONE,
            dst_access: A::COLOR_ATTACHMENT_WRITE,
        },
        (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_stage: S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            dst_stage: S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            src_access: A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access: A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        },
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => TransitionMasks {
            src_stage: S::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: S::BOTTOM_OF_PIPE,
            src_access: A::COLOR_ATTACHMENT_WRITE,
            dst_access: A::NONE,
        },
        (old, new) => return Err(RhiError::UnsupportedLayoutTransition { old, new }),
    };

    Ok(masks)
}

/// Builds a full-image barrier for `old -> new`.
pub fn image_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RhiResult<vk::ImageMemoryBarrier2<'static>> {
    let masks = layout_transition_masks(old, new)?;

    Ok(vk::ImageMemoryBarrier2::default()
        .src_stage_mask(masks.src_stage)
        .src_access_mask(masks.src_access)
        .dst_stage_mask(masks.dst_stage)
        .dst_access_mask(masks.dst_access)
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(crate::image::subresource_range(aspect)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transitions() {
        let to_dst = layout_transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags2::TOP_OF_PIPE);
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(to_dst.dst_access, vk::AccessFlags2::TRANSFER_WRITE);

        let to_read = layout_transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(to_read.dst_access, vk::AccessFlags2::SHADER_READ);
    }

    #[test]
    fn test_attachment_transitions() {
        let color = layout_transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(
            color.dst_stage,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(color.dst_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);

        let depth = layout_transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert!(
            depth
                .dst_stage
                .contains(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS)
        );

        let present = layout_transition_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .unwrap();
        assert_eq!(present.dst_stage, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
    }

    #[test]
    fn test_unsupported_transition() {
        let err = layout_transition_masks(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap_err();
        assert!(matches!(err, RhiError::UnsupportedLayoutTransition { .. }));
    }

    #[test]
    fn test_image_barrier_layouts() {
        let barrier = image_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }
}
