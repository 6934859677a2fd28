//! Dynamic rendering attachments.
//!
//! Each frame renders into one color attachment (the acquired swapchain
//! image) and one depth attachment, both cleared on load.

use ash::vk;

/// Depth value the depth attachment is cleared to.
pub const DEPTH_CLEAR_VALUE: f32 = 1.0;

/// Backing storage for a `VkRenderingInfo`.
///
/// The attachment infos live here so the `RenderingInfo` returned by
/// [`FrameAttachments::info`] can borrow them.
pub struct FrameAttachments {
    color: [vk::RenderingAttachmentInfo<'static>; 1],
    depth: vk::RenderingAttachmentInfo<'static>,
    render_area: vk::Rect2D,
}

impl FrameAttachments {
    pub fn new(
        color_view: vk::ImageView,
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) -> Self {
        let color = vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            });

        // Depth is only needed while the frame renders.
        let depth = vk::RenderingAttachmentInfo::default()
            .image_view(depth_view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: DEPTH_CLEAR_VALUE,
                    stencil: 0,
                },
            });

        Self {
            color: [color],
            depth,
            render_area: vk::Rect2D::default().extent(extent),
        }
    }

    pub fn info(&self) -> vk::RenderingInfo<'_> {
        vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color)
            .depth_attachment(&self.depth)
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.render_area.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachments() -> FrameAttachments {
        FrameAttachments::new(
            vk::ImageView::null(),
            vk::ImageView::null(),
            vk::Extent2D {
                width: 1280,
                height: 720,
            },
            [0.1, 0.2, 0.3, 1.0],
        )
    }

    #[test]
    fn test_color_attachment_clears_and_stores() {
        let attachments = attachments();
        let color = &attachments.color[0];
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(
            color.image_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(unsafe { color.clear_value.color.float32 }, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn test_depth_attachment_clears_to_one() {
        let attachments = attachments();
        assert_eq!(attachments.depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(
            attachments.depth.image_layout,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            unsafe { attachments.depth.clear_value.depth_stencil.depth },
            DEPTH_CLEAR_VALUE
        );
    }

    #[test]
    fn test_rendering_info() {
        let attachments = attachments();
        let info = attachments.info();
        assert_eq!(info.layer_count, 1);
        assert_eq!(info.color_attachment_count, 1);
        assert_eq!(info.render_area.extent.width, 1280);
        assert_eq!(attachments.extent().height, 720);
        assert!(!info.p_depth_attachment.is_null());
    }
}
