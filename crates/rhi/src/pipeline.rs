//! Graphics pipelines targeting dynamic rendering.
//!
//! Pipelines never reference a `VkRenderPass`. Attachment formats come from
//! the swapchain through [`RenderTargetFormats`], and viewport/scissor are
//! always dynamic state.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::ShaderModule;

pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };
        debug!(
            "Created pipeline layout ({} set layout(s), {} push constant range(s))",
            set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

impl PolygonMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
            PolygonMode::Point => vk::PolygonMode::POINT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Fixed-function state of a graphics pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: CompareOp,
    /// Standard `src_alpha, 1 - src_alpha` blending on the color attachment.
    pub blend: bool,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub samples: vk::SampleCountFlags,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare_op: CompareOp::Less,
            blend: false,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

impl PipelineConfig {
    pub fn rasterization_state(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode.to_vk())
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face.to_vk())
            .depth_bias_enable(false)
    }

    pub fn multisample_state(&self) -> vk::PipelineMultisampleStateCreateInfo<'static> {
        vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(self.samples)
    }

    pub fn depth_stencil_state(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare_op.to_vk())
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
    }

    pub fn color_blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);

        if self.blend {
            attachment
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
        } else {
            attachment.blend_enable(false)
        }
    }
}

/// Attachment formats a pipeline renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
}

/// Viewport and scissor, set per draw.
pub const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Everything needed to build one graphics pipeline.
pub struct GraphicsPipelineDesc<'a> {
    pub shader: &'a ShaderModule,
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub targets: RenderTargetFormats,
    pub config: PipelineConfig,
    pub layout: &'a PipelineLayout,
}

pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    pub fn new_graphics(device: Arc<Device>, desc: &GraphicsPipelineDesc<'_>) -> RhiResult<Self> {
        if desc.targets.color == vk::Format::UNDEFINED {
            return Err(RhiError::InvalidUsage(
                "pipeline color attachment format is undefined".to_string(),
            ));
        }

        let stages = desc.shader.stage_create_infos();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = desc.config.rasterization_state();
        let multisample_state = desc.config.multisample_state();
        let depth_stencil_state = desc.config.depth_stencil_state();

        let blend_attachments = [desc.config.color_blend_attachment()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let color_formats = [desc.targets.color];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(desc.targets.depth);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout.handle())
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| result)?
        };
        let pipeline = pipelines.into_iter().next().ok_or_else(|| {
            RhiError::InvalidUsage("driver returned no graphics pipeline".to_string())
        })?;

        info!(
            "Graphics pipeline created (color {:?}, depth {:?})",
            desc.targets.color, desc.targets.depth
        );
        Ok(Self { device, pipeline })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline(self.pipeline, None) };
        debug!("Graphics pipeline destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert!(config.depth_test);
        assert!(config.depth_write);
        assert_eq!(config.depth_compare_op, CompareOp::Less);
        assert!(!config.blend);
        assert_eq!(config.polygon_mode, PolygonMode::Fill);
        assert_eq!(config.cull_mode, CullMode::Back);
        assert_eq!(config.front_face, FrontFace::CounterClockwise);
        assert_eq!(config.samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_rasterization_state_follows_config() {
        let config = PipelineConfig {
            polygon_mode: PolygonMode::Line,
            cull_mode: CullMode::None,
            front_face: FrontFace::Clockwise,
            ..Default::default()
        };
        let state = config.rasterization_state();
        assert_eq!(state.polygon_mode, vk::PolygonMode::LINE);
        assert_eq!(state.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(state.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(state.line_width, 1.0);
    }

    #[test]
    fn test_depth_state_follows_config() {
        let state = PipelineConfig::default().depth_stencil_state();
        assert_eq!(state.depth_test_enable, vk::TRUE);
        assert_eq!(state.depth_write_enable, vk::TRUE);
        assert_eq!(state.depth_compare_op, vk::CompareOp::LESS);

        let read_only = PipelineConfig {
            depth_write: false,
            depth_compare_op: CompareOp::LessOrEqual,
            ..Default::default()
        }
        .depth_stencil_state();
        assert_eq!(read_only.depth_write_enable, vk::FALSE);
        assert_eq!(read_only.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
    }

    #[test]
    fn test_blend_attachment() {
        let opaque = PipelineConfig::default().color_blend_attachment();
        assert_eq!(opaque.blend_enable, vk::FALSE);
        assert_eq!(opaque.color_write_mask, vk::ColorComponentFlags::RGBA);

        let blended = PipelineConfig {
            blend: true,
            ..Default::default()
        }
        .color_blend_attachment();
        assert_eq!(blended.blend_enable, vk::TRUE);
        assert_eq!(blended.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            blended.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }

    #[test]
    fn test_multisample_state() {
        let config = PipelineConfig {
            samples: vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(
            config.multisample_state().rasterization_samples,
            vk::SampleCountFlags::TYPE_4
        );
    }

    #[test]
    fn test_dynamic_states() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::VIEWPORT));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::SCISSOR));
    }

    #[test]
    fn test_enum_conversions() {
        assert_eq!(CullMode::Front.to_vk(), vk::CullModeFlags::FRONT);
        assert_eq!(CompareOp::Always.to_vk(), vk::CompareOp::ALWAYS);
        assert_eq!(PolygonMode::Point.to_vk(), vk::PolygonMode::POINT);
    }
}
