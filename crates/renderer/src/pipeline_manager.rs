//! Named graphics pipelines and the layouts they share.
//!
//! Every pipeline uses the same descriptor-set layout (uniform block at
//! binding 0, `MAX_TEXTURES` combined image-samplers at binding 1) and the
//! same pipeline layout, which adds one `u32` push constant for the fragment
//! stage: the index of the texture to sample.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::info;
use vkframe_rhi::descriptor::{DescriptorSetLayout, frame_set_bindings};
use vkframe_rhi::pipeline::{
    GraphicsPipelineDesc, Pipeline, PipelineConfig, PipelineLayout, RenderTargetFormats,
};
use vkframe_rhi::shader::ShaderModule;
use vkframe_rhi::{DeviceContext, RhiResult, Vertex};

use crate::registry::NamedRegistry;
use crate::{MAX_TEXTURES, TextureId};

/// Per-draw push constant block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PushConstants {
    pub texture_index: u32,
}

impl PushConstants {
    pub const STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::FRAGMENT;

    pub fn for_texture(texture: TextureId) -> Self {
        Self {
            texture_index: texture.0,
        }
    }

    pub fn range() -> vk::PushConstantRange {
        vk::PushConstantRange::default()
            .stage_flags(Self::STAGES)
            .offset(0)
            .size(std::mem::size_of::<Self>() as u32)
    }
}

pub struct PipelineManager {
    context: Arc<DeviceContext>,
    // Pipelines are destroyed before the layouts they were built with.
    pipelines: NamedRegistry<Pipeline>,
    pipeline_layout: PipelineLayout,
    descriptor_set_layout: DescriptorSetLayout,
}

impl PipelineManager {
    pub fn new(context: Arc<DeviceContext>) -> RhiResult<Self> {
        let device = context.device().clone();

        let descriptor_set_layout =
            DescriptorSetLayout::new(device.clone(), &frame_set_bindings(MAX_TEXTURES))?;
        let pipeline_layout = PipelineLayout::new(
            device,
            &[descriptor_set_layout.handle()],
            &[PushConstants::range()],
        )?;

        Ok(Self {
            context,
            pipelines: NamedRegistry::new(),
            pipeline_layout,
            descriptor_set_layout,
        })
    }

    /// Builds a pipeline from a SPIR-V blob holding both `vertMain` and
    /// `fragMain`, rendering into `targets`.
    ///
    /// Fails with `DuplicatePipeline` if `name` is taken. The name check runs
    /// before any GPU object is created.
    pub fn create_pipeline(
        &mut self,
        name: &str,
        shader_bytes: &[u8],
        config: PipelineConfig,
        targets: RenderTargetFormats,
    ) -> RhiResult<()> {
        if self.pipelines.contains(name) {
            return Err(vkframe_rhi::RhiError::DuplicatePipeline(name.to_string()));
        }

        let device = self.context.device().clone();
        let shader = ShaderModule::from_spirv_bytes(device.clone(), shader_bytes)?;

        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let pipeline = Pipeline::new_graphics(
            device,
            &GraphicsPipelineDesc {
                shader: &shader,
                vertex_bindings: &bindings,
                vertex_attributes: &attributes,
                targets,
                config,
                layout: &self.pipeline_layout,
            },
        )?;
        // The shader module is only needed while the pipeline is built.
        drop(shader);

        self.pipelines.insert(name, pipeline)?;
        info!("Pipeline '{}' created", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> RhiResult<&Pipeline> {
        self.pipelines.get(name)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.pipelines.contains(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    #[inline]
    pub fn layout(&self) -> &PipelineLayout {
        &self.pipeline_layout
    }

    #[inline]
    pub fn descriptor_set_layout(&self) -> &DescriptorSetLayout {
        &self.descriptor_set_layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constants_hold_one_u32() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 4);
        let push = PushConstants::for_texture(TextureId(7));
        assert_eq!(bytemuck::bytes_of(&push), &7u32.to_ne_bytes());
    }

    #[test]
    fn test_push_constant_range_is_fragment_only() {
        let range = PushConstants::range();
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 4);
    }

    #[test]
    fn test_pipeline_manager_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<PipelineManager>();
    }
}
