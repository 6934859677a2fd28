//! Vulkan backend.
//!
//! [`VulkanRenderer`] composes the swapchain and the three resource managers
//! and drives the per-frame protocol:
//!
//! 1. Wait for the frame slot's fence
//! 2. Acquire a swapchain image (stale surface: recreate and skip the frame)
//! 3. Reset the fence, write the slot's uniform buffer
//! 4. Re-record the slot's command buffer
//! 5. Submit, signalling the render-finished semaphore of the acquired image
//! 6. Present, then recreate the swapchain if it went stale or was resized
//! 7. Advance to the next slot
//!
//! # Resource Destruction Order
//!
//! `shutdown` waits for the device to go idle, then drops frame slots,
//! semaphores, the descriptor pool, pipelines, textures, meshes and finally
//! the swapchain. The [`DeviceContext`] outlives all of them.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, trace, warn};
use vkframe_core::{PresentModePreference, RendererSettings, Timer};
use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::command::CommandBuffer;
use vkframe_rhi::descriptor::{
    DescriptorPool, frame_pool_sizes, write_texture_array, write_uniform_buffer,
};
use vkframe_rhi::pipeline::{PipelineConfig, RenderTargetFormats};
use vkframe_rhi::rendering::FrameAttachments;
use vkframe_rhi::swapchain::Swapchain;
use vkframe_rhi::sync::{Fence, Semaphore};
use vkframe_rhi::{DeviceContext, RhiError, RhiResult, Vertex};

use crate::backend::{Lifecycle, RenderBackend};
use crate::frame::{AcquireStep, FrameLoop, FrameStats, PerImage, PresentStep};
use crate::instance::InstanceList;
use crate::mesh_manager::MeshManager;
use crate::pipeline_manager::{PipelineManager, PushConstants};
use crate::texture_manager::TextureManager;
use crate::ubo::UniformBufferObject;
use crate::{MAX_FRAMES_IN_FLIGHT, MAX_TEXTURES, MeshId, TextureId};

/// Maps the configured preference onto a Vulkan present mode.
pub(crate) fn present_mode_for(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// Resources owned by one frame in flight.
struct FrameSlot {
    command_buffer: CommandBuffer,
    image_available: Semaphore,
    in_flight: Fence,
    uniform_buffer: Buffer,
    descriptor_set: vk::DescriptorSet,
}

/// Everything created by `init` and released by `shutdown`.
///
/// Fields drop in declaration order.
struct GpuState {
    frame_slots: Vec<FrameSlot>,
    render_finished: PerImage<Semaphore>,
    descriptor_pool: DescriptorPool,
    pipelines: PipelineManager,
    textures: TextureManager,
    meshes: MeshManager,
    swapchain: Swapchain,
}

impl GpuState {
    fn targets(&self) -> RenderTargetFormats {
        RenderTargetFormats {
            color: self.swapchain.format(),
            depth: self.swapchain.depth_format(),
        }
    }

    /// Rebuilds the swapchain and the per-image semaphores.
    fn recreate_swapchain(
        &mut self,
        context: &DeviceContext,
        extent: vk::Extent2D,
    ) -> RhiResult<()> {
        let previous = self.targets();

        // Waits for the device to go idle before anything is destroyed.
        self.swapchain.recreate(extent)?;

        let device = context.device();
        self.render_finished
            .rebuild(self.swapchain.image_count(), |_| Semaphore::new(device.clone()))?;

        if self.targets() != previous {
            warn!(
                "Attachment formats changed on recreation: {:?} -> {:?}",
                previous,
                self.targets()
            );
        }

        debug!(
            "Recreated {} render-finished semaphores",
            self.render_finished.len()
        );
        Ok(())
    }

    /// Points texture slot `texture` of every frame's descriptor set at it.
    fn patch_texture_slot(&self, context: &DeviceContext, texture: TextureId) -> RhiResult<()> {
        let uploaded = self.textures.get(texture)?;
        let info = [uploaded.descriptor_info()];
        for slot in &self.frame_slots {
            write_texture_array(context.device(), slot.descriptor_set, texture.0, &info);
        }
        trace!(
            "Patched texture slot {} ({}x{}) in {} descriptor sets",
            texture.0,
            uploaded.extent().width,
            uploaded.extent().height,
            self.frame_slots.len()
        );
        Ok(())
    }

    fn record_frame(
        &self,
        slot: &FrameSlot,
        image_index: u32,
        instances: &InstanceList,
        settings: &RendererSettings,
    ) -> RhiResult<()> {
        let target = self.swapchain.frame_target(image_index)?;
        let pipeline = self.pipelines.get(&settings.default_pipeline)?;
        let layout = self.pipelines.layout().handle();
        let cmd = &slot.command_buffer;

        cmd.reset()?;
        cmd.begin()?;

        cmd.transition_image(
            target.color_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )?;
        // Stencil is never attached; separate depth/stencil layouts let the
        // depth aspect of a combined format transition on its own.
        cmd.transition_image(
            target.depth_image,
            vk::ImageAspectFlags::DEPTH,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        )?;

        let attachments = FrameAttachments::new(
            target.color_view,
            target.depth_view,
            target.extent,
            settings.clear_color,
        );
        cmd.begin_rendering(&attachments.info());
        cmd.set_viewport_and_scissor(target.extent);
        cmd.bind_graphics_pipeline(pipeline.handle());

        for instance in instances.iter() {
            let mesh = self.meshes.get(instance.mesh)?;
            cmd.bind_vertex_buffer(mesh.vertex_buffer().handle());
            cmd.bind_index_buffer(mesh.index_buffer().handle());
            cmd.bind_descriptor_set(layout, slot.descriptor_set);
            cmd.push_constants(
                layout,
                PushConstants::STAGES,
                &PushConstants::for_texture(instance.texture),
            );
            cmd.draw_indexed(mesh.index_count(), 1);
        }

        cmd.end_rendering();

        cmd.transition_image(
            target.color_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;

        cmd.end()
    }
}

/// The Vulkan implementation of [`RenderBackend`].
pub struct VulkanRenderer {
    gpu: Option<GpuState>,
    context: Arc<DeviceContext>,
    settings: RendererSettings,
    default_shader: Vec<u8>,
    state: Lifecycle,
    frames: FrameLoop,
    instances: InstanceList,
    timer: Timer,
}

impl VulkanRenderer {
    /// Creates an uninitialized renderer.
    ///
    /// `default_shader` is the SPIR-V blob the pipeline named
    /// `settings.default_pipeline` is built from during `init`.
    pub fn new(
        context: Arc<DeviceContext>,
        window_extent: vk::Extent2D,
        settings: RendererSettings,
        default_shader: Vec<u8>,
    ) -> Self {
        Self {
            gpu: None,
            context,
            settings,
            default_shader,
            state: Lifecycle::Created,
            frames: FrameLoop::new(window_extent),
            instances: InstanceList::new(),
            timer: Timer::new(),
        }
    }

    #[inline]
    pub fn frames_rendered(&self) -> u64 {
        self.frames.frames_rendered()
    }

    pub fn swapchain_recreations(&self) -> u64 {
        self.gpu
            .as_ref()
            .map_or(0, |gpu| gpu.swapchain.recreations())
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    pub fn meshes(&self) -> RhiResult<&MeshManager> {
        Ok(&self.gpu()?.meshes)
    }

    pub fn textures(&self) -> RhiResult<&TextureManager> {
        Ok(&self.gpu()?.textures)
    }

    pub fn pipelines(&self) -> RhiResult<&PipelineManager> {
        Ok(&self.gpu()?.pipelines)
    }

    pub fn swapchain(&self) -> RhiResult<&Swapchain> {
        Ok(&self.gpu()?.swapchain)
    }

    pub fn instances(&self) -> &InstanceList {
        &self.instances
    }

    /// Rebuilds the swapchain for the current window size right away.
    pub fn recreate_swapchain(&mut self) -> RhiResult<()> {
        self.state.ensure_running("recreate_swapchain")?;
        let extent = self.frames.extent();
        let gpu = self.gpu.as_mut().ok_or_else(not_initialized)?;
        gpu.recreate_swapchain(&self.context, extent)?;
        self.frames.swapchain_rebuilt();
        Ok(())
    }

    fn gpu(&self) -> RhiResult<&GpuState> {
        self.gpu.as_ref().ok_or_else(not_initialized)
    }

    fn create_gpu_state(&self, shader: &[u8]) -> RhiResult<GpuState> {
        let device = self.context.device();

        let swapchain = Swapchain::new(
            device.clone(),
            self.context.surface().clone(),
            self.frames.extent(),
            present_mode_for(self.settings.preferred_present_mode),
        )?;

        let meshes = MeshManager::new(self.context.clone());
        let textures = TextureManager::new(self.context.clone())?;
        let mut pipelines = PipelineManager::new(self.context.clone())?;
        pipelines.create_pipeline(
            &self.settings.default_pipeline,
            shader,
            PipelineConfig::default(),
            RenderTargetFormats {
                color: swapchain.format(),
                depth: swapchain.depth_format(),
            },
        )?;

        let frame_count = MAX_FRAMES_IN_FLIGHT as u32;
        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            frame_count,
            &frame_pool_sizes(frame_count, MAX_TEXTURES),
        )?;
        let descriptor_sets = descriptor_pool.allocate(
            pipelines.descriptor_set_layout().handle(),
            MAX_FRAMES_IN_FLIGHT,
        )?;
        let command_buffers = self.context.allocate_command_buffers(frame_count)?;

        // Every texture slot starts out pointing at the fallback texture.
        let dummy = vec![
            textures.get(TextureId::DUMMY)?.descriptor_info();
            MAX_TEXTURES as usize
        ];

        let mut frame_slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for (descriptor_set, command_buffer) in descriptor_sets.into_iter().zip(command_buffers) {
            let uniform_buffer = self.context.create_buffer(
                BufferUsage::Uniform,
                UniformBufferObject::SIZE as vk::DeviceSize,
            )?;
            write_uniform_buffer(
                device,
                descriptor_set,
                uniform_buffer.handle(),
                uniform_buffer.size(),
            );
            write_texture_array(device, descriptor_set, 0, &dummy);

            frame_slots.push(FrameSlot {
                command_buffer,
                image_available: Semaphore::new(device.clone())?,
                in_flight: Fence::new(device.clone(), true)?,
                uniform_buffer,
                descriptor_set,
            });
        }

        let render_finished =
            PerImage::build(swapchain.image_count(), |_| Semaphore::new(device.clone()))?;

        Ok(GpuState {
            frame_slots,
            render_finished,
            descriptor_pool,
            pipelines,
            textures,
            meshes,
            swapchain,
        })
    }

    fn release_gpu_state(&mut self) {
        let Some(gpu) = self.gpu.take() else {
            return;
        };
        let GpuState {
            frame_slots,
            render_finished,
            descriptor_pool,
            pipelines,
            textures,
            meshes,
            swapchain,
        } = gpu;

        let mut command_buffers = Vec::with_capacity(frame_slots.len());
        for slot in frame_slots {
            command_buffers.push(slot.command_buffer);
        }
        if let Err(e) = self.context.free_command_buffers(command_buffers) {
            warn!("Failed to free frame command buffers: {}", e);
        }

        drop(render_finished);
        drop(descriptor_pool);
        drop(pipelines);
        drop(textures);
        drop(meshes);
        drop(swapchain);
    }
}

fn not_initialized() -> RhiError {
    RhiError::InvalidUsage("renderer is not initialized".to_string())
}

impl RenderBackend for VulkanRenderer {
    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn init(&mut self) -> RhiResult<()> {
        self.state.ensure_created()?;

        // The shader is kept until init succeeds so that a failed init can
        // be retried.
        let gpu = self.create_gpu_state(&self.default_shader)?;

        info!(
            "Renderer initialized: {}x{}, {} swapchain images, {:?}, {} frames in flight",
            gpu.swapchain.extent().width,
            gpu.swapchain.extent().height,
            gpu.swapchain.image_count(),
            gpu.swapchain.present_mode(),
            MAX_FRAMES_IN_FLIGHT
        );

        self.gpu = Some(gpu);
        self.default_shader = Vec::new();
        self.state = Lifecycle::Running;
        self.timer.reset();
        Ok(())
    }

    fn draw_frame(&mut self) -> RhiResult<()> {
        self.state.ensure_running("draw_frame")?;

        if !self.frames.is_drawable() {
            trace!("Window minimized, skipping frame");
            return Ok(());
        }

        let extent = self.frames.extent();
        let context = &self.context;
        let gpu = self.gpu.as_mut().ok_or_else(not_initialized)?;
        let slot_index = self.frames.slot();
        let slot = gpu.frame_slots.get(slot_index).ok_or(RhiError::HandleOutOfRange {
            kind: "frame slot",
            index: slot_index as u32,
            len: MAX_FRAMES_IN_FLIGHT,
        })?;

        slot.in_flight.wait_looped()?;

        let acquire = gpu.swapchain.acquire_next_image(slot.image_available.handle())?;
        let (image_index, acquired_suboptimal) = match self.frames.after_acquire(acquire) {
            AcquireStep::Render {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireStep::RecreateAndSkip => {
                debug!("Swapchain out of date at acquire, recreating");
                gpu.recreate_swapchain(context, extent)?;
                self.frames.swapchain_rebuilt();
                return Ok(());
            }
        };

        // Only reset once work is certain to be submitted, or the next wait
        // on this slot would never return.
        slot.in_flight.reset()?;

        slot.uniform_buffer.write(&UniformBufferObject::animated(
            self.timer.elapsed_secs(),
            gpu.swapchain.extent(),
        ))?;

        gpu.record_frame(slot, image_index, &self.instances, &self.settings)?;

        let render_finished = gpu.render_finished.get(image_index)?.handle();

        let wait_semaphores = [slot.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [slot.command_buffer.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            context
                .device()
                .submit_graphics(&[submit_info], slot.in_flight.handle())?;
        }

        let presented = gpu.swapchain.present(image_index, render_finished)?;

        if self.frames.after_present(presented, acquired_suboptimal) == PresentStep::Recreate {
            debug!(
                "Recreating swapchain after present ({:?}, resized: {})",
                presented,
                self.frames.resize_pending()
            );
            gpu.recreate_swapchain(context, extent)?;
            self.frames.swapchain_rebuilt();
        }

        self.frames.frame_submitted();
        Ok(())
    }

    fn shutdown(&mut self) -> RhiResult<()> {
        if self.state == Lifecycle::ShutDown {
            return Ok(());
        }

        self.context.wait_idle()?;
        self.release_gpu_state();
        self.state = Lifecycle::ShutDown;

        info!(
            "Renderer shut down after {} frames",
            self.frames.frames_rendered()
        );
        Ok(())
    }

    fn create_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> RhiResult<MeshId> {
        self.state.ensure_running("create_mesh")?;
        let gpu = self.gpu.as_mut().ok_or_else(not_initialized)?;
        gpu.meshes.create_mesh(vertices, indices)
    }

    fn create_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> RhiResult<TextureId> {
        self.state.ensure_running("create_texture")?;
        let gpu = self.gpu.as_mut().ok_or_else(not_initialized)?;
        let id = gpu.textures.create_texture(pixels, width, height)?;

        // The upload drained the graphics queue, so no frame still reads
        // these descriptor sets.
        gpu.patch_texture_slot(&self.context, id)?;
        Ok(id)
    }

    fn create_pipeline(
        &mut self,
        name: &str,
        shader_bytes: &[u8],
        config: PipelineConfig,
    ) -> RhiResult<()> {
        self.state.ensure_running("create_pipeline")?;
        let gpu = self.gpu.as_mut().ok_or_else(not_initialized)?;
        let targets = gpu.targets();
        gpu.pipelines
            .create_pipeline(name, shader_bytes, config, targets)
    }

    fn add_instance(&mut self, mesh: MeshId, texture: TextureId) -> RhiResult<()> {
        self.state.ensure_running("add_instance")?;
        let gpu = self.gpu()?;
        gpu.meshes.get(mesh)?;
        gpu.textures.get(texture)?;

        self.instances.push(mesh, texture);
        trace!(
            "Added instance {} (mesh {}, texture {})",
            self.instances.len() - 1,
            mesh.0,
            texture.0
        );
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        let previous = self.frames.extent();
        if self.frames.resize(width, height) {
            debug!(
                "Resize triggered: {}x{} -> {}x{}",
                previous.width, previous.height, width, height
            );
        }
    }

    fn frame_index(&self) -> usize {
        self.frames.slot()
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn stats(&self) -> FrameStats {
        let mut stats = FrameStats {
            frame_index: self.frames.slot(),
            frames_rendered: self.frames.frames_rendered(),
            instance_count: self.instances.len(),
            ..FrameStats::default()
        };
        if let Some(gpu) = &self.gpu {
            stats.swapchain_recreations = gpu.swapchain.recreations();
            stats.swapchain_images = gpu.swapchain.image_count();
            stats.image_available_semaphores = gpu.frame_slots.len();
            stats.render_finished_semaphores = gpu.render_finished.len();
        }
        stats
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to shut down renderer cleanly: {:?}", e);
            // Release anyway; the context waits for the device on drop.
            self.release_gpu_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_mapping() {
        assert_eq!(
            present_mode_for(PresentModePreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            present_mode_for(PresentModePreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            present_mode_for(PresentModePreference::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_frame_stats_default() {
        let stats = FrameStats::default();
        assert_eq!(stats.frame_index, 0);
        assert_eq!(stats.frames_rendered, 0);
        assert_eq!(stats.render_finished_semaphores, 0);
    }

    #[test]
    fn test_vulkan_renderer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<VulkanRenderer>();
    }
}
