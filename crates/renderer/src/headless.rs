//! Backend that runs the frame protocol without a GPU.
//!
//! It validates every call exactly like the Vulkan backend and drives the
//! same [`FrameLoop`], but the presentation engine and the fences are
//! simulated and no commands are recorded. Useful for tests and for running
//! the application logic on machines without a Vulkan driver.
//!
//! The simulated surface can be made stale with
//! [`HeadlessBackend::lose_surface`], and its image count limits changed with
//! [`HeadlessBackend::set_surface_image_limits`], to exercise recreation.

use ash::vk;
use tracing::{debug, info, trace};
use vkframe_rhi::context::validate_rgba8;
use vkframe_rhi::pipeline::PipelineConfig;
use vkframe_rhi::shader::parse_spirv;
use vkframe_rhi::swapchain::{AcquireOutcome, PresentOutcome, determine_image_count};
use vkframe_rhi::{RhiError, RhiResult, Vertex};

use crate::backend::{Lifecycle, RenderBackend};
use crate::frame::{AcquireStep, FrameLoop, FrameStats, PerImage, PresentStep};
use crate::instance::InstanceList;
use crate::mesh_manager::validate_mesh_input;
use crate::registry::{NamedRegistry, Registry};
use crate::texture_manager::{DUMMY_TEXTURE_PIXEL, check_capacity};
use crate::{MAX_FRAMES_IN_FLIGHT, MeshId, TextureId};

/// Stand-in for a presentation engine: hands out images round-robin and
/// reports itself out of date once the surface was lost.
#[derive(Debug)]
struct SimulatedSwapchain {
    extent: vk::Extent2D,
    image_count: u32,
    next_image: u32,
    out_of_date: bool,
    recreations: u64,
}

impl SimulatedSwapchain {
    fn new(extent: vk::Extent2D, capabilities: &vk::SurfaceCapabilitiesKHR) -> Self {
        Self {
            extent,
            image_count: determine_image_count(capabilities),
            next_image: 0,
            out_of_date: false,
            recreations: 0,
        }
    }

    fn acquire(&mut self) -> AcquireOutcome {
        if self.out_of_date {
            return AcquireOutcome::OutOfDate;
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        }
    }

    fn present(&self) -> PresentOutcome {
        if self.out_of_date {
            PresentOutcome::OutOfDate
        } else {
            PresentOutcome::Presented
        }
    }

    fn recreate(&mut self, extent: vk::Extent2D, capabilities: &vk::SurfaceCapabilitiesKHR) {
        self.extent = extent;
        self.image_count = determine_image_count(capabilities);
        self.next_image = 0;
        self.out_of_date = false;
        self.recreations += 1;
    }
}

/// Everything `init` creates. Built completely before it is stored, so a
/// failed `init` leaves nothing behind.
#[derive(Debug)]
struct HeadlessState {
    /// Whether each frame slot's in-flight fence is signaled.
    fences: [bool; MAX_FRAMES_IN_FLIGHT],
    /// Swapchain generation each render-finished semaphore was made for.
    render_finished: PerImage<u64>,
    mesh_index_counts: Registry<u32>,
    texture_extents: Registry<vk::Extent2D>,
    pipelines: NamedRegistry<PipelineConfig>,
    swapchain: SimulatedSwapchain,
}

impl HeadlessState {
    fn new(
        extent: vk::Extent2D,
        capabilities: &vk::SurfaceCapabilitiesKHR,
        default_pipeline: &str,
        default_shader: &[u8],
    ) -> RhiResult<Self> {
        let swapchain = SimulatedSwapchain::new(extent, capabilities);
        let render_finished = PerImage::build(swapchain.image_count as usize, |_| Ok(0))?;

        let mut state = Self {
            fences: [true; MAX_FRAMES_IN_FLIGHT],
            render_finished,
            mesh_index_counts: Registry::new("mesh"),
            texture_extents: Registry::new("texture"),
            pipelines: NamedRegistry::new(),
            swapchain,
        };

        let dummy = state.upload_texture(&DUMMY_TEXTURE_PIXEL, 1, 1)?;
        debug_assert_eq!(dummy, TextureId::DUMMY);
        state.register_pipeline(default_pipeline, default_shader, PipelineConfig::default())?;
        Ok(state)
    }

    fn wait_fence(&self, slot: usize) -> RhiResult<()> {
        match self.fences.get(slot) {
            Some(true) => Ok(()),
            Some(false) => Err(RhiError::InvalidUsage(format!(
                "fence of frame slot {slot} is unsignaled with no work pending"
            ))),
            None => Err(RhiError::HandleOutOfRange {
                kind: "frame slot",
                index: slot as u32,
                len: MAX_FRAMES_IN_FLIGHT,
            }),
        }
    }

    fn set_fence(&mut self, slot: usize, signaled: bool) {
        if let Some(fence) = self.fences.get_mut(slot) {
            *fence = signaled;
        }
    }

    fn recreate_swapchain(
        &mut self,
        extent: vk::Extent2D,
        capabilities: &vk::SurfaceCapabilitiesKHR,
    ) -> RhiResult<()> {
        self.swapchain.recreate(extent, capabilities);
        let generation = self.swapchain.recreations;
        self.render_finished
            .rebuild(self.swapchain.image_count as usize, |_| Ok(generation))?;
        debug!(
            "Recreated simulated swapchain: {}x{}, {} images",
            extent.width, extent.height, self.swapchain.image_count
        );
        Ok(())
    }

    fn upload_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> RhiResult<TextureId> {
        validate_rgba8(pixels.len(), width, height)?;
        check_capacity(self.texture_extents.len())?;
        let id = self
            .texture_extents
            .push(vk::Extent2D { width, height })?;
        debug!("Registered texture {} ({}x{})", id, width, height);
        Ok(TextureId(id))
    }

    fn register_pipeline(
        &mut self,
        name: &str,
        shader_bytes: &[u8],
        config: PipelineConfig,
    ) -> RhiResult<()> {
        if self.pipelines.contains(name) {
            return Err(RhiError::DuplicatePipeline(name.to_string()));
        }
        parse_spirv(shader_bytes)?;
        self.pipelines.insert(name, config)
    }
}

pub struct HeadlessBackend {
    state: Lifecycle,
    frames: FrameLoop,
    instances: InstanceList,
    gpu: Option<HeadlessState>,
    capabilities: vk::SurfaceCapabilitiesKHR,
    default_pipeline: String,
    default_shader: Vec<u8>,
}

impl HeadlessBackend {
    /// The default pipeline is built from `default_shader` during `init`.
    pub fn new(
        extent: vk::Extent2D,
        default_pipeline: impl Into<String>,
        default_shader: Vec<u8>,
    ) -> Self {
        Self {
            state: Lifecycle::Created,
            frames: FrameLoop::new(extent),
            instances: InstanceList::new(),
            gpu: None,
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                ..Default::default()
            },
            default_pipeline: default_pipeline.into(),
            default_shader,
        }
    }

    /// Makes the next acquire report the surface out of date.
    pub fn lose_surface(&mut self) -> RhiResult<()> {
        self.state.ensure_running("lose_surface")?;
        self.gpu_mut()?.swapchain.out_of_date = true;
        Ok(())
    }

    /// Image count limits reported by the simulated surface from now on.
    /// They take effect at the next swapchain recreation.
    pub fn set_surface_image_limits(&mut self, min_image_count: u32, max_image_count: u32) {
        self.capabilities.min_image_count = min_image_count;
        self.capabilities.max_image_count = max_image_count;
    }

    /// Index count recorded for `mesh`.
    pub fn mesh_index_count(&self, mesh: MeshId) -> RhiResult<u32> {
        self.gpu()?.mesh_index_counts.get(mesh.0).copied()
    }

    pub fn texture_extent(&self, texture: TextureId) -> RhiResult<vk::Extent2D> {
        self.gpu()?.texture_extents.get(texture.0).copied()
    }

    pub fn pipeline_config(&self, name: &str) -> RhiResult<&PipelineConfig> {
        self.gpu()?.pipelines.get(name)
    }

    pub fn texture_count(&self) -> usize {
        self.gpu.as_ref().map_or(0, |gpu| gpu.texture_extents.len())
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames.frames_rendered()
    }

    pub fn instances(&self) -> &InstanceList {
        &self.instances
    }

    /// Whether every render-finished semaphore belongs to the current
    /// swapchain generation.
    pub fn render_finished_is_current(&self) -> bool {
        self.gpu.as_ref().is_some_and(|gpu| {
            let generation = gpu.swapchain.recreations;
            (0..gpu.render_finished.len() as u32)
                .all(|i| gpu.render_finished.get(i).is_ok_and(|g| *g == generation))
        })
    }

    fn gpu(&self) -> RhiResult<&HeadlessState> {
        self.gpu.as_ref().ok_or_else(not_initialized)
    }

    fn gpu_mut(&mut self) -> RhiResult<&mut HeadlessState> {
        self.gpu.as_mut().ok_or_else(not_initialized)
    }
}

fn not_initialized() -> RhiError {
    RhiError::InvalidUsage("headless backend is not initialized".to_string())
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn init(&mut self) -> RhiResult<()> {
        self.state.ensure_created()?;

        let gpu = HeadlessState::new(
            self.frames.extent(),
            &self.capabilities,
            &self.default_pipeline,
            &self.default_shader,
        )?;

        info!(
            "Headless backend initialized ({}x{}, {} images)",
            gpu.swapchain.extent.width, gpu.swapchain.extent.height, gpu.swapchain.image_count
        );
        self.gpu = Some(gpu);
        self.default_shader = Vec::new();
        self.state = Lifecycle::Running;
        Ok(())
    }

    fn draw_frame(&mut self) -> RhiResult<()> {
        self.state.ensure_running("draw_frame")?;

        if !self.frames.is_drawable() {
            trace!("Zero-area surface, skipping frame");
            return Ok(());
        }

        let extent = self.frames.extent();
        let slot = self.frames.slot();
        let gpu = self.gpu.as_mut().ok_or_else(not_initialized)?;

        gpu.wait_fence(slot)?;

        let acquire = gpu.swapchain.acquire();
        let (image_index, acquired_suboptimal) = match self.frames.after_acquire(acquire) {
            AcquireStep::Render {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireStep::RecreateAndSkip => {
                debug!("Simulated swapchain out of date at acquire, recreating");
                gpu.recreate_swapchain(extent, &self.capabilities)?;
                self.frames.swapchain_rebuilt();
                return Ok(());
            }
        };

        gpu.set_fence(slot, false);

        gpu.pipelines.get(&self.default_pipeline)?;
        for instance in self.instances.iter() {
            gpu.mesh_index_counts.get(instance.mesh.0)?;
            gpu.texture_extents.get(instance.texture.0)?;
        }
        gpu.render_finished.get(image_index)?;

        // Submitted work completes at once.
        gpu.set_fence(slot, true);

        let presented = gpu.swapchain.present();
        if self.frames.after_present(presented, acquired_suboptimal) == PresentStep::Recreate {
            gpu.recreate_swapchain(extent, &self.capabilities)?;
            self.frames.swapchain_rebuilt();
        }

        self.frames.frame_submitted();
        Ok(())
    }

    fn shutdown(&mut self) -> RhiResult<()> {
        if self.state == Lifecycle::ShutDown {
            return Ok(());
        }

        self.gpu = None;
        self.state = Lifecycle::ShutDown;
        info!(
            "Headless backend shut down after {} frames",
            self.frames.frames_rendered()
        );
        Ok(())
    }

    fn create_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> RhiResult<MeshId> {
        self.state.ensure_running("create_mesh")?;
        let index_count = validate_mesh_input(vertices, indices)?;
        let id = self.gpu_mut()?.mesh_index_counts.push(index_count)?;
        debug!("Registered mesh {} ({} indices)", id, index_count);
        Ok(MeshId(id))
    }

    fn create_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> RhiResult<TextureId> {
        self.state.ensure_running("create_texture")?;
        self.gpu_mut()?.upload_texture(pixels, width, height)
    }

    fn create_pipeline(
        &mut self,
        name: &str,
        shader_bytes: &[u8],
        config: PipelineConfig,
    ) -> RhiResult<()> {
        self.state.ensure_running("create_pipeline")?;
        self.gpu_mut()?.register_pipeline(name, shader_bytes, config)
    }

    fn add_instance(&mut self, mesh: MeshId, texture: TextureId) -> RhiResult<()> {
        self.state.ensure_running("add_instance")?;
        let gpu = self.gpu()?;
        gpu.mesh_index_counts.get(mesh.0)?;
        gpu.texture_extents.get(texture.0)?;
        self.instances.push(mesh, texture);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.frames.resize(width, height);
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
            stats.swapchain_recreations = gpu.swapchain.recreations;
            stats.swapchain_images = gpu.swapchain.image_count as usize;
            stats.image_available_semaphores = gpu.fences.len();
            stats.render_finished_semaphores = gpu.render_finished.len();
        }
        stats
    }
}
