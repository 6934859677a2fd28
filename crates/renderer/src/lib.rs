//! Frame rendering engine.
//!
//! This crate sits on top of `vkframe-rhi` and owns everything that lives
//! longer than a single Vulkan call:
//! - Mesh, texture and pipeline managers (append-only, handle based)
//! - The retained instance list drawn every frame
//! - Frame-in-flight slots and the acquire/record/submit/present protocol
//! - The [`RenderBackend`] trait with a Vulkan and a headless implementation

mod backend;
mod frame;
mod headless;
mod instance;
mod mesh_manager;
mod pipeline_manager;
mod registry;
mod renderer;
mod texture_manager;
mod ubo;

pub use backend::RenderBackend;
pub use frame::{AcquireStep, FrameCounter, FrameLoop, FrameStats, PerImage, PresentStep};
pub use headless::HeadlessBackend;
pub use instance::{DrawInstance, InstanceList};
pub use mesh_manager::{Mesh, MeshManager};
pub use pipeline_manager::{PipelineManager, PushConstants};
pub use registry::{NamedRegistry, Registry};
pub use renderer::VulkanRenderer;
pub use texture_manager::{DUMMY_TEXTURE_PIXEL, Texture, TextureManager};
pub use ubo::UniformBufferObject;

pub use vkframe_rhi::pipeline::{CompareOp, CullMode, FrontFace, PipelineConfig, PolygonMode};
pub use vkframe_rhi::{ErrorKind, RhiError, RhiResult, Vertex};

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Size of the combined image-sampler array in every descriptor set.
pub const MAX_TEXTURES: u32 = 256;

/// Handle of an uploaded mesh: its index in the mesh manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Handle of an uploaded texture: its index in the texture manager.
///
/// `TextureId(0)` always refers to the 1x1 white fallback texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl TextureId {
    /// The fallback texture created before any other.
    pub const DUMMY: Self = Self(0);
}
