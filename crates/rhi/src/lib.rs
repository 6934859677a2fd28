//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! RAII wrappers over `ash` for everything the frame engine needs:
//! - Instance, surface, physical-device selection and the logical device
//! - [`DeviceContext`] with buffer/image/sampler creation and synchronous uploads
//! - Swapchain with its depth buffer and the recreation protocol
//! - Command recording, descriptors, shaders, pipelines and sync primitives

mod error;

pub mod barrier;
pub mod buffer;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod sampler;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use context::DeviceContext;
pub use error::{ErrorKind, RhiError, RhiResult};
pub use vertex::Vertex;

// Re-export ash types that users might need
pub use ash::vk;
