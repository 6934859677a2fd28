//! The capability set an application drives.

use vkframe_rhi::pipeline::PipelineConfig;
use vkframe_rhi::{RhiError, RhiResult, Vertex};

use crate::frame::FrameStats;
use crate::{MeshId, TextureId};

/// A renderer the application can drive without knowing the graphics API.
///
/// Call order contract: `init` once, then any mix of resource creation and
/// `draw_frame`, then `shutdown` once. Every other call before `init` or
/// after `shutdown` fails with `InvalidUsage`.
pub trait RenderBackend {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Creates the swapchain, managers, frame slots and the default pipeline.
    fn init(&mut self) -> RhiResult<()>;

    /// Runs one acquire/record/submit/present cycle.
    ///
    /// A stale surface is not an error: the frame is skipped and the
    /// swapchain rebuilt.
    fn draw_frame(&mut self) -> RhiResult<()>;

    /// Waits for the GPU and releases every owned resource.
    fn shutdown(&mut self) -> RhiResult<()>;

    fn create_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> RhiResult<MeshId>;

    /// Uploads RGBA8 pixels. The returned handle is never the fallback's.
    fn create_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> RhiResult<TextureId>;

    fn create_pipeline(
        &mut self,
        name: &str,
        shader_bytes: &[u8],
        config: PipelineConfig,
    ) -> RhiResult<()>;

    /// Appends a draw of `mesh` with `texture` to the retained instance list.
    fn add_instance(&mut self, mesh: MeshId, texture: TextureId) -> RhiResult<()>;

    /// Records a new drawable size. A zero-area size pauses drawing.
    fn resize(&mut self, width: u32, height: u32);

    /// Index of the frame slot the next `draw_frame` uses.
    fn frame_index(&self) -> usize;

    fn instance_count(&self) -> usize;

    /// Counters for logging and leak checks.
    fn stats(&self) -> FrameStats;
}

/// Where a backend is in its `init`/`shutdown` lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    #[default]
    Created,
    Running,
    ShutDown,
}

impl Lifecycle {
    pub(crate) fn ensure_running(self, operation: &str) -> RhiResult<()> {
        match self {
            Lifecycle::Running => Ok(()),
            Lifecycle::Created => Err(RhiError::InvalidUsage(format!(
                "{operation} called before init"
            ))),
            Lifecycle::ShutDown => Err(RhiError::InvalidUsage(format!(
                "{operation} called after shutdown"
            ))),
        }
    }

    pub(crate) fn ensure_created(self) -> RhiResult<()> {
        match self {
            Lifecycle::Created => Ok(()),
            _ => Err(RhiError::InvalidUsage(
                "init may only be called once".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::ErrorKind;

    #[test]
    fn test_lifecycle_gates_operations() {
        assert!(Lifecycle::Running.ensure_running("draw_frame").is_ok());

        let err = Lifecycle::Created.ensure_running("draw_frame").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUsage);
        assert!(err.to_string().contains("before init"));

        let err = Lifecycle::ShutDown.ensure_running("add_instance").unwrap_err();
        assert!(err.to_string().contains("after shutdown"));
    }

    #[test]
    fn test_lifecycle_init_once() {
        assert!(Lifecycle::Created.ensure_created().is_ok());
        assert!(Lifecycle::Running.ensure_created().is_err());
        assert!(Lifecycle::ShutDown.ensure_created().is_err());
    }
}
