//! Platform layer for vkframe.
//!
//! Wraps a winit window and exposes its raw display/window handles, which is
//! all the renderer needs to create a presentation surface.

mod window;

pub use window::Window;
