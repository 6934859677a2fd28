//! vkframe - windowed driver for the frame rendering engine.
//!
//! Opens a window, builds the Vulkan renderer from `vkframe.toml` (or the
//! path given as the first argument), uploads a textured quad and draws it
//! once per redraw until the window closes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{Vec2, Vec3};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use vkframe_core::{EngineConfig, Timer};
use vkframe_platform::Window;
use vkframe_renderer::{RenderBackend, TextureId, Vertex, VulkanRenderer};
use vkframe_rhi::{DeviceContext, vk};

const DEFAULT_CONFIG_PATH: &str = "vkframe.toml";
const CHECKER_SIZE: u32 = 64;
const CHECKER_CELL: u32 = 8;
const FPS_LOG_INTERVAL: u64 = 600;
/// Distance of each demo quad's center from the origin along X.
const QUAD_OFFSET: f32 = 0.6;

/// RGBA8 checkerboard of `size`x`size` texels with `cell`-texel squares.
fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)).is_multiple_of(2);
            let value = if light { 230 } else { 40 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

/// A unit quad in the XY plane facing +Z, centered on `center`.
fn quad(center: Vec3) -> (Vec<Vertex>, Vec<u32>) {
    let corner = |x: f32, y: f32, color: Vec3| {
        Vertex::new(
            center + Vec3::new(x, y, 0.0),
            color,
            Vec3::Z,
            Vec2::new(0.5 - x, 0.5 - y),
        )
    };
    let vertices = vec![
        corner(-0.5, -0.5, Vec3::X),
        corner(0.5, -0.5, Vec3::Y),
        corner(0.5, 0.5, Vec3::Z),
        corner(-0.5, 0.5, Vec3::ONE),
    ];
    (vertices, vec![0, 1, 2, 2, 3, 0])
}

struct App {
    config: EngineConfig,
    // Dropped before the window whose surface it renders into.
    renderer: Option<Box<dyn RenderBackend>>,
    window: Option<Window>,
    timer: Timer,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            timer: Timer::new(),
        }
    }

    fn create_renderer(&self, window: &Window) -> Result<Box<dyn RenderBackend>> {
        let settings = self.config.renderer.clone();
        let shader = std::fs::read(&settings.shader_path).with_context(|| {
            format!("failed to read shader {}", settings.shader_path.display())
        })?;

        let context = Arc::new(
            DeviceContext::new(window, settings.validation)
                .context("failed to create device context")?,
        );
        let extent = vk::Extent2D {
            width: window.width(),
            height: window.height(),
        };

        let mut renderer = VulkanRenderer::new(context, extent, settings, shader);
        renderer.init().context("failed to initialize renderer")?;

        let texture = renderer.create_texture(
            &checkerboard(CHECKER_SIZE, CHECKER_CELL),
            CHECKER_SIZE,
            CHECKER_SIZE,
        )?;

        let (vertices, indices) = quad(Vec3::new(-QUAD_OFFSET, 0.0, 0.0));
        let textured = renderer.create_mesh(&vertices, &indices)?;
        renderer.add_instance(textured, texture)?;

        // Side by side with the first, so it is not hidden by the depth test.
        let (vertices, indices) = quad(Vec3::new(QUAD_OFFSET, 0.0, 0.0));
        let untextured = renderer.create_mesh(&vertices, &indices)?;
        renderer.add_instance(untextured, TextureId::DUMMY)?;

        Ok(Box::new(renderer))
    }

    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take()
            && let Err(e) = renderer.shutdown()
        {
            error!("Renderer shutdown failed: {:?}", e);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match self.create_renderer(&window) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
                self.timer.reset();
            }
            Err(e) => {
                error!("Failed to create renderer: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };

                if let Err(e) = renderer.draw_frame() {
                    error!("Frame failed: {:?}", e);
                    self.shutdown();
                    event_loop.exit();
                    return;
                }

                self.timer.tick();
                if self.timer.ticks().is_multiple_of(FPS_LOG_INTERVAL) {
                    let stats = renderer.stats();
                    debug!(
                        "{} frames, {:.1} fps, {} instances, {} swapchain recreations",
                        stats.frames_rendered,
                        self.timer.average_rate(),
                        stats.instance_count,
                        stats.swapchain_recreations
                    );
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    vkframe_core::init_logging();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!("Starting vkframe");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkerboard_layout() {
        let pixels = checkerboard(16, 4);
        assert_eq!(pixels.len(), 16 * 16 * 4);
        // First cell is light, the next one along X is dark.
        assert_eq!(&pixels[0..4], &[230, 230, 230, 255]);
        let texel = |x: usize, y: usize| &pixels[(y * 16 + x) * 4..(y * 16 + x) * 4 + 4];
        assert_eq!(texel(4, 0), &[40, 40, 40, 255]);
        assert_eq!(texel(4, 4), &[230, 230, 230, 255]);
        assert!(pixels.chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn test_quad_indices_in_range() {
        let (vertices, indices) = quad(Vec3::ZERO);
        assert_eq!(indices.len(), 6);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn test_demo_quads_do_not_overlap() {
        let (left, _) = quad(Vec3::new(-QUAD_OFFSET, 0.0, 0.0));
        let (right, _) = quad(Vec3::new(QUAD_OFFSET, 0.0, 0.0));
        let max_left = left.iter().map(|v| v.position.x).fold(f32::MIN, f32::max);
        let min_right = right.iter().map(|v| v.position.x).fold(f32::MAX, f32::min);
        assert!(max_left < min_right);
    }
}
