//! Core utilities for vkframe.
//!
//! This crate provides foundational types shared by every other crate:
//! - Error types and result aliases for non-GPU failures
//! - Logging initialization
//! - Engine configuration
//! - Timer utilities

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::{EngineConfig, PresentModePreference, RendererSettings, WindowSettings};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
