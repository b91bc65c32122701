//! Vulkan renderer that draws a single colored quad.
//!
//! The library holds the renderer core; the `quad-renderer` binary wraps it
//! in a winit window and event loop.

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod renderer;

pub use config::Config;
pub use error::RendererError;
pub use renderer::{FrameStatus, Renderer, SwapchainSnapshot};
