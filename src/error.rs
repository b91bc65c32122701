// Renderer error taxonomy
//
// Every variant here is fatal for the current run. The stale-swapchain
// condition is deliberately absent: acquire/present report it as an
// outcome and the frame loop recovers by rebuilding.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("No GPU supports the required extensions and queue families")]
    NoSuitableDevice,

    #[error("No memory type matches type bits {type_bits:#b} with properties {properties:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    #[error("Failed to load shader {path:?}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Graphics pipeline creation failed: {0}")]
    PipelineCreation(vk::Result),
}
