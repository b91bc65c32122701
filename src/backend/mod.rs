// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash, one owner per GPU object, released in
// Drop. Pure selection policies live next to the wrappers that use them.

pub mod buffer;
pub mod command;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use surface::Surface;
pub use swapchain::Swapchain;
