// =============================================================================
// RENDERER - owns every GPU object needed to put the quad on screen
// =============================================================================
//
// OWNERSHIP:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Renderer                                                       │
// │    ├── SwapchainResources   (rebuilt on every resize)           │
// │    │     command buffers → framebuffers → pipeline →            │
// │    │     render pass → swapchain (+ image views)                │
// │    ├── FramesInFlight       (semaphores + fences)               │
// │    ├── GeometryBuffers      (vertex + index, device-local)      │
// │    ├── ShaderStages / CommandPool                               │
// │    └── VulkanDevice → Surface → VulkanInstance                  │
// └─────────────────────────────────────────────────────────────────┘
//
// Fields are declared leaf-first, so dropping the Renderer tears the tree
// down in dependency order once the device is idle.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use crate::backend::buffer::{GpuBuffer, StagingUploader};
use crate::backend::command::{CommandBuffers, CommandPool, DrawCommand, DrawTarget};
use crate::backend::instance::WindowPlatform;
use crate::backend::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use crate::backend::shader::ShaderStages;
use crate::backend::swapchain::presentable_extent;
use crate::backend::sync::FramesInFlight;
use crate::backend::{Surface, Swapchain, VulkanDevice, VulkanInstance};
use crate::config::Config;
use crate::frame::{FrameEvent, FrameLoop, FrameState};
use crate::geometry::{Vertex, QUAD_INDICES, QUAD_VERTICES};

/// What a call to [`Renderer::draw_frame`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Nothing was submitted: the swapchain is stale or the window has no area.
    Skipped,
}

/// Handles of the current swapchain generation.
#[derive(Debug, Clone)]
pub struct SwapchainSnapshot {
    pub generation: u64,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub image_count: usize,
    pub framebuffers: Vec<vk::Framebuffer>,
    /// What every command buffer of this generation was recorded against
    pub target: DrawTarget,
}

/// Everything whose shape depends on the swapchain. Field order is the
/// teardown order.
struct SwapchainResources {
    command_buffers: CommandBuffers,
    framebuffers: Framebuffers,
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    swapchain: Swapchain,
    target: DrawTarget,
}

impl SwapchainResources {
    /// Destroy everything except the swapchain handle itself, which is
    /// handed back so the successor can be created from it.
    fn retire(self) -> Swapchain {
        let SwapchainResources {
            command_buffers,
            framebuffers,
            pipeline,
            render_pass,
            mut swapchain,
            ..
        } = self;

        drop(command_buffers);
        drop(framebuffers);
        drop(pipeline);
        drop(render_pass);
        swapchain.destroy_image_views();
        swapchain
    }
}

/// Device-local quad geometry. Survives swapchain rebuilds.
struct GeometryBuffers {
    vertex: GpuBuffer,
    index: GpuBuffer,
    index_count: u32,
}

impl GeometryBuffers {
    fn upload(device: &Arc<VulkanDevice>) -> Result<Self> {
        let uploader = StagingUploader::new(device)?;

        let vertex = uploader
            .upload(
                vk::BufferUsageFlags::VERTEX_BUFFER,
                bytemuck::cast_slice::<Vertex, u8>(&QUAD_VERTICES),
            )
            .context("Failed to upload vertex buffer")?;
        let index = uploader
            .upload(
                vk::BufferUsageFlags::INDEX_BUFFER,
                bytemuck::cast_slice::<u16, u8>(&QUAD_INDICES),
            )
            .context("Failed to upload index buffer")?;

        Ok(Self {
            vertex,
            index,
            index_count: QUAD_INDICES.len() as u32,
        })
    }
}

pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // PER-SWAPCHAIN (None until built, or while the window has no area)
    // ─────────────────────────────────────────────────────────────────────────
    targets: Option<SwapchainResources>,

    // ─────────────────────────────────────────────────────────────────────────
    // LONG-LIVED GPU OBJECTS
    // ─────────────────────────────────────────────────────────────────────────
    frames: FramesInFlight,
    geometry: GeometryBuffers,
    shaders: ShaderStages,
    command_pool: CommandPool,
    device: Arc<VulkanDevice>,
    surface: Surface,
    _instance: Arc<VulkanInstance>,

    // ─────────────────────────────────────────────────────────────────────────
    // HOST STATE
    // ─────────────────────────────────────────────────────────────────────────
    frame_loop: FrameLoop,
    drawable: vk::Extent2D,
    generation: u64,
    preferred_present_mode: vk::PresentModeKHR,
    acquire_timeout: u64,
    clear_color: [f32; 4],
    /// Pre-allocated so the submit path stays allocation-free
    wait_stages: [vk::PipelineStageFlags; 1],
}

impl Renderer {
    /// Build the full renderer for `window`, whose drawable area is
    /// `width` x `height` pixels.
    pub fn new<W>(config: &Config, window: &W, width: u32, height: u32) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Initializing Vulkan...");

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let platform = WindowPlatform::from_display_handle(display_handle)?;
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let instance = VulkanInstance::new(&config.window.title, Some(platform), enable_validation)?;

        let surface = Surface::new(instance.clone(), display_handle, window_handle)?;
        let device = VulkanDevice::new(instance.clone(), Some(&surface))?;

        let shaders = ShaderStages::load(&device, &config.shaders.vertex, &config.shaders.fragment)?;
        let geometry = GeometryBuffers::upload(&device)?;
        let command_pool = CommandPool::new(&device)?;
        let frames = FramesInFlight::new(&device, config.frames_in_flight())?;
        log::info!("{} frame(s) in flight", frames.len());

        let mut renderer = Self {
            targets: None,
            frames,
            geometry,
            shaders,
            command_pool,
            device,
            surface,
            _instance: instance,
            frame_loop: FrameLoop::new(),
            drawable: vk::Extent2D { width, height },
            generation: 0,
            preferred_present_mode: config.preferred_present_mode(),
            acquire_timeout: config.graphics.acquire_timeout_ns,
            clear_color: config.graphics.clear_color,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        };

        // The first build goes through the same path as every later resize.
        renderer.frame_loop.request_resize();
        renderer.rebuild()?;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn frame_state(&self) -> FrameState {
        self.frame_loop.state()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frame_loop.frames_presented()
    }

    /// Number of swapchains built so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current swapchain extent, if one exists.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.targets.as_ref().map(|t| t.swapchain.extent)
    }

    pub fn swapchain_snapshot(&self) -> Option<SwapchainSnapshot> {
        self.targets.as_ref().map(|t| SwapchainSnapshot {
            generation: self.generation,
            extent: t.swapchain.extent,
            format: t.swapchain.format,
            image_count: t.swapchain.images.len(),
            framebuffers: t.framebuffers.framebuffers.clone(),
            target: t.target,
        })
    }

    /// The command stream behind each swapchain image, by image index.
    pub fn recorded_streams(&self) -> &[[DrawCommand; 6]] {
        self.targets
            .as_ref()
            .map_or(&[], |t| t.command_buffers.recorded.as_slice())
    }

    /// Record a new drawable size. The swapchain is rebuilt at the start of
    /// the next frame.
    pub fn resized(&mut self, width: u32, height: u32) {
        log::debug!("Window resized to {}x{}", width, height);
        self.drawable = vk::Extent2D { width, height };
        self.frame_loop.request_resize();
    }

    /// Tear down and recreate everything that depends on the swapchain.
    ///
    /// Returns `false` when the window or the surface has no area; the
    /// rebuild stays pending until a non-zero size arrives.
    pub fn rebuild(&mut self) -> Result<bool> {
        let capabilities = self
            .surface
            .query_support(self.device.physical_device)?
            .capabilities;
        if presentable_extent(&capabilities, self.drawable).is_none() {
            log::debug!("Window has no area, deferring swapchain rebuild");
            return Ok(false);
        }

        // Nothing below may still be referenced by queued GPU work.
        self.device.wait_idle()?;

        let previous = self.targets.take().map(SwapchainResources::retire);

        let swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            self.drawable,
            self.preferred_present_mode,
            previous.as_ref(),
        )?;
        drop(previous);

        let render_pass = RenderPass::new(&self.device, swapchain.format)?;
        let pipeline = GraphicsPipeline::new(
            &self.device,
            &render_pass,
            swapchain.extent,
            &self.shaders,
            &Vertex::layout(),
        )?;
        let framebuffers = Framebuffers::new(
            &self.device,
            &swapchain.image_views,
            &render_pass,
            swapchain.extent,
        )?;

        let target = DrawTarget {
            render_pass: render_pass.render_pass,
            pipeline: pipeline.pipeline,
            extent: swapchain.extent,
            vertex_buffer: self.geometry.vertex.buffer,
            index_buffer: self.geometry.index.buffer,
            index_count: self.geometry.index_count,
            clear_color: self.clear_color,
        };
        let command_buffers = CommandBuffers::record_all(
            &self.device,
            &self.command_pool,
            &framebuffers.framebuffers,
            &target,
        )?;

        self.targets = Some(SwapchainResources {
            command_buffers,
            framebuffers,
            pipeline,
            render_pass,
            swapchain,
            target,
        });
        self.generation += 1;
        log::info!("Swapchain generation {} ready", self.generation);

        if self.frame_loop.needs_rebuild() {
            self.frame_loop.advance(FrameEvent::Rebuilt)?;
        }
        Ok(true)
    }

    /// Run one tick of the frame loop: rebuild if pending, then acquire,
    /// submit and present.
    pub fn draw_frame(&mut self) -> Result<FrameStatus> {
        if self.frame_loop.needs_rebuild() && !self.rebuild()? {
            return Ok(FrameStatus::Skipped);
        }

        let targets = self
            .targets
            .as_ref()
            .context("Swapchain not initialized")?;
        let sync = self.frames.current();

        self.frame_loop.advance(FrameEvent::Begin)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until this slot's previous submission has finished
        // ─────────────────────────────────────────────────────────────────────
        sync.wait(&self.device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let outcome = targets
            .swapchain
            .acquire_next_image(self.acquire_timeout, sync.image_available)?;

        let image_index = match self.frame_loop.advance(FrameEvent::Acquire(outcome))? {
            FrameState::ImageAcquired { image_index, .. } => image_index,
            _ => {
                log::debug!("Swapchain out of date, skipping frame");
                return Ok(FrameStatus::Skipped);
            }
        };

        // Only reset once we know a submission will signal it again.
        sync.reset(&self.device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Submit the pre-recorded command buffer
        // ─────────────────────────────────────────────────────────────────────
        let command_buffers = [targets.command_buffers.buffers[image_index as usize]];
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")?;
        self.frame_loop.advance(FrameEvent::Submit)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Present
        // ─────────────────────────────────────────────────────────────────────
        let presented = targets.swapchain.present(
            self.device.present_queue,
            image_index,
            &signal_semaphores,
        )?;
        self.frame_loop.advance(FrameEvent::Present(presented))?;
        let state = self.frame_loop.advance(FrameEvent::End)?;
        log::trace!("Frame on image {} ended in {:?}", image_index, state);

        self.frames.advance();
        Ok(FrameStatus::Presented)
    }

    /// Wait for the GPU and release every swapchain-dependent object.
    /// Long-lived objects go when the renderer is dropped.
    pub fn teardown(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        self.targets = None;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Err(e) = self.teardown() {
            log::error!("Teardown failed: {:?}", e);
        }
        // Remaining fields drop in declaration order.
    }
}
