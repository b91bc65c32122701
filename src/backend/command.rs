// Command pool and pre-recorded command buffers
//
// One primary command buffer per swapchain image, recorded once and
// resubmitted every frame until the next swapchain rebuild.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::VulkanDevice;

/// Persistent pool on the graphics family
pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Everything the draw of one frame binds.
#[derive(Debug, Clone, Copy)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub clear_color: [f32; 4],
}

/// A single recorded command, kept as data so the stream can be inspected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawCommand {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    },
    BindPipeline(vk::Pipeline),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    DrawIndexed { index_count: u32 },
    EndRenderPass,
}

/// The command stream for the image behind `framebuffer`.
pub fn frame_commands(framebuffer: vk::Framebuffer, target: &DrawTarget) -> [DrawCommand; 6] {
    [
        DrawCommand::BeginRenderPass {
            render_pass: target.render_pass,
            framebuffer,
            extent: target.extent,
            clear_color: target.clear_color,
        },
        DrawCommand::BindPipeline(target.pipeline),
        DrawCommand::BindVertexBuffer(target.vertex_buffer),
        DrawCommand::BindIndexBuffer(target.index_buffer),
        DrawCommand::DrawIndexed {
            index_count: target.index_count,
        },
        DrawCommand::EndRenderPass,
    ]
}

/// The handles a recorded stream points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReferences {
    pub render_pass: Option<vk::RenderPass>,
    pub framebuffer: Option<vk::Framebuffer>,
    pub pipeline: Option<vk::Pipeline>,
    pub vertex_buffer: Option<vk::Buffer>,
    pub index_buffer: Option<vk::Buffer>,
}

impl StreamReferences {
    pub fn of(commands: &[DrawCommand]) -> Self {
        let mut refs = Self::default();
        for command in commands {
            match *command {
                DrawCommand::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    ..
                } => {
                    refs.render_pass = Some(render_pass);
                    refs.framebuffer = Some(framebuffer);
                }
                DrawCommand::BindPipeline(pipeline) => refs.pipeline = Some(pipeline),
                DrawCommand::BindVertexBuffer(buffer) => refs.vertex_buffer = Some(buffer),
                DrawCommand::BindIndexBuffer(buffer) => refs.index_buffer = Some(buffer),
                DrawCommand::DrawIndexed { .. } | DrawCommand::EndRenderPass => {}
            }
        }
        refs
    }

    /// True when every handle is the one `framebuffer` and `target` supply.
    pub fn matches(&self, framebuffer: vk::Framebuffer, target: &DrawTarget) -> bool {
        *self
            == Self {
                render_pass: Some(target.render_pass),
                framebuffer: Some(framebuffer),
                pipeline: Some(target.pipeline),
                vertex_buffer: Some(target.vertex_buffer),
                index_buffer: Some(target.index_buffer),
            }
    }
}

unsafe fn encode(device: &ash::Device, cmd: vk::CommandBuffer, command: &DrawCommand) {
    match *command {
        DrawCommand::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear_color,
        } => {
            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            }];
            let begin_info = vk::RenderPassBeginInfo::builder()
                .render_pass(render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
        DrawCommand::BindPipeline(pipeline) => {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
        DrawCommand::BindVertexBuffer(buffer) => {
            device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]);
        }
        DrawCommand::BindIndexBuffer(buffer) => {
            device.cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT16);
        }
        DrawCommand::DrawIndexed { index_count } => {
            device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0);
        }
        DrawCommand::EndRenderPass => {
            device.cmd_end_render_pass(cmd);
        }
    }
}

/// Command buffers allocated from a `CommandPool`, freed back to it on drop.
pub struct CommandBuffers {
    pub buffers: Vec<vk::CommandBuffer>,
    /// What each buffer was recorded with, by swapchain image index
    pub recorded: Vec<[DrawCommand; 6]>,
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandBuffers {
    /// Allocate one buffer per framebuffer and record the quad draw into each.
    pub fn record_all(
        device: &Arc<VulkanDevice>,
        pool: &CommandPool,
        framebuffers: &[vk::Framebuffer],
        target: &DrawTarget,
    ) -> Result<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.len() as u32);

        let buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        let mut this = Self {
            buffers,
            recorded: Vec::with_capacity(framebuffers.len()),
            pool: pool.pool,
            device: device.clone(),
        };

        for (&cmd, &framebuffer) in this.buffers.iter().zip(framebuffers) {
            let commands = frame_commands(framebuffer, target);

            unsafe {
                // Resubmitted every frame without re-recording
                let begin_info = vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
                device
                    .device
                    .begin_command_buffer(cmd, &begin_info)
                    .context("Failed to begin command buffer")?;

                for command in &commands {
                    encode(&device.device, cmd, command);
                }

                device
                    .device
                    .end_command_buffer(cmd)
                    .context("Failed to end command buffer")?;
            }

            this.recorded.push(commands);
        }

        log::debug!("Recorded {} command buffers", this.buffers.len());
        Ok(this)
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        unsafe {
            self.device
                .device
                .free_command_buffers(self.pool, &self.buffers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn target(generation: u64) -> DrawTarget {
        DrawTarget {
            render_pass: vk::RenderPass::from_raw(generation * 100 + 1),
            pipeline: vk::Pipeline::from_raw(generation * 100 + 2),
            extent: vk::Extent2D {
                width: 1600,
                height: 900,
            },
            vertex_buffer: vk::Buffer::from_raw(7),
            index_buffer: vk::Buffer::from_raw(8),
            index_count: 6,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    fn framebuffers(generation: u64, count: u64) -> Vec<vk::Framebuffer> {
        (0..count)
            .map(|i| vk::Framebuffer::from_raw(generation * 100 + 10 + i))
            .collect()
    }

    #[test]
    fn stream_is_one_render_pass_with_one_indexed_draw() {
        let fb = vk::Framebuffer::from_raw(42);
        let commands = frame_commands(fb, &target(1));

        assert!(matches!(
            commands.first(),
            Some(DrawCommand::BeginRenderPass { framebuffer, .. }) if *framebuffer == fb
        ));
        assert_eq!(commands.last(), Some(&DrawCommand::EndRenderPass));

        let draws: Vec<_> = commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::DrawIndexed { .. }))
            .collect();
        assert_eq!(draws, vec![&DrawCommand::DrawIndexed { index_count: 6 }]);
    }

    #[test]
    fn geometry_is_bound_before_the_draw() {
        let commands = frame_commands(vk::Framebuffer::from_raw(1), &target(1));
        let position = |wanted: DrawCommand| commands.iter().position(|c| *c == wanted).unwrap();

        let draw = position(DrawCommand::DrawIndexed { index_count: 6 });
        assert!(position(DrawCommand::BindPipeline(vk::Pipeline::from_raw(102))) < draw);
        assert!(position(DrawCommand::BindVertexBuffer(vk::Buffer::from_raw(7))) < draw);
        assert!(position(DrawCommand::BindIndexBuffer(vk::Buffer::from_raw(8))) < draw);
    }

    #[test]
    fn one_stream_per_framebuffer() {
        let target = target(1);
        let streams: Vec<_> = framebuffers(1, 3)
            .into_iter()
            .map(|fb| frame_commands(fb, &target))
            .collect();

        assert_eq!(streams.len(), 3);
        for (i, stream) in streams.iter().enumerate() {
            match stream[0] {
                DrawCommand::BeginRenderPass { framebuffer, .. } => {
                    assert_eq!(framebuffer.as_raw(), 110 + i as u64)
                }
                other => panic!("stream starts with {:?}", other),
            }
        }
    }

    #[test]
    fn references_pick_out_every_bound_handle() {
        let target = target(3);
        let fb = vk::Framebuffer::from_raw(310);
        let refs = StreamReferences::of(&frame_commands(fb, &target));

        assert_eq!(refs.render_pass, Some(target.render_pass));
        assert_eq!(refs.framebuffer, Some(fb));
        assert_eq!(refs.pipeline, Some(target.pipeline));
        assert_eq!(refs.vertex_buffer, Some(target.vertex_buffer));
        assert_eq!(refs.index_buffer, Some(target.index_buffer));
    }

    #[test]
    fn streams_from_another_generation_do_not_match() {
        let old = target(1);
        let new = target(2);
        let old_stream = frame_commands(framebuffers(1, 1)[0], &old);

        let refs = StreamReferences::of(&old_stream);
        assert!(refs.matches(framebuffers(1, 1)[0], &old));
        assert!(!refs.matches(framebuffers(2, 1)[0], &new));
        assert!(!refs.matches(framebuffers(1, 1)[0], &new));
    }
}
