// Buffer utilities for vertex and index buffers
//
// Provides helpers for creating GPU-accessible memory buffers and for moving
// bytes between host and device-local memory through a staging buffer.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::VulkanDevice;
use crate::error::RendererError;

/// Find the lowest memory type index allowed by `type_bits` whose property
/// flags include every flag in `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, RendererError> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let allowed = type_bits & (1 << i) != 0;
            allowed
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(RendererError::NoCompatibleMemoryType {
            type_bits,
            properties,
        })
}

/// A buffer and the memory bound to it at offset 0. Both are released on drop.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    /// Create a buffer with specified usage and memory properties.
    ///
    /// `sharing_families` lists the queue families that will touch the
    /// buffer; with more than one distinct family the buffer is shared
    /// concurrently.
    pub fn new(
        device: &Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
        sharing_families: &[u32],
    ) -> Result<Self> {
        let mut buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        if sharing_families.len() > 1 {
            buffer_info = buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(sharing_families);
        }

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            memory_properties,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(anyhow::Error::new(e).context("Failed to allocate buffer memory"));
            }
        };

        // From here on Drop owns both handles.
        let gpu_buffer = Self {
            buffer,
            memory,
            size,
            device: device.clone(),
        };

        unsafe { device.device.bind_buffer_memory(buffer, memory, 0) }
            .context("Failed to bind buffer memory")?;

        Ok(gpu_buffer)
    }

    /// Host-visible + host-coherent buffer for CPU access.
    fn staging(device: &Arc<VulkanDevice>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Self> {
        Self::new(
            device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            &[],
        )
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() as vk::DeviceSize <= self.size);
        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())?
                as *mut u8;
            ptr.copy_from_nonoverlapping(data.as_ptr(), data.len());
            self.device.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.size as usize];
        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())?
                as *const u8;
            ptr.copy_to_nonoverlapping(out.as_mut_ptr(), out.len());
            self.device.device.unmap_memory(self.memory);
        }
        Ok(out)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// One-shot copies on the transfer queue.
///
/// Every call blocks until the transfer queue is idle, so the destination
/// is complete when it returns.
pub struct StagingUploader {
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl StagingUploader {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.transfer)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create transfer command pool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    /// Copy `data` into a new device-local buffer with `usage | TRANSFER_DST`.
    /// The staging buffer is gone by the time this returns.
    pub fn upload(&self, usage: vk::BufferUsageFlags, data: &[u8]) -> Result<GpuBuffer> {
        let size = data.len() as vk::DeviceSize;

        let staging = GpuBuffer::staging(&self.device, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(data)?;

        let families = self.sharing_families();
        let destination = GpuBuffer::new(
            &self.device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            &families,
        )?;

        self.copy(&staging, &destination, size)?;
        log::debug!("Uploaded {} bytes ({:?})", size, usage);

        Ok(destination)
    }

    /// Read a buffer's contents back to the host. The source needs
    /// `TRANSFER_SRC` usage.
    pub fn download(&self, source: &GpuBuffer) -> Result<Vec<u8>> {
        let staging =
            GpuBuffer::staging(&self.device, source.size, vk::BufferUsageFlags::TRANSFER_DST)?;
        self.copy(source, &staging, source.size)?;
        staging.read()
    }

    fn copy(&self, src: &GpuBuffer, dst: &GpuBuffer, size: vk::DeviceSize) -> Result<()> {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }?[0];

        let record_and_submit = || -> ash::prelude::VkResult<()> {
            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                device.begin_command_buffer(cmd, &begin_info)?;

                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };
                device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]);
                device.end_command_buffer(cmd)?;

                let command_buffers = [cmd];
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                device.queue_submit(
                    self.device.transfer_queue,
                    &[submit_info.build()],
                    vk::Fence::null(),
                )?;
                device.queue_wait_idle(self.device.transfer_queue)
            }
        };
        let result = record_and_submit();

        unsafe { device.free_command_buffers(self.pool, &[cmd]) };
        result.context("Staging copy failed")
    }

    fn sharing_families(&self) -> Vec<u32> {
        let families = self.device.queue_families;
        let mut indices = vec![families.graphics];
        if families.transfer != families.graphics {
            indices.push(families.transfer);
        }
        indices
    }
}

impl Drop for StagingUploader {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        props
    }

    const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn first_match_wins() {
        let props = memory_properties(&[DEVICE_LOCAL, HOST, HOST | DEVICE_LOCAL]);
        assert_eq!(find_memory_type(&props, 0b111, HOST).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b111, DEVICE_LOCAL).unwrap(), 0);
    }

    #[test]
    fn type_bits_mask_out_candidates() {
        let props = memory_properties(&[DEVICE_LOCAL, HOST, HOST | DEVICE_LOCAL]);
        assert_eq!(find_memory_type(&props, 0b100, HOST).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b110, DEVICE_LOCAL).unwrap(), 2);
    }

    #[test]
    fn properties_must_be_a_superset() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE, HOST]);
        assert_eq!(find_memory_type(&props, 0b11, HOST).unwrap(), 1);
    }

    #[test]
    fn repeated_lookups_are_deterministic() {
        let props = memory_properties(&[HOST, DEVICE_LOCAL, DEVICE_LOCAL, HOST]);
        let first = find_memory_type(&props, 0b1110, DEVICE_LOCAL).unwrap();
        for _ in 0..16 {
            assert_eq!(find_memory_type(&props, 0b1110, DEVICE_LOCAL).unwrap(), first);
        }
        assert_eq!(first, 1);
    }

    #[test]
    fn no_match_reports_the_request() {
        let props = memory_properties(&[DEVICE_LOCAL]);
        match find_memory_type(&props, 0b1, HOST) {
            Err(RendererError::NoCompatibleMemoryType {
                type_bits,
                properties,
            }) => {
                assert_eq!(type_bits, 0b1);
                assert_eq!(properties, HOST);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn types_beyond_count_are_ignored() {
        let mut props = memory_properties(&[DEVICE_LOCAL]);
        props.memory_types[1].property_flags = HOST;
        assert!(find_memory_type(&props, 0b11, HOST).is_err());
    }
}
