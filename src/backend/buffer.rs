// Buffer utilities for vertex, index, uniform and staging buffers
//
// Every buffer lives in host-visible memory (CpuToGpu) so it can be written
// directly from the CPU as well as updated through a command list.

use anyhow::{bail, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

use super::device::GraphicsDevice;
use super::types::BufferUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescription {
    pub size_in_bytes: u64,
    pub usage: BufferUsage,
}

impl BufferDescription {
    pub fn new(size_in_bytes: u64, usage: BufferUsage) -> Self {
        Self {
            size_in_bytes,
            usage,
        }
    }

    fn vk_usage(&self) -> vk::BufferUsageFlags {
        // Any buffer may be the target of a command-list update or the source of a copy
        let mut flags = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
        if self.usage.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.usage.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.usage.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        flags
    }
}

/// Check that `len` bytes at `offset` fit inside a buffer of `size` bytes.
pub(crate) fn check_range(size: u64, offset: u64, len: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => bail!(
            "Write of {} bytes at offset {} overflows buffer of {} bytes",
            len,
            offset,
            size
        ),
    }
}

/// GPU buffer backed by a gpu-allocator allocation.
pub struct DeviceBuffer {
    pub(crate) buffer: vk::Buffer,
    allocation: Mutex<Option<Allocation>>,
    description: BufferDescription,
    device: Arc<GraphicsDevice>,
}

impl DeviceBuffer {
    pub fn new(device: &Arc<GraphicsDevice>, description: &BufferDescription) -> Result<Self> {
        if description.size_in_bytes == 0 {
            bail!("Buffer size must be greater than zero");
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(description.size_in_bytes)
            .usage(description.vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = match device.allocate("buffer", requirements, MemoryLocation::CpuToGpu, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // Bind memory to buffer
        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            device.free(allocation);
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e).context("Failed to bind buffer memory");
        }

        log::debug!(
            "Created buffer: {} bytes, usage {:?}",
            description.size_in_bytes,
            description.usage
        );

        Ok(Self {
            buffer,
            allocation: Mutex::new(Some(allocation)),
            description: *description,
            device: device.clone(),
        })
    }

    pub fn size(&self) -> u64 {
        self.description.size_in_bytes
    }

    pub fn description(&self) -> &BufferDescription {
        &self.description
    }

    /// Copy `bytes` into the mapped allocation at `offset`.
    pub(crate) fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        check_range(self.size(), offset, bytes.len() as u64)?;

        let mut allocation = self.allocation.lock();
        let mapped = allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer memory is not host-mapped")?;

        let start = offset as usize;
        mapped[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.lock().take() {
            self.device.free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_inside_buffer_is_accepted() {
        assert!(check_range(64, 0, 64).is_ok());
        assert!(check_range(64, 48, 16).is_ok());
        assert!(check_range(64, 64, 0).is_ok());
    }

    #[test]
    fn range_past_end_is_rejected() {
        assert!(check_range(64, 60, 8).is_err());
        assert!(check_range(16, u64::MAX, 1).is_err());
    }

    #[test]
    fn every_buffer_is_a_transfer_target() {
        let desc = BufferDescription::new(16, BufferUsage::UNIFORM);
        let usage = desc.vk_usage();
        assert!(usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
    }
}
