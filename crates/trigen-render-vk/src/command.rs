// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::{Device, Queue};
use crate::error::{Check, VkResult};
use crate::sync::Fence;

/// A command pool for one queue family with a fixed set of primary buffers
/// that are reset and re-recorded instead of reallocated.
pub struct CommandRecorder {
    device: Arc<Device>,
    family: u32,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandRecorder {
    pub fn new(device: &Arc<Device>, family: u32, count: usize) -> VkResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe { device.raw().create_command_pool(&pool_info, None) }
            .check("Failed to create command pool")?;
        let mut recorder = Self {
            device: Arc::clone(device),
            family,
            pool,
            buffers: Vec::new(),
        };
        recorder.buffers = recorder.allocate(count)?;
        info!("Created vulkan command pool (family {family}, {count} buffers)");
        Ok(recorder)
    }

    fn allocate(&self, count: usize) -> VkResult<Vec<vk::CommandBuffer>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        unsafe { self.device.raw().allocate_command_buffers(&alloc_info) }
            .check("Failed to allocate command buffers")
    }

    /// Reallocates the buffer set when the count changes. The caller must make
    /// sure none of the current buffers are pending.
    pub fn resize(&mut self, count: usize) -> VkResult<()> {
        if count == self.buffers.len() {
            return Ok(());
        }
        if !self.buffers.is_empty() {
            unsafe { self.device.raw().free_command_buffers(self.pool, &self.buffers) };
            self.buffers.clear();
        }
        self.buffers = self.allocate(count)?;
        debug!("Resized command buffers (family {}) to {count}", self.family);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> vk::CommandBuffer {
        self.buffers[index]
    }

    pub fn reset(&self, index: usize) -> VkResult<()> {
        // SAFETY: the caller waited for the last submission of this buffer.
        unsafe {
            self.device
                .raw()
                .reset_command_buffer(self.buffers[index], vk::CommandBufferResetFlags::empty())
        }
        .check("Failed to reset command buffer")
    }

    pub fn begin(&self, index: usize) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { self.device.raw().begin_command_buffer(self.buffers[index], &info) }
            .check("Failed to begin recording command buffer")
    }

    pub fn end(&self, index: usize) -> VkResult<()> {
        unsafe { self.device.raw().end_command_buffer(self.buffers[index]) }
            .check("Failed to end recording command buffer")
    }

    pub fn record(
        &self,
        index: usize,
        commands: impl FnOnce(&ash::Device, vk::CommandBuffer) -> VkResult<()>,
    ) -> VkResult<()> {
        self.reset(index)?;
        self.begin(index)?;
        commands(self.device.raw(), self.buffers[index])?;
        self.end(index)
    }

    /// Submits buffer `index` on `queue` and signals `fence` when it completes.
    pub fn submit(&self, index: usize, queue: Queue, fence: &Fence) -> VkResult<()> {
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &self.buffers[index],
            ..Default::default()
        };
        unsafe {
            self.device
                .raw()
                .queue_submit(queue.raw, std::slice::from_ref(&submit), fence.raw())
        }
        .check("Failed to submit command buffer")
    }

    /// Records a throwaway buffer, submits it on `queue` and waits for the queue
    /// to go idle. Used for staging uploads during setup.
    pub fn submit_once(
        &self,
        queue: Queue,
        commands: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> VkResult<()> {
        let d = self.device.raw();
        let cmd = self.allocate(1)?[0];
        let result = (|| -> VkResult<()> {
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            unsafe { d.begin_command_buffer(cmd, &begin) }
                .check("Failed to begin one-time command buffer")?;
            commands(d, cmd);
            unsafe { d.end_command_buffer(cmd) }.check("Failed to end one-time command buffer")?;
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            unsafe {
                d.queue_submit(queue.raw, std::slice::from_ref(&submit), vk::Fence::null())
                    .check("Failed to submit one-time command buffer")?;
                d.queue_wait_idle(queue.raw)
                    .check("Failed to wait for queue idle")
            }
        })();
        unsafe { d.free_command_buffers(self.pool, std::slice::from_ref(&cmd)) };
        result
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        debug!("Dropping command pool {:?}", self.pool);
        unsafe {
            if !self.buffers.is_empty() {
                self.device.raw().free_command_buffers(self.pool, &self.buffers);
            }
            self.device.raw().destroy_command_pool(self.pool, None);
        }
    }
}
