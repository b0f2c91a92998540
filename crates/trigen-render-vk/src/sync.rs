// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{Check, VkResult};

pub struct Fence {
    device: Arc<Device>,
    raw: vk::Fence,
}

impl Fence {
    pub fn new(device: &Arc<Device>, signaled: bool) -> VkResult<Self> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        let raw = unsafe { device.raw().create_fence(&info, None) }.check("Failed to create fence")?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn raw(&self) -> vk::Fence {
        self.raw
    }

    /// Blocks without a timeout.
    pub fn wait(&self) -> VkResult<()> {
        unsafe { self.device.raw().wait_for_fences(&[self.raw], true, u64::MAX) }
            .check("Failed to wait for fence")
    }

    pub fn reset(&self) -> VkResult<()> {
        // SAFETY: callers only reset fences that are not pending.
        unsafe { self.device.raw().reset_fences(&[self.raw]) }.check("Failed to reset fence")
    }

    pub fn wait_and_reset(&self) -> VkResult<()> {
        self.wait()?;
        self.reset()
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        debug!("Dropping fence {:?}", self.raw);
        unsafe { self.device.raw().destroy_fence(self.raw, None) };
    }
}

pub struct Semaphore {
    device: Arc<Device>,
    raw: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: &Arc<Device>) -> VkResult<Self> {
        let info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        let raw = unsafe { device.raw().create_semaphore(&info, None) }
            .check("Failed to create semaphore")?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_semaphore(self.raw, None) };
    }
}
