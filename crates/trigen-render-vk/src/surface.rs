// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::khr::surface;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::info;

use crate::error::{Check, VkResult};
use crate::instance::Instance;

pub struct Surface {
    _instance: Arc<Instance>,
    loader: surface::Instance,
    raw: vk::SurfaceKHR,
}

impl Surface {
    /// The window behind `window` must outlive the returned surface.
    pub fn new(
        instance: &Arc<Instance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VkResult<Arc<Self>> {
        let loader = surface::Instance::new(instance.entry(), instance.raw());
        let raw = unsafe {
            ash_window::create_surface(instance.entry(), instance.raw(), display, window, None)
        }
        .check("Failed to create window surface")?;
        info!("Created window surface");
        Ok(Arc::new(Self {
            _instance: Arc::clone(instance),
            loader,
            raw,
        }))
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub fn supports_present(&self, phys: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(phys, family, self.raw)
                .unwrap_or(false)
        }
    }

    pub fn capabilities(&self, phys: vk::PhysicalDevice) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe { self.loader.get_physical_device_surface_capabilities(phys, self.raw) }
            .check("Failed to get physical device surface capabilities")
    }

    pub fn formats(&self, phys: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.loader.get_physical_device_surface_formats(phys, self.raw) }
            .check("Failed to query surface formats")
    }

    pub fn present_modes(&self, phys: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe { self.loader.get_physical_device_surface_present_modes(phys, self.raw) }
            .check("Failed to query surface present modes")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: swapchains hold an `Arc<Surface>`, so none reference it anymore.
        unsafe { self.loader.destroy_surface(self.raw, None) };
    }
}
