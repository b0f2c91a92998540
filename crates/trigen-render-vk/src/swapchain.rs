// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::khr::swapchain;
use ash::vk;
use tracing::{debug, info};

use trigen_render::{PresentMode, RenderSize};

use crate::device::{Device, Queue};
use crate::error::{Check, VkError, VkResult};
use crate::frame::FrameSync;
use crate::memory::Image;
use crate::render_pass::RenderPass;
use crate::surface::Surface;

/// One more than the minimum, capped by the maximum unless the surface has none.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

/// The requested framebuffer size clamped per axis into the surface limits.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: want.width.max(min.width).min(max.width.max(min.width)),
        height: want.height.max(min.height).min(max.height.max(min.height)),
    }
}

pub fn present_mode_khr(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
    }
}

/// The preferred mode if offered, else FIFO which every surface supports.
pub fn choose_present_mode(available: &[vk::PresentModeKHR], preferred: PresentMode) -> vk::PresentModeKHR {
    let wanted = present_mode_khr(preferred);
    if available.contains(&wanted) {
        wanted
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Whatever the surface currently applies, so the compositor has nothing to rotate.
pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    caps.current_transform
}

/// `Some(index)` for a usable image, `None` when the swapchain must be rebuilt first.
pub fn acquire_outcome(result: Result<(u32, bool), vk::Result>) -> VkResult<Option<u32>> {
    match result {
        Ok((index, _suboptimal)) => Ok(Some(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
        Err(code) => Err(VkError::OperationFailed {
            code,
            context: "Failed to acquire swapchain image",
        }),
    }
}

/// `true` when the swapchain no longer matches the surface.
pub fn present_outcome(result: Result<bool, vk::Result>) -> VkResult<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(code) => Err(VkError::OperationFailed {
            code,
            context: "Failed to present swapchain image",
        }),
    }
}

/// Per-chain resources; rebuilt as a unit.
struct Chain {
    raw: vk::SwapchainKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    depth: Option<Image>,
}

impl Chain {
    fn empty(raw: vk::SwapchainKHR, extent: vk::Extent2D) -> Self {
        Self {
            raw,
            extent,
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            depth: None,
        }
    }

    /// Destroys framebuffers, depth, color views and the swapchain, in that order.
    fn destroy(&mut self, d: &ash::Device, loader: &swapchain::Device) {
        // SAFETY: callers wait for the device to go idle before tearing a chain down.
        unsafe {
            for fb in self.framebuffers.drain(..) {
                d.destroy_framebuffer(fb, None);
            }
            self.depth = None;
            for view in self.views.drain(..) {
                d.destroy_image_view(view, None);
            }
            if self.raw != vk::SwapchainKHR::null() {
                loader.destroy_swapchain(self.raw, None);
                self.raw = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}

/// The presentable images plus everything sized to them: color views,
/// a shared depth image and one framebuffer per image.
pub struct Swapchain {
    device: Arc<Device>,
    surface: Arc<Surface>,
    loader: swapchain::Device,
    preferred: PresentMode,
    chain: Chain,
}

impl Swapchain {
    pub fn new(
        device: &Arc<Device>,
        surface: &Arc<Surface>,
        render_pass: &RenderPass,
        size: RenderSize,
        preferred: PresentMode,
    ) -> VkResult<Self> {
        let loader = swapchain::Device::new(device.instance().raw(), device.raw());
        let mut swapchain = Self {
            device: Arc::clone(device),
            surface: Arc::clone(surface),
            loader,
            preferred,
            chain: Chain::empty(vk::SwapchainKHR::null(), vk::Extent2D::default()),
        };
        swapchain.chain = swapchain.build(render_pass, size, vk::SwapchainKHR::null())?;
        info!(
            "Created swapchain {}x{} with {} images",
            swapchain.chain.extent.width,
            swapchain.chain.extent.height,
            swapchain.chain.images.len()
        );
        Ok(swapchain)
    }

    /// Rebuilds for `size`. Waits for the device, hands the old handle to the
    /// new swapchain, then destroys every old per-image resource.
    pub fn recreate(&mut self, render_pass: &RenderPass, size: RenderSize) -> VkResult<()> {
        self.device.wait_idle()?;
        let fresh = self.build(render_pass, size, self.chain.raw)?;
        let mut old = std::mem::replace(&mut self.chain, fresh);
        old.destroy(self.device.raw(), &self.loader);
        info!(
            "Recreated swapchain {}x{} with {} images",
            self.chain.extent.width,
            self.chain.extent.height,
            self.chain.images.len()
        );
        Ok(())
    }

    fn build(&self, render_pass: &RenderPass, size: RenderSize, old: vk::SwapchainKHR) -> VkResult<Chain> {
        let phys = self.device.physical();
        let caps = self.surface.capabilities(phys)?;
        let modes = self.surface.present_modes(phys)?;
        let color = render_pass.color();
        let extent = choose_extent(&caps, size);
        let present_mode = choose_present_mode(&modes, self.preferred);
        let pre_transform = choose_pre_transform(&caps);
        debug!("Swapchain present mode {present_mode:?}, transform {pre_transform:?}");

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface.raw(),
            min_image_count: choose_image_count(&caps),
            image_format: color.format,
            image_color_space: color.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };
        let d = self.device.raw();
        let raw = unsafe { self.loader.create_swapchain(&info, None) }
            .check("Failed to create swapchain")?;

        // From here on `chain` owns what has been created so an error unwinds it.
        let mut chain = Chain::empty(raw, extent);
        let filled = (|| -> VkResult<()> {
            chain.images = unsafe { self.loader.get_swapchain_images(raw) }
                .check("Failed to get swapchain images")?;
            for &image in &chain.images {
                let view_info = vk::ImageViewCreateInfo {
                    s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                    image,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: color.format,
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                let view = unsafe { d.create_image_view(&view_info, None) }
                    .check("Failed to create swapchain image view")?;
                chain.views.push(view);
            }

            let depth = Image::depth_attachment(&self.device, extent, render_pass.depth_format())?;
            let depth_view = depth.view();
            chain.depth = Some(depth);

            for &view in &chain.views {
                let attachments = [view, depth_view];
                let fb_info = vk::FramebufferCreateInfo {
                    s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                    render_pass: render_pass.raw(),
                    attachment_count: attachments.len() as u32,
                    p_attachments: attachments.as_ptr(),
                    width: extent.width,
                    height: extent.height,
                    layers: 1,
                    ..Default::default()
                };
                let fb = unsafe { d.create_framebuffer(&fb_info, None) }
                    .check("Failed to create framebuffer")?;
                chain.framebuffers.push(fb);
            }
            Ok(())
        })();
        if let Err(e) = filled {
            chain.destroy(d, &self.loader);
            return Err(e);
        }
        Ok(chain)
    }

    /// Blocks until an image is available and signals `semaphore` for it.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> VkResult<Option<u32>> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.chain.raw, u64::MAX, semaphore, vk::Fence::null())
        };
        acquire_outcome(result)
    }

    /// Submits `cmd` for `image_index` and presents it. Returns `true` when the
    /// swapchain must be rebuilt.
    pub fn submit_and_present(
        &self,
        queue: Queue,
        cmd: vk::CommandBuffer,
        sync: &FrameSync,
        image_index: u32,
        wait_idle: bool,
    ) -> VkResult<bool> {
        let d = self.device.raw();
        let wait_semaphores = [sync.image_acquired.raw()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_complete.raw()];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: signal_semaphores.as_ptr(),
            ..Default::default()
        };
        // SAFETY: `cmd` finished recording and the slot fence was reset by the director.
        unsafe { d.queue_submit(queue.raw, std::slice::from_ref(&submit), sync.render_fence.raw()) }
            .check("Failed to submit draw command buffer")?;
        if wait_idle {
            unsafe { d.queue_wait_idle(queue.raw) }.check("Failed to wait for graphics queue")?;
        }

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: signal_semaphores.as_ptr(),
            swapchain_count: 1,
            p_swapchains: &self.chain.raw,
            p_image_indices: &image_index,
            ..Default::default()
        };
        present_outcome(unsafe { self.loader.queue_present(queue.raw, &present) })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent
    }

    pub fn image_count(&self) -> usize {
        self.chain.images.len()
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.chain.framebuffers[image_index as usize]
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        info!("Freeing swapchain");
        self.chain.destroy(self.device.raw(), &self.loader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    #[test]
    fn unbounded_surface_gets_min_plus_one() {
        let c = caps(2, 0);
        assert_eq!(choose_image_count(&c), 3);
        let extent = choose_extent(&c, RenderSize { width: 1024, height: 768 });
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn image_count_respects_max() {
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(1, 2)), 2);
    }

    #[test]
    fn extent_is_clamped_per_axis() {
        let mut c = caps(2, 0);
        c.min_image_extent = vk::Extent2D { width: 64, height: 64 };
        c.max_image_extent = vk::Extent2D { width: 800, height: 600 };
        let big = choose_extent(&c, RenderSize { width: 1920, height: 100 });
        assert_eq!((big.width, big.height), (800, 100));
        let small = choose_extent(&c, RenderSize { width: 10, height: 1080 });
        assert_eq!((small.width, small.height), (64, 600));
    }

    #[test]
    fn pre_transform_follows_current_transform() {
        let mut c = caps(2, 0);
        c.supported_transforms =
            vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90;
        c.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_pre_transform(&c), vk::SurfaceTransformFlagsKHR::ROTATE_90);

        c.current_transform = vk::SurfaceTransformFlagsKHR::IDENTITY;
        assert_eq!(choose_pre_transform(&c), vk::SurfaceTransformFlagsKHR::IDENTITY);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, PresentMode::Mailbox), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, PresentMode::Immediate), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[], PresentMode::Fifo), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn out_of_date_present_requests_rebuild() {
        assert!(present_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());
        assert!(present_outcome(Ok(true)).unwrap());
        assert!(!present_outcome(Ok(false)).unwrap());
    }

    #[test]
    fn other_present_errors_are_fatal() {
        for code in [vk::Result::ERROR_DEVICE_LOST, vk::Result::ERROR_SURFACE_LOST_KHR] {
            assert!(matches!(
                present_outcome(Err(code)),
                Err(VkError::OperationFailed { code: c, .. }) if c == code
            ));
        }
    }

    #[test]
    fn out_of_date_acquire_skips_the_frame() {
        assert_eq!(acquire_outcome(Ok((2, false))).unwrap(), Some(2));
        assert_eq!(acquire_outcome(Ok((0, true))).unwrap(), Some(0));
        assert_eq!(acquire_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(), None);
        assert!(acquire_outcome(Err(vk::Result::TIMEOUT)).is_err());
    }
}
