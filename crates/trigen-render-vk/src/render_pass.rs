// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::device::Device;
use crate::error::{Check, VkError, VkResult};
use crate::surface::Surface;

/// Depth formats in order of preference.
pub const DEPTH_FORMATS: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Picks the swapchain color format. A surface that reports a single
/// `UNDEFINED` entry accepts anything, so we take R8G8B8A8_UNORM.
pub fn choose_color_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let fallback = vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    match formats.first() {
        None => fallback,
        Some(f) if f.format == vk::Format::UNDEFINED => fallback,
        Some(&first) => first,
    }
}

/// First entry of [`DEPTH_FORMATS`] whose optimal-tiling features (as reported
/// by `probe`) include depth-stencil attachment.
pub fn choose_depth_format(probe: impl Fn(vk::Format) -> vk::FormatFeatureFlags) -> VkResult<vk::Format> {
    DEPTH_FORMATS
        .into_iter()
        .find(|&f| probe(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
        .ok_or(VkError::NoSupportedDepthFormat)
}

/// Single-subpass pass with one color and one depth attachment.
pub struct RenderPass {
    device: Arc<Device>,
    raw: vk::RenderPass,
    color: vk::SurfaceFormatKHR,
    depth_format: vk::Format,
}

impl RenderPass {
    pub fn new(device: &Arc<Device>, surface: &Surface) -> VkResult<Self> {
        let color = choose_color_format(&surface.formats(device.physical())?);
        let depth_format = choose_depth_format(|f| device.format_properties(f).optimal_tiling_features)?;
        info!("Render pass formats: color {:?}, depth {:?}", color.format, depth_format);

        let attachments = [
            vk::AttachmentDescription {
                format: color.format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: depth_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::CLEAR,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };
        // Attachment writes wait for the acquire semaphore's stage.
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            dst_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let raw = unsafe { device.raw().create_render_pass(&info, None) }
            .check("Failed to create render pass")?;
        info!("Created raster render pass");
        Ok(Self {
            device: Arc::clone(device),
            raw,
            color,
            depth_format,
        })
    }

    pub fn raw(&self) -> vk::RenderPass {
        self.raw
    }

    pub fn color(&self) -> vk::SurfaceFormatKHR {
        self.color
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        info!("Freeing render pass");
        unsafe { self.device.raw().destroy_render_pass(self.raw, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn undefined_surface_format_means_rgba8() {
        let chosen = choose_color_format(&[surface_format(vk::Format::UNDEFINED)]);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(choose_color_format(&[]).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn first_reported_surface_format_wins() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(choose_color_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn depth_preference_order() {
        let all = |_: vk::Format| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(choose_depth_format(all).ok(), Some(vk::Format::D32_SFLOAT_S8_UINT));

        let only_d24 = |f: vk::Format| {
            if f == vk::Format::D24_UNORM_S8_UINT || f == vk::Format::D16_UNORM {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            }
        };
        assert_eq!(choose_depth_format(only_d24).ok(), Some(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn no_depth_format_is_an_error() {
        let none = |_: vk::Format| vk::FormatFeatureFlags::empty();
        assert!(matches!(choose_depth_format(none), Err(VkError::NoSupportedDepthFormat)));
    }
}
