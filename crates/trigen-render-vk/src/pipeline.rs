// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::info;

use crate::device::Device;
use crate::error::{Check, VkResult};
use crate::render_pass::RenderPass;
use crate::shader::{ShaderCompiler, ShaderModule};

pub const VERTEX_STRIDE: u32 = 3 * std::mem::size_of::<f32>() as u32;

/// Per-draw data pushed to the vertex stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub transform: [f32; 16],
}

const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<DrawPushConstants>() as u32;

/// Graphics pipeline for position-only indexed meshes.
pub struct MeshPipeline {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
    raw: vk::Pipeline,
}

impl MeshPipeline {
    pub fn new(
        device: &Arc<Device>,
        render_pass: &RenderPass,
        compiler: &ShaderCompiler,
        shader_dir: &Path,
    ) -> VkResult<Self> {
        let d = device.raw();
        let vert = ShaderModule::load(
            device,
            compiler,
            &shader_dir.join("mesh.vert"),
            vk::ShaderStageFlags::VERTEX,
        )?;
        let frag = ShaderModule::load(
            device,
            compiler,
            &shader_dir.join("mesh.frag"),
            vk::ShaderStageFlags::FRAGMENT,
        )?;
        let stages = [vert.stage_info(), frag.stage_info()];

        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        };
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            push_constant_range_count: 1,
            p_push_constant_ranges: &push_range,
            ..Default::default()
        };
        let layout = unsafe { d.create_pipeline_layout(&layout_info, None) }
            .check("Failed to create mesh pipeline layout")?;
        let mut pipeline = Self {
            device: Arc::clone(device),
            layout,
            raw: vk::Pipeline::null(),
        };

        let binding = vk::VertexInputBindingDescription {
            binding: 0,
            stride: VERTEX_STRIDE,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        let attribute = vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        };
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &binding,
            vertex_attribute_description_count: 1,
            p_vertex_attribute_descriptions: &attribute,
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        // Viewport and scissor are dynamic; only the counts matter here.
        let viewport = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        };
        let blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };
        let depth = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: vk::TRUE,
            depth_write_enable: vk::TRUE,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            ..Default::default()
        };
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dynamic_states.len() as u32,
            p_dynamic_states: dynamic_states.as_ptr(),
            ..Default::default()
        };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth,
            p_color_blend_state: &blend,
            p_dynamic_state: &dynamic,
            layout,
            render_pass: render_pass.raw(),
            subpass: 0,
            ..Default::default()
        };
        pipeline.raw = unsafe {
            d.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
        }
        .map_err(|(_, code)| code)
        .check("Failed to create mesh pipeline")?[0];
        info!("Created vulkan graphics pipeline");
        Ok(pipeline)
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for MeshPipeline {
    fn drop(&mut self) {
        info!("Freeing vulkan graphics pipeline");
        unsafe {
            self.device.raw().destroy_pipeline(self.raw, None);
            self.device.raw().destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_are_one_mat4() {
        assert_eq!(PUSH_CONSTANT_SIZE, 64);
        assert_eq!(VERTEX_STRIDE, 12);
        let pc = DrawPushConstants { transform: [1.0; 16] };
        assert_eq!(bytemuck::bytes_of(&pc).len(), 64);
    }
}
