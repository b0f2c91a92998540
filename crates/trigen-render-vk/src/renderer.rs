// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use trigen_math::{draw_transform, Projection};
use trigen_render::SceneSettings;

use crate::model::Model;
use crate::pipeline::{DrawPushConstants, MeshPipeline};

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.23, 0.9, 1.0];

pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

pub struct Draw<'a> {
    pub model: &'a dyn Model,
    pub offset: [f32; 3],
}

/// Records the per-frame draw commands for a set of models.
pub struct SceneRenderer {
    pipeline: MeshPipeline,
    scene: SceneSettings,
    clear_color: [f32; 4],
}

impl SceneRenderer {
    pub fn new(pipeline: MeshPipeline, scene: SceneSettings) -> Self {
        Self {
            pipeline,
            scene,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }

    pub fn scene(&self) -> &SceneSettings {
        &self.scene
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    /// Render pass over `framebuffer`, then one indexed draw per entry in `draws`.
    pub fn record(
        &self,
        d: &ash::Device,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        draws: &[Draw<'_>],
    ) {
        let clear = clear_values(self.clear_color);
        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass,
            framebuffer,
            render_area: area,
            clear_value_count: clear.len() as u32,
            p_clear_values: clear.as_ptr(),
            ..Default::default()
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let projection = Projection::new(
            self.scene.fov_y_degrees,
            extent.width,
            extent.height,
            self.scene.z_near,
            self.scene.z_far,
        );

        unsafe {
            d.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
            d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
            d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.raw());

            for draw in draws {
                let model = draw.model;
                d.cmd_bind_vertex_buffers(cmd, 0, &[model.vertex_buffer()], &[model.vertex_offset()]);
                d.cmd_bind_index_buffer(cmd, model.index_buffer(), 0, vk::IndexType::UINT32);
                let push = DrawPushConstants {
                    transform: draw_transform(&projection, draw.offset),
                };
                d.cmd_push_constants(
                    cmd,
                    self.pipeline.layout(),
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&push),
                );
                d.cmd_draw_indexed(cmd, model.index_count(), 1, 0, 0, 0);
            }

            d.cmd_end_render_pass(cmd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_color_then_far_depth() {
        let [color, depth] = clear_values(DEFAULT_CLEAR_COLOR);
        unsafe {
            assert_eq!(color.color.float32, [0.0, 0.23, 0.9, 1.0]);
            assert_eq!(depth.depth_stencil.depth, 1.0);
            assert_eq!(depth.depth_stencil.stencil, 0);
        }
    }
}
