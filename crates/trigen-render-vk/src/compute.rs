// SPDX-License-Identifier: CEPL-1.0
//! One-shot compute stage.
//!
//! Random points go into a host-visible storage buffer, `compute.comp` turns
//! each point into one triangle, and the vertex and index outputs stay in
//! device-local memory as a [`ComputeModel`] for the rest of the run.
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use trigen_render::ComputeSettings;

use crate::command::CommandRecorder;
use crate::device::Device;
use crate::error::{Check, VkError, VkResult};
use crate::memory::{Buffer, Sharing};
use crate::model::ComputeModel;
use crate::shader::{ShaderCompiler, ShaderModule};
use crate::sync::Fence;

const FLOAT: u64 = std::mem::size_of::<f32>() as u64;
const INDEX: u64 = std::mem::size_of::<u32>() as u64;

/// Largest point count whose index count still fits a `u32`.
pub const MAX_POINTS: u32 = u32::MAX / 3;

/// Byte sizes of the compute buffers for a given point count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputeSizes {
    pub point_count: u32,
    pub input_bytes: vk::DeviceSize,
    pub vertex_bytes: vk::DeviceSize,
    pub index_bytes: vk::DeviceSize,
    pub index_count: u32,
}

impl ComputeSizes {
    pub fn for_points(point_count: u32) -> VkResult<Self> {
        let index_count = point_count.checked_mul(3).ok_or(VkError::TooManyPoints {
            requested: point_count,
            max: MAX_POINTS,
        })?;
        let n = u64::from(point_count);
        Ok(Self {
            point_count,
            input_bytes: n * 3 * FLOAT,
            vertex_bytes: n * 3 * 3 * FLOAT,
            index_bytes: n * 3 * INDEX,
            index_count,
        })
    }
}

/// One workgroup per point, so the count is bounded by the device's
/// x-dimension workgroup limit.
pub fn check_dispatch(point_count: u32, max_groups: u32) -> VkResult<()> {
    if point_count > max_groups {
        return Err(VkError::TooManyPoints {
            requested: point_count,
            max: max_groups,
        });
    }
    Ok(())
}

/// `count` points as packed xyz floats, each coordinate a whole number in
/// `[-scale, scale)`. A fixed `seed` gives the same cloud every run.
pub fn generate_points(count: u32, scale: u32, seed: Option<u64>) -> Vec<f32> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let scale = i64::from(scale);
    (0..u64::from(count) * 3)
        .map(|_| {
            if scale == 0 {
                0.0
            } else {
                rng.gen_range(-scale..scale) as f32
            }
        })
        .collect()
}

struct ComputePipeline {
    device: Arc<Device>,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    raw: vk::Pipeline,
}

impl ComputePipeline {
    fn new(device: &Arc<Device>, module: &ShaderModule) -> VkResult<Self> {
        let d = device.raw();
        let bindings: [vk::DescriptorSetLayoutBinding; 3] =
            std::array::from_fn(|i| vk::DescriptorSetLayoutBinding {
                binding: i as u32,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                ..Default::default()
            });
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        let set_layout = unsafe { d.create_descriptor_set_layout(&set_layout_info, None) }
            .check("Failed to create compute descriptor set layout")?;

        // Built up in place so every early return below cleans up through Drop.
        let mut pipeline = Self {
            device: Arc::clone(device),
            set_layout,
            layout: vk::PipelineLayout::null(),
            raw: vk::Pipeline::null(),
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &pipeline.set_layout,
            ..Default::default()
        };
        pipeline.layout = unsafe { d.create_pipeline_layout(&layout_info, None) }
            .check("Failed to create compute pipeline layout")?;

        let info = vk::ComputePipelineCreateInfo {
            s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
            stage: module.stage_info(),
            layout: pipeline.layout,
            ..Default::default()
        };
        pipeline.raw = unsafe {
            d.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
        }
        .map_err(|(_, code)| code)
        .check("Failed to create compute pipeline")?[0];

        info!("Created vulkan compute pipeline");
        Ok(pipeline)
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        info!("Freeing vulkan compute pipeline");
        unsafe {
            let d = self.device.raw();
            d.destroy_pipeline(self.raw, None);
            d.destroy_pipeline_layout(self.layout, None);
            d.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Descriptor pool holding the single set that binds the three buffers.
struct ComputeDescriptors {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

impl ComputeDescriptors {
    fn new(device: &Arc<Device>, layout: vk::DescriptorSetLayout, buffers: [&Buffer; 3]) -> VkResult<Self> {
        let d = device.raw();
        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: buffers.len() as u32,
        };
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: 1,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        let pool = unsafe { d.create_descriptor_pool(&pool_info, None) }
            .check("Failed to create compute descriptor pool")?;
        let mut descriptors = Self {
            device: Arc::clone(device),
            pool,
            set: vk::DescriptorSet::null(),
        };

        let alloc_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: 1,
            p_set_layouts: &layout,
            ..Default::default()
        };
        descriptors.set = unsafe { d.allocate_descriptor_sets(&alloc_info) }
            .check("Failed to allocate compute descriptor set")?[0];

        let infos = buffers.map(|b| vk::DescriptorBufferInfo {
            buffer: b.raw(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        });
        let writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .enumerate()
            .map(|(i, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: descriptors.set,
                dst_binding: i as u32,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        unsafe { d.update_descriptor_sets(&writes, &[]) };
        Ok(descriptors)
    }
}

impl Drop for ComputeDescriptors {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_descriptor_pool(self.pool, None) };
    }
}

/// Generates the point cloud, runs `compute.comp` over it once and waits for
/// the result. Everything except the two output buffers is released on return.
pub fn run_once(
    device: &Arc<Device>,
    compiler: &ShaderCompiler,
    shader_dir: &Path,
    settings: &ComputeSettings,
) -> VkResult<ComputeModel> {
    let sizes = ComputeSizes::for_points(settings.point_count)?;
    check_dispatch(
        sizes.point_count,
        device.properties().limits.max_compute_work_group_count[0],
    )?;
    info!(
        "Running compute stage over {} points (scale {})",
        sizes.point_count, settings.scale
    );

    let points = generate_points(settings.point_count, settings.scale, settings.seed);
    let input = Buffer::with_data(
        device,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        bytemuck::cast_slice(&points),
        Sharing::GraphicsAndCompute,
    )?;
    let vertices = Buffer::new(
        device,
        sizes.vertex_bytes,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        Sharing::GraphicsAndCompute,
    )?;
    let indices = Buffer::new(
        device,
        sizes.index_bytes,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDEX_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        Sharing::GraphicsAndCompute,
    )?;
    debug!(
        "Compute buffers: input {} B, vertices {} B, indices {} B",
        input.size(),
        vertices.size(),
        indices.size()
    );

    let module = ShaderModule::load(
        device,
        compiler,
        &shader_dir.join("compute.comp"),
        vk::ShaderStageFlags::COMPUTE,
    )?;
    let pipeline = ComputePipeline::new(device, &module)?;
    drop(module);
    let descriptors = ComputeDescriptors::new(device, pipeline.set_layout, [&input, &vertices, &indices])?;

    let queue = device.compute_queue();
    let recorder = CommandRecorder::new(device, queue.family, 1)?;
    let fence = Fence::new(device, false)?;

    device.wait_idle()?;
    recorder.record(0, |d, cmd| {
        unsafe {
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.raw);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout,
                0,
                std::slice::from_ref(&descriptors.set),
                &[],
            );
            d.cmd_dispatch(cmd, sizes.point_count, 1, 1);
        }
        Ok(())
    })?;
    recorder.submit(0, queue, &fence)?;
    fence.wait()?;
    info!("Compute stage finished ({} indices)", sizes.index_count);

    Ok(ComputeModel::new(vertices, indices, sizes.index_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes_follow_point_count() {
        for n in [1u32, 500, 4096] {
            let s = ComputeSizes::for_points(n).unwrap();
            let n64 = u64::from(n);
            assert_eq!(s.input_bytes, n64 * 12);
            assert_eq!(s.vertex_bytes, n64 * 36);
            assert_eq!(s.index_bytes, n64 * 12);
            assert_eq!(s.index_count, n * 3);
        }
    }

    #[test]
    fn index_count_overflow_is_rejected() {
        let s = ComputeSizes::for_points(MAX_POINTS).unwrap();
        assert_eq!(s.index_count, u32::MAX);
        assert_eq!(s.vertex_bytes, u64::from(MAX_POINTS) * 36);

        let err = ComputeSizes::for_points(MAX_POINTS + 1).unwrap_err();
        assert!(matches!(
            err,
            VkError::TooManyPoints { requested: 1_431_655_766, max: MAX_POINTS }
        ));
        assert!(ComputeSizes::for_points(u32::MAX).is_err());
    }

    #[test]
    fn dispatch_respects_workgroup_limit() {
        assert!(check_dispatch(65_535, 65_535).is_ok());
        assert!(check_dispatch(500, 65_535).is_ok());
        let err = check_dispatch(65_536, 65_535).unwrap_err();
        assert!(matches!(
            err,
            VkError::TooManyPoints { requested: 65_536, max: 65_535 }
        ));
    }

    #[test]
    fn points_are_whole_numbers_in_range() {
        let points = generate_points(500, 50, Some(7));
        assert_eq!(points.len(), 1500);
        for p in &points {
            assert!((-50.0..50.0).contains(p), "{p}");
            assert_eq!(p.fract(), 0.0);
        }
    }

    #[test]
    fn same_seed_same_cloud() {
        assert_eq!(generate_points(64, 10, Some(42)), generate_points(64, 10, Some(42)));
        assert_ne!(generate_points(64, 10, Some(1)), generate_points(64, 10, Some(2)));
    }

    #[test]
    fn zero_scale_collapses_to_origin() {
        assert!(generate_points(8, 0, None).iter().all(|&p| p == 0.0));
    }
}
