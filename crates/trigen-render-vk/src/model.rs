// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::command::CommandRecorder;
use crate::device::{Device, Queue};
use crate::error::VkResult;
use crate::memory::Buffer;

/// Anything drawable with one vertex binding and a `u32` index buffer.
pub trait Model {
    fn vertex_buffer(&self) -> vk::Buffer;
    fn vertex_offset(&self) -> vk::DeviceSize {
        0
    }
    fn index_buffer(&self) -> vk::Buffer;
    fn index_count(&self) -> u32;
}

#[rustfmt::skip]
pub const CUBE_VERTICES: [f32; 24] = [
    -1.0, -1.0, -1.0,
     1.0, -1.0, -1.0,
     1.0,  1.0, -1.0,
    -1.0,  1.0, -1.0,
    -1.0, -1.0,  1.0,
     1.0, -1.0,  1.0,
     1.0,  1.0,  1.0,
    -1.0,  1.0,  1.0,
];

#[rustfmt::skip]
pub const CUBE_INDICES: [u32; 36] = [
    0, 1, 3, 3, 1, 2,
    1, 5, 2, 2, 5, 6,
    5, 4, 6, 6, 4, 7,
    4, 0, 7, 7, 0, 3,
    3, 2, 7, 7, 2, 6,
    4, 5, 0, 0, 5, 1,
];

/// Geometry uploaded once from the host into device-local buffers.
pub struct StaticModel {
    vertices: Buffer,
    indices: Buffer,
    index_count: u32,
}

impl StaticModel {
    pub fn upload(
        device: &Arc<Device>,
        recorder: &CommandRecorder,
        queue: Queue,
        positions: &[f32],
        indices: &[u32],
    ) -> VkResult<Self> {
        let vertices = Buffer::device_local_with_data(
            device,
            recorder,
            queue,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(positions),
        )?;
        let index_buffer = Buffer::device_local_with_data(
            device,
            recorder,
            queue,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(indices),
        )?;
        info!(
            "Created new vulkan model ({} vertices, {} indices)",
            positions.len() / 3,
            indices.len()
        );
        Ok(Self {
            vertices,
            indices: index_buffer,
            index_count: indices.len() as u32,
        })
    }

    pub fn cube(device: &Arc<Device>, recorder: &CommandRecorder, queue: Queue) -> VkResult<Self> {
        Self::upload(device, recorder, queue, &CUBE_VERTICES, &CUBE_INDICES)
    }
}

impl Model for StaticModel {
    fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.raw()
    }

    fn index_buffer(&self) -> vk::Buffer {
        self.indices.raw()
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Geometry written by the compute stage. Owns the output buffers; they are
/// read-only for the rest of the program.
pub struct ComputeModel {
    vertices: Buffer,
    indices: Buffer,
    index_count: u32,
}

impl ComputeModel {
    pub fn new(vertices: Buffer, indices: Buffer, index_count: u32) -> Self {
        Self {
            vertices,
            indices,
            index_count,
        }
    }
}

impl Model for ComputeModel {
    fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.raw()
    }

    fn index_buffer(&self) -> vk::Buffer {
        self.indices.raw()
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_indices_reference_its_vertices() {
        let vertex_count = (CUBE_VERTICES.len() / 3) as u32;
        assert_eq!(vertex_count, 8);
        assert!(CUBE_INDICES.iter().all(|&i| i < vertex_count));
        assert_eq!(CUBE_INDICES.len() % 3, 0);
    }

    #[test]
    fn cube_has_no_degenerate_or_repeated_triangles() {
        let mut seen = std::collections::HashSet::new();
        for tri in CUBE_INDICES.chunks(3) {
            assert!(tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2], "{tri:?}");
            let mut key = [tri[0], tri[1], tri[2]];
            key.sort_unstable();
            assert!(seen.insert(key), "duplicate triangle {tri:?}");
        }
        assert_eq!(seen.len(), 12);
    }
}
