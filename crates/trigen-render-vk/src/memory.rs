// SPDX-License-Identifier: CEPL-1.0
//! Buffer and image allocation.
//!
//! Every allocation follows the same order: create the object, query its
//! requirements, pick a memory type, allocate, optionally map/copy/unmap, then
//! bind. [`Buffer`] and [`Image`] constructors are the only place this happens,
//! so nothing can be bound before it has memory or mapped after it is in use.
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::command::CommandRecorder;
use crate::device::{Device, Queue};
use crate::error::{Check, VkError, VkResult};

/// Lowest memory type index allowed by `type_bits` whose flags include all of `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count).find(|&i| {
        type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(required)
    })
}

/// Allocates memory for an object whose requirements were just queried, fills it
/// when `data` is given, and binds it via `bind`. Frees the memory on failure.
fn allocate_and_bind(
    device: &Device,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
    data: Option<&[u8]>,
    bind: impl FnOnce(vk::DeviceMemory) -> Result<(), vk::Result>,
) -> VkResult<(vk::DeviceMemory, u32)> {
    let memory_type = find_memory_type(
        device.memory_properties(),
        requirements.memory_type_bits,
        properties,
    )
    .ok_or(VkError::NoMemoryType {
        type_bits: requirements.memory_type_bits,
        required: properties,
    })?;

    let alloc = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: requirements.size,
        memory_type_index: memory_type,
        ..Default::default()
    };
    let d = device.raw();
    let memory = unsafe { d.allocate_memory(&alloc, None) }.check("Failed to allocate memory")?;

    let filled = match data {
        Some(bytes) => {
            // SAFETY: the memory is host visible (callers pass HOST_VISIBLE with data),
            // not yet bound or in use, and at least `requirements.size` bytes long.
            unsafe {
                d.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                    .map(|ptr| {
                        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
                        d.unmap_memory(memory);
                    })
                    .check("Failed to map memory")
            }
        }
        None => Ok(()),
    };
    let bound = filled.and_then(|()| bind(memory).check("Failed to bind memory"));
    if let Err(e) = bound {
        unsafe { d.free_memory(memory, None) };
        return Err(e);
    }
    Ok((memory, memory_type))
}

/// Who may access a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sharing {
    Exclusive,
    /// Read or written by both queues. Concurrent when the families differ.
    GraphicsAndCompute,
}

pub struct Buffer {
    device: Arc<Device>,
    raw: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    pub fn new(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        sharing: Sharing,
    ) -> VkResult<Self> {
        Self::create(device, size, usage, properties, sharing, None)
    }

    /// Host-visible, coherent buffer initialised with `data`.
    pub fn with_data(
        device: &Arc<Device>,
        usage: vk::BufferUsageFlags,
        data: &[u8],
        sharing: Sharing,
    ) -> VkResult<Self> {
        Self::create(
            device,
            data.len() as vk::DeviceSize,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            sharing,
            Some(data),
        )
    }

    /// Device-local buffer filled through a staging copy on `queue`.
    pub fn device_local_with_data(
        device: &Arc<Device>,
        recorder: &CommandRecorder,
        queue: Queue,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> VkResult<Self> {
        let staging = Self::with_data(
            device,
            vk::BufferUsageFlags::TRANSFER_SRC,
            data,
            Sharing::Exclusive,
        )?;
        let dst = Self::new(
            device,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Sharing::Exclusive,
        )?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size,
        };
        recorder.submit_once(queue, |d, cmd| {
            unsafe { d.cmd_copy_buffer(cmd, staging.raw, dst.raw, std::slice::from_ref(&region)) };
        })?;
        Ok(dst)
    }

    fn create(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        sharing: Sharing,
        data: Option<&[u8]>,
    ) -> VkResult<Self> {
        let families = [device.graphics_queue().family, device.compute_queue().family];
        let concurrent = sharing == Sharing::GraphicsAndCompute && device.queues_split();
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: if concurrent {
                vk::SharingMode::CONCURRENT
            } else {
                vk::SharingMode::EXCLUSIVE
            },
            queue_family_index_count: if concurrent { 2 } else { 0 },
            p_queue_family_indices: if concurrent {
                families.as_ptr()
            } else {
                std::ptr::null()
            },
            ..Default::default()
        };
        let d = device.raw();
        let raw = unsafe { d.create_buffer(&info, None) }.check("Failed to create buffer")?;
        let requirements = unsafe { d.get_buffer_memory_requirements(raw) };
        let allocated = allocate_and_bind(device, requirements, properties, data, |memory| {
            unsafe { d.bind_buffer_memory(raw, memory, 0) }
        });
        let (memory, memory_type) = match allocated {
            Ok(v) => v,
            Err(e) => {
                unsafe { d.destroy_buffer(raw, None) };
                return Err(e);
            }
        };
        debug!("Created buffer {raw:?} ({size} bytes, {usage:?}, memory type {memory_type})");
        Ok(Self {
            device: Arc::clone(device),
            raw,
            memory,
            size,
        })
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        debug!("Dropping buffer {:?}", self.raw);
        unsafe {
            self.device.raw().destroy_buffer(self.raw, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::S8_UINT
    )
}

/// 2D image with its own memory and a view over the whole image.
pub struct Image {
    device: Arc<Device>,
    raw: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

impl Image {
    pub fn depth_attachment(
        device: &Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> VkResult<Self> {
        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let d = device.raw();
        let raw = unsafe { d.create_image(&info, None) }.check("Failed to create depth image")?;
        let requirements = unsafe { d.get_image_memory_requirements(raw) };
        let allocated = allocate_and_bind(
            device,
            requirements,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            None,
            |memory| unsafe { d.bind_image_memory(raw, memory, 0) },
        );
        let memory = match allocated {
            Ok((memory, _)) => memory,
            Err(e) => {
                unsafe { d.destroy_image(raw, None) };
                return Err(e);
            }
        };

        let mut aspect_mask = vk::ImageAspectFlags::DEPTH;
        if has_stencil(format) {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }
        let view_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: raw,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = match unsafe { d.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(code) => {
                unsafe {
                    d.destroy_image(raw, None);
                    d.free_memory(memory, None);
                }
                return Err(VkError::OperationFailed {
                    code,
                    context: "Failed to create depth image view",
                });
            }
        };

        Ok(Self {
            device: Arc::clone(device),
            raw,
            memory,
            view,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        debug!("Dropping image {:?}", self.raw);
        unsafe {
            let d = self.device.raw();
            d.destroy_image_view(self.view, None);
            d.destroy_image(self.raw, None);
            d.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::MemoryPropertyFlags as F;

    fn table(flags: &[F]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = *f;
        }
        props
    }

    fn synthetic() -> vk::PhysicalDeviceMemoryProperties {
        table(&[
            F::DEVICE_LOCAL,
            F::HOST_VISIBLE | F::HOST_COHERENT,
            F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT,
            F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED,
        ])
    }

    #[test]
    fn lowest_superset_index_wins() {
        let props = synthetic();
        assert_eq!(find_memory_type(&props, 0b1111, F::DEVICE_LOCAL), Some(0));
        assert_eq!(find_memory_type(&props, 0b1111, F::HOST_VISIBLE), Some(1));
        assert_eq!(
            find_memory_type(&props, 0b1111, F::HOST_VISIBLE | F::DEVICE_LOCAL),
            Some(2)
        );
        assert_eq!(find_memory_type(&props, 0b1111, F::HOST_CACHED), Some(3));
    }

    #[test]
    fn type_mask_is_respected() {
        let props = synthetic();
        assert_eq!(find_memory_type(&props, 0b1110, F::DEVICE_LOCAL), Some(2));
        assert_eq!(find_memory_type(&props, 0b1000, F::HOST_VISIBLE), Some(3));
        assert_eq!(find_memory_type(&props, 0b0001, F::HOST_VISIBLE), None);
    }

    #[test]
    fn empty_requirements_match_first_allowed() {
        let props = synthetic();
        assert_eq!(find_memory_type(&props, 0b0100, F::empty()), Some(2));
        assert_eq!(find_memory_type(&props, 0, F::empty()), None);
    }

    #[test]
    fn bits_beyond_type_count_are_ignored() {
        let props = synthetic();
        assert_eq!(find_memory_type(&props, 0xFFFF_FFF0, F::empty()), None);
        assert_eq!(find_memory_type(&props, u32::MAX, F::LAZILY_ALLOCATED), None);
    }

    #[test]
    fn stencil_formats() {
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
        assert!(!has_stencil(vk::Format::D16_UNORM));
    }
}
