// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and logical device creation.
//!
//! Selection works on plain capability records ([`Candidate`], [`FamilyCaps`])
//! so the policy can be tested without a GPU. The policy:
//!
//! - a device must expose every extension in [`REQUIRED_EXTENSIONS`];
//! - the graphics family is the first family with graphics *and* present support;
//! - the compute family is the first compute-capable family, replaced by the first
//!   family that does compute *only* (no graphics, no present) if there is one;
//! - the first device meeting all of the above wins, in enumeration order.
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use ash::khr::{dedicated_allocation, get_memory_requirements2, swapchain};
use ash::vk;
use bitflags::bitflags;
use tracing::{info, warn};

use crate::error::{Check, VkError, VkResult};
use crate::instance::Instance;
use crate::surface::Surface;

pub const REQUIRED_EXTENSIONS: [&CStr; 2] = [swapchain::NAME, get_memory_requirements2::NAME];

const SHARED_PRIORITY: [f32; 1] = [1.0];
const GRAPHICS_PRIORITY: [f32; 1] = [0.9];
const COMPUTE_PRIORITY: [f32; 1] = [1.0];

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct QueueCaps: u8 {
        const GRAPHICS = 1;
        const COMPUTE = 1 << 1;
        const PRESENT = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FamilyCaps {
    pub caps: QueueCaps,
    pub queue_count: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: Option<u32>,
    pub compute: Option<u32>,
}

impl QueueFamilies {
    pub fn scan(families: &[FamilyCaps]) -> Self {
        let mut found = Self::default();
        let mut exclusive_compute = false;
        for (index, family) in families.iter().enumerate() {
            if family.queue_count == 0 {
                continue;
            }
            let index = index as u32;
            let caps = family.caps;

            if found.graphics.is_none() && caps.contains(QueueCaps::GRAPHICS | QueueCaps::PRESENT) {
                found.graphics = Some(index);
            }
            if !exclusive_compute && caps.contains(QueueCaps::COMPUTE) {
                if !caps.intersects(QueueCaps::GRAPHICS | QueueCaps::PRESENT) {
                    found.compute = Some(index);
                    exclusive_compute = true;
                } else if found.compute.is_none() {
                    found.compute = Some(index);
                }
            }
        }
        found
    }

    /// Both families, if the scan found them.
    pub fn complete(self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.compute?))
    }
}

#[derive(Clone, Debug)]
pub struct Candidate {
    pub name: String,
    pub extensions: Vec<CString>,
    pub families: Vec<FamilyCaps>,
}

impl Candidate {
    pub fn missing_extensions(&self) -> Vec<&'static CStr> {
        REQUIRED_EXTENSIONS
            .into_iter()
            .filter(|req| !self.extensions.iter().any(|e| e.as_c_str() == *req))
            .collect()
    }
}

/// Index of the first acceptable candidate with its `(graphics, compute)` families.
pub fn choose_candidate(candidates: &[Candidate]) -> Option<(usize, u32, u32)> {
    candidates.iter().enumerate().find_map(|(i, c)| {
        let missing = c.missing_extensions();
        if !missing.is_empty() {
            warn!("Skipping device {i} ({}): missing {missing:?}", c.name);
            return None;
        }
        match QueueFamilies::scan(&c.families).complete() {
            Some((graphics, compute)) => Some((i, graphics, compute)),
            None => {
                warn!("Could not find queue families for device {i} ({})", c.name);
                None
            }
        }
    })
}

pub fn vendor_name(vendor_id: u32) -> &'static str {
    match vendor_id {
        0x1002 => "AMD",
        0x10DE => "NVIDIA",
        0x8086 => "Intel",
        0x13B5 => "ARM",
        0x5143 => "Qualcomm",
        0x1010 => "ImgTec",
        _ => "Unknown",
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Queue {
    pub family: u32,
    pub raw: vk::Queue,
}

pub struct Device {
    instance: Arc<Instance>,
    physical: vk::PhysicalDevice,
    raw: ash::Device,
    graphics: Queue,
    compute: Queue,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

fn describe(
    instance: &ash::Instance,
    surface: &Surface,
    phys: vk::PhysicalDevice,
) -> VkResult<Candidate> {
    let (props, ext_props, family_props) = unsafe {
        (
            instance.get_physical_device_properties(phys),
            instance
                .enumerate_device_extension_properties(phys)
                .check("Failed to enumerate device extensions")?,
            instance.get_physical_device_queue_family_properties(phys),
        )
    };
    let families = family_props
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let mut caps = QueueCaps::empty();
            caps.set(QueueCaps::GRAPHICS, f.queue_flags.contains(vk::QueueFlags::GRAPHICS));
            caps.set(QueueCaps::COMPUTE, f.queue_flags.contains(vk::QueueFlags::COMPUTE));
            caps.set(QueueCaps::PRESENT, surface.supports_present(phys, i as u32));
            FamilyCaps {
                caps,
                queue_count: f.queue_count,
            }
        })
        .collect();
    Ok(Candidate {
        name: props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        extensions: ext_props
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok().map(CStr::to_owned))
            .collect(),
        families,
    })
}

impl Device {
    pub fn select(instance: &Arc<Instance>, surface: &Surface) -> VkResult<Arc<Self>> {
        let raw_instance = instance.raw();
        let physicals = unsafe { raw_instance.enumerate_physical_devices() }
            .check("Failed to get physical devices")?;
        if physicals.is_empty() {
            return Err(VkError::NoDevices);
        }
        info!(
            "Found {} vulkan device{}",
            physicals.len(),
            if physicals.len() == 1 { "" } else { "s" }
        );

        let candidates = physicals
            .iter()
            .map(|&p| describe(raw_instance, surface, p))
            .collect::<VkResult<Vec<_>>>()?;
        let (chosen, graphics_family, compute_family) =
            choose_candidate(&candidates).ok_or(VkError::NoSuitableDevice)?;
        let physical = physicals[chosen];

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = if graphics_family == compute_family {
            vec![queue_info(graphics_family, &SHARED_PRIORITY)]
        } else {
            vec![
                queue_info(graphics_family, &GRAPHICS_PRIORITY),
                queue_info(compute_family, &COMPUTE_PRIORITY),
            ]
        };

        let mut extensions: Vec<*const c_char> =
            REQUIRED_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        if candidates[chosen]
            .extensions
            .iter()
            .any(|e| e.as_c_str() == dedicated_allocation::NAME)
        {
            extensions.push(dedicated_allocation::NAME.as_ptr());
        }

        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe { raw_instance.create_device(physical, &create_info, None) }
            .check("Failed to create vulkan logical device")?;

        let (graphics, compute) = unsafe {
            let graphics = Queue {
                family: graphics_family,
                raw: raw.get_device_queue(graphics_family, 0),
            };
            let compute = Queue {
                family: compute_family,
                raw: raw.get_device_queue(compute_family, 0),
            };
            (graphics, compute)
        };
        let (properties, memory_properties) = unsafe {
            (
                raw_instance.get_physical_device_properties(physical),
                raw_instance.get_physical_device_memory_properties(physical),
            )
        };

        info!(
            "Picked vulkan device {chosen}: {} ({}, {:?})",
            candidates[chosen].name,
            vendor_name(properties.vendor_id),
            properties.device_type
        );
        if graphics_family == compute_family {
            info!("Created a suboptimal single queue (family {graphics_family})");
        } else {
            info!(
                "Created the optimal separated graphics and compute queues (families {graphics_family} / {compute_family})"
            );
        }

        Ok(Arc::new(Self {
            instance: Arc::clone(instance),
            physical,
            raw,
            graphics,
            compute,
            properties,
            memory_properties,
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn graphics_queue(&self) -> Queue {
        self.graphics
    }

    pub fn compute_queue(&self) -> Queue {
        self.compute
    }

    pub fn queues_split(&self) -> bool {
        self.graphics.family != self.compute.family
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .raw()
                .get_physical_device_format_properties(self.physical, format)
        }
    }

    pub fn wait_idle(&self) -> VkResult<()> {
        // SAFETY: host access to all queues is single-threaded in this crate.
        unsafe { self.raw.device_wait_idle() }.check("Failed to wait for device idle")
    }
}

fn queue_info(family: u32, priority: &'static [f32; 1]) -> vk::DeviceQueueCreateInfo<'static> {
    vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: family,
        queue_count: 1,
        p_queue_priorities: priority.as_ptr(),
        ..Default::default()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        info!("Freeing vulkan device");
        // SAFETY: every device child holds an `Arc<Device>`; none are alive here.
        unsafe {
            self.raw.device_wait_idle().ok();
            self.raw.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fam(caps: QueueCaps) -> FamilyCaps {
        FamilyCaps {
            caps,
            queue_count: 1,
        }
    }

    fn candidate(name: &str, exts: &[&CStr], families: Vec<FamilyCaps>) -> Candidate {
        Candidate {
            name: name.into(),
            extensions: exts.iter().map(|e| (*e).to_owned()).collect(),
            families,
        }
    }

    const GFX: QueueCaps = QueueCaps::GRAPHICS
        .union(QueueCaps::COMPUTE)
        .union(QueueCaps::PRESENT);

    #[test]
    fn single_universal_family_is_shared() {
        let found = QueueFamilies::scan(&[fam(GFX)]);
        assert_eq!(found.complete(), Some((0, 0)));
    }

    #[test]
    fn exclusive_compute_family_is_preferred() {
        let found = QueueFamilies::scan(&[
            fam(GFX),
            fam(QueueCaps::GRAPHICS | QueueCaps::COMPUTE),
            fam(QueueCaps::COMPUTE),
            fam(QueueCaps::COMPUTE),
        ]);
        assert_eq!(found.graphics, Some(0));
        assert_eq!(found.compute, Some(2));
    }

    #[test]
    fn first_compute_family_kept_without_exclusive_one() {
        let found = QueueFamilies::scan(&[
            fam(QueueCaps::GRAPHICS | QueueCaps::COMPUTE),
            fam(GFX),
            fam(QueueCaps::COMPUTE | QueueCaps::PRESENT),
        ]);
        assert_eq!(found.graphics, Some(1));
        assert_eq!(found.compute, Some(0));
    }

    #[test]
    fn graphics_needs_present() {
        let found = QueueFamilies::scan(&[
            fam(QueueCaps::GRAPHICS | QueueCaps::COMPUTE),
            fam(QueueCaps::COMPUTE),
        ]);
        assert_eq!(found.graphics, None);
        assert_eq!(found.compute, Some(1));
        assert_eq!(found.complete(), None);
    }

    #[test]
    fn empty_families_are_skipped() {
        let found = QueueFamilies::scan(&[
            FamilyCaps {
                caps: GFX,
                queue_count: 0,
            },
            fam(QueueCaps::COMPUTE),
            fam(GFX),
        ]);
        assert_eq!(found.complete(), Some((2, 1)));
    }

    #[test]
    fn first_conforming_device_wins() {
        let list = [
            candidate("no-ext", &[swapchain::NAME], vec![fam(GFX)]),
            candidate("no-present", &REQUIRED_EXTENSIONS, vec![fam(QueueCaps::GRAPHICS)]),
            candidate("good", &REQUIRED_EXTENSIONS, vec![fam(GFX), fam(QueueCaps::COMPUTE)]),
            candidate("also-good", &REQUIRED_EXTENSIONS, vec![fam(GFX)]),
        ];
        assert_eq!(choose_candidate(&list), Some((2, 0, 1)));
    }

    #[test]
    fn no_conforming_device() {
        let list = [candidate("bare", &[], vec![fam(GFX)])];
        assert_eq!(choose_candidate(&list), None);
        assert_eq!(list[0].missing_extensions().len(), 2);
        assert_eq!(choose_candidate(&[]), None);
    }

    #[test]
    fn vendors() {
        assert_eq!(vendor_name(0x10DE), "NVIDIA");
        assert_eq!(vendor_name(0x1002), "AMD");
        assert_eq!(vendor_name(0xDEAD), "Unknown");
    }
}
