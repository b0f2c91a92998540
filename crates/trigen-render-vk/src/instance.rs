// SPDX-License-Identifier: CEPL-1.0
//! Vulkan instance plus the optional validation messenger.
use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Check, VkResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"trigen";

struct DebugMessenger {
    loader: debug_utils::Instance,
    raw: vk::DebugUtilsMessengerEXT,
}

pub struct Instance {
    entry: Entry,
    raw: ash::Instance,
    debug: Option<DebugMessenger>,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader hands us either null or a valid callback data struct
    // whose message outlives this call.
    let msg = unsafe {
        if data.is_null() || (*data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{types:?} {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{types:?} {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{types:?} {msg}");
    } else {
        trace!(target: "vulkan", "{types:?} {msg}");
    }
    vk::FALSE
}

fn validation_available(entry: &Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER))
}

impl Instance {
    /// Creates the instance with the WSI extensions `display` needs. When
    /// `validation` is set and the Khronos layer is installed, the layer and a
    /// messenger that forwards into `tracing` are enabled as well.
    pub fn new(display: RawDisplayHandle, validation: bool) -> VkResult<Arc<Self>> {
        let entry = Entry::linked();

        let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
            .check("Failed to query surface instance extensions")?
            .to_vec();

        let validation = validation && {
            let found = validation_available(&entry);
            if !found {
                warn!("Validation layer {VALIDATION_LAYER:?} not found; is the Vulkan SDK installed?");
                warn!("Disabling vulkan validation layers for current instance");
            }
            found
        };
        let layers: Vec<*const c_char> = if validation {
            extensions.push(debug_utils::NAME.as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: APP_NAME.as_ptr(),
            application_version: vk::make_api_version(0, 0, 1, 0),
            p_engine_name: APP_NAME.as_ptr(),
            engine_version: vk::make_api_version(0, 0, 1, 0),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe { entry.create_instance(&create_info, None) }
            .check("Failed to create vulkan instance")?;
        info!("Successfully created vulkan instance (validation = {validation})");

        let mut instance = Self {
            entry,
            raw,
            debug: None,
        };
        if validation {
            instance.debug = Some(instance.create_messenger()?);
            info!("Successfully setup debugging for vulkan instance");
        }
        Ok(Arc::new(instance))
    }

    fn create_messenger(&self) -> VkResult<DebugMessenger> {
        let loader = debug_utils::Instance::new(&self.entry, &self.raw);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let raw = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .check("Failed to create debug messenger")?;
        Ok(DebugMessenger { loader, raw })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        info!("Freeing vulkan instance");
        // SAFETY: every child object holds an `Arc<Instance>`, so none are alive here.
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.loader.destroy_debug_utils_messenger(debug.raw, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}
