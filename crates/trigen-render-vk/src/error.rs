// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VkError {
    /// A Vulkan call returned a non-success code. Displays as `<RESULT_CODE> : <context>`.
    #[error("{code:?} : {context}")]
    OperationFailed {
        code: vk::Result,
        context: &'static str,
    },
    #[error("no Vulkan devices found")]
    NoDevices,
    #[error("no Vulkan device offers swapchain support plus graphics/present and compute queues")]
    NoSuitableDevice,
    #[error("no supported depth format")]
    NoSupportedDepthFormat,
    #[error("no memory type in {type_bits:#034b} with {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
    #[error("failed to compile shader {name}: {message}")]
    ShaderCompile { name: String, message: String },
    #[error("shader stage {0:?} has no compiler mapping")]
    UnsupportedStage(vk::ShaderStageFlags),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("window handle: {0}")]
    Handle(#[from] raw_window_handle::HandleError),
    #[error("recording into frame slot {0} before waiting on its fence")]
    SlotNotClaimed(usize),
    #[error("{requested} points exceed the limit of {max}")]
    TooManyPoints { requested: u32, max: u32 },
}

pub type VkResult<T> = std::result::Result<T, VkError>;

/// Attaches a context message to a raw Vulkan result.
pub(crate) trait Check<T> {
    fn check(self, context: &'static str) -> VkResult<T>;
}

impl<T> Check<T> for Result<T, vk::Result> {
    fn check(self, context: &'static str) -> VkResult<T> {
        self.map_err(|code| VkError::OperationFailed { code, context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_failed_names_the_result_code() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .check("Failed to submit compute command")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ERROR_DEVICE_LOST : Failed to submit compute command"
        );
    }

    #[test]
    fn success_passes_through() {
        assert_eq!(Ok::<_, vk::Result>(7).check("unused").unwrap(), 7);
    }

    #[test]
    fn point_limit_error_shows_both_counts() {
        let err = VkError::TooManyPoints {
            requested: 70_000,
            max: 65_535,
        };
        assert_eq!(err.to_string(), "70000 points exceed the limit of 65535");
    }

    #[test]
    fn memory_type_error_shows_mask() {
        let err = VkError::NoMemoryType {
            type_bits: 0b101,
            required: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        let text = err.to_string();
        assert!(text.contains("0b00000000000000000000000000000101"), "{text}");
        assert!(text.contains("DEVICE_LOCAL"), "{text}");
    }
}
