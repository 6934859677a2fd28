//! RHI error types.
//!
//! Every failure the engine can report is a [`RhiError`]. Callers that need to
//! react to the category of a failure rather than its message use
//! [`RhiError::kind`].

use ash::vk;
use thiserror::Error;

/// Category of a [`RhiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No Vulkan loader, or no physical device meets the requirements.
    DeviceNotFound,
    /// A required layer, extension, feature or format is unavailable.
    ExtensionUnsupported,
    /// Host or device memory could not be allocated.
    AllocationFailed,
    /// The presentation surface is gone.
    SurfaceLost,
    /// Shader bytecode was rejected.
    ShaderCompileFailed,
    /// A handle or name does not refer to a registered resource.
    HandleOutOfRange,
    /// The API was called with arguments or in a state it does not accept.
    InvalidUsage,
    /// Any other driver failure.
    Driver,
}

/// RHI error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No physical device satisfies the requirements
    #[error("No suitable GPU found: {0}")]
    DeviceNotFound(String),

    /// Required layer, extension, feature or format missing
    #[error("Unsupported: {0}")]
    ExtensionUnsupported(String),

    /// Allocation failure not reported by the allocator itself
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// The presentation surface could not be created or was lost
    #[error("Surface lost: {0}")]
    SurfaceLost(String),

    /// Shader module rejected
    #[error("Shader compile failed: {0}")]
    ShaderCompileFailed(String),

    /// Handle past the end of a registry
    #[error("{kind} handle {index} out of range (registered: {len})")]
    HandleOutOfRange {
        /// Resource category, e.g. "mesh".
        kind: &'static str,
        index: u32,
        len: usize,
    },

    /// Lookup of a pipeline name that was never created
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    /// Pipeline name registered twice
    #[error("Pipeline already exists: {0}")]
    DuplicatePipeline(String),

    /// Barrier requested between layouts the engine has no masks for
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Invalid argument or call order
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
}

impl RhiError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::VulkanError(result) => kind_of_vk_result(*result),
            Self::LoadingError(_) | Self::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            Self::AllocatorError(_) | Self::AllocationFailed(_) => ErrorKind::AllocationFailed,
            Self::ExtensionUnsupported(_) => ErrorKind::ExtensionUnsupported,
            Self::SurfaceLost(_) => ErrorKind::SurfaceLost,
            Self::ShaderCompileFailed(_) => ErrorKind::ShaderCompileFailed,
            Self::HandleOutOfRange { .. } | Self::PipelineNotFound(_) => {
                ErrorKind::HandleOutOfRange
            }
            Self::DuplicatePipeline(_)
            | Self::UnsupportedLayoutTransition { .. }
            | Self::InvalidUsage(_) => ErrorKind::InvalidUsage,
        }
    }

    /// Error for a poisoned allocator lock.
    pub(crate) fn allocator_poisoned() -> Self {
        Self::AllocationFailed("allocator mutex poisoned".to_string())
    }
}

fn kind_of_vk_result(result: vk::Result) -> ErrorKind {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY
        | vk::Result::ERROR_FRAGMENTED_POOL
        | vk::Result::ERROR_TOO_MANY_OBJECTS => ErrorKind::AllocationFailed,
        vk::Result::ERROR_SURFACE_LOST_KHR | vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => {
            ErrorKind::SurfaceLost
        }
        vk::Result::ERROR_EXTENSION_NOT_PRESENT
        | vk::Result::ERROR_LAYER_NOT_PRESENT
        | vk::Result::ERROR_FEATURE_NOT_PRESENT
        | vk::Result::ERROR_FORMAT_NOT_SUPPORTED => ErrorKind::ExtensionUnsupported,
        vk::Result::ERROR_INCOMPATIBLE_DRIVER | vk::Result::ERROR_INITIALIZATION_FAILED => {
            ErrorKind::DeviceNotFound
        }
        vk::Result::ERROR_INVALID_SHADER_NV => ErrorKind::ShaderCompileFailed,
        _ => ErrorKind::Driver,
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_kinds() {
        let kind = |r| RhiError::from(r).kind();
        assert_eq!(
            kind(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            ErrorKind::AllocationFailed
        );
        assert_eq!(kind(vk::Result::ERROR_SURFACE_LOST_KHR), ErrorKind::SurfaceLost);
        assert_eq!(
            kind(vk::Result::ERROR_EXTENSION_NOT_PRESENT),
            ErrorKind::ExtensionUnsupported
        );
        assert_eq!(
            kind(vk::Result::ERROR_INCOMPATIBLE_DRIVER),
            ErrorKind::DeviceNotFound
        );
        assert_eq!(kind(vk::Result::ERROR_DEVICE_LOST), ErrorKind::Driver);
    }

    #[test]
    fn test_contract_violations_are_handle_errors() {
        let err = RhiError::HandleOutOfRange {
            kind: "mesh",
            index: 3,
            len: 1,
        };
        assert_eq!(err.kind(), ErrorKind::HandleOutOfRange);
        assert_eq!(err.to_string(), "mesh handle 3 out of range (registered: 1)");

        let err = RhiError::PipelineNotFound("missing".to_string());
        assert_eq!(err.kind(), ErrorKind::HandleOutOfRange);
        assert_eq!(err.to_string(), "Pipeline not found: missing");
    }

    #[test]
    fn test_invalid_usage_kinds() {
        let err = RhiError::UnsupportedLayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidUsage);
        assert_eq!(
            RhiError::DuplicatePipeline("basic".into()).kind(),
            ErrorKind::InvalidUsage
        );
    }

    #[test]
    fn test_poisoned_allocator_is_allocation_failure() {
        assert_eq!(
            RhiError::allocator_poisoned().kind(),
            ErrorKind::AllocationFailed
        );
    }
}
