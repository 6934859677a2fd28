//! SPIR-V shader modules.
//!
//! A pipeline is built from a single module that contains both the vertex
//! and the fragment entry point ([`VERTEX_ENTRY_POINT`] and
//! [`FRAGMENT_ENTRY_POINT`]).

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// First word of every SPIR-V binary.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

pub const VERTEX_ENTRY_POINT: &CStr = c"vertMain";
pub const FRAGMENT_ENTRY_POINT: &CStr = c"fragMain";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    pub fn entry_point(self) -> &'static CStr {
        match self {
            ShaderStage::Vertex => VERTEX_ENTRY_POINT,
            ShaderStage::Fragment => FRAGMENT_ENTRY_POINT,
        }
    }
}

/// Checks framing and magic number and returns the code as words.
pub fn parse_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() {
        return Err(RhiError::ShaderCompileFailed(
            "SPIR-V code is empty".to_string(),
        ));
    }
    if !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderCompileFailed(format!(
            "SPIR-V code must be a multiple of 4 bytes, got {} bytes",
            bytes.len()
        )));
    }

    let code: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if code[0] != SPIRV_MAGIC {
        return Err(RhiError::ShaderCompileFailed(format!(
            "invalid SPIR-V magic number {:#010x}",
            code[0]
        )));
    }

    Ok(code)
}

/// A `VkShaderModule` holding both graphics stages.
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    pub fn from_spirv_bytes(device: Arc<Device>, bytes: &[u8]) -> RhiResult<Self> {
        let code = parse_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        let module = unsafe {
            device
                .handle()
                .create_shader_module(&create_info, None)
                .map_err(|e| {
                    RhiError::ShaderCompileFailed(format!("shader module creation failed: {e}"))
                })?
        };
        info!("Created shader module ({} bytes)", bytes.len());

        Ok(Self { device, module })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage infos for the vertex and fragment entry points, in that order.
    pub fn stage_create_infos(&self) -> [vk::PipelineShaderStageCreateInfo<'static>; 2] {
        [ShaderStage::Vertex, ShaderStage::Fragment].map(|stage| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage.to_vk_stage())
                .module(self.module)
                .name(stage.entry_point())
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed shader module");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_valid_spirv_header() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0300, 0, 1, 0]);
        let code = parse_spirv(&bytes).unwrap();
        assert_eq!(code.len(), 5);
        assert_eq!(code[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_empty_spirv_rejected() {
        let err = parse_spirv(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShaderCompileFailed);
    }

    #[test]
    fn test_unaligned_spirv_rejected() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0]);
        bytes.push(0);
        let err = parse_spirv(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShaderCompileFailed);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let bytes = words_to_bytes(&[0xdead_beef, 0]);
        let err = parse_spirv(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShaderCompileFailed);
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_entry_points() {
        assert_eq!(ShaderStage::Vertex.entry_point(), c"vertMain");
        assert_eq!(ShaderStage::Fragment.entry_point(), c"fragMain");
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }
}
