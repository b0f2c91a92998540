// SPDX-License-Identifier: CEPL-1.0
//! Runtime GLSL → SPIR-V compilation and shader module ownership.
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use shaderc::{CompileOptions, Compiler, EnvVersion, ShaderKind, TargetEnv};
use tracing::debug;

use crate::device::Device;
use crate::error::{Check, VkError, VkResult};

pub const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Maps a single pipeline stage to the compiler's shader kind.
pub fn shader_kind(stage: vk::ShaderStageFlags) -> VkResult<ShaderKind> {
    Ok(match stage {
        vk::ShaderStageFlags::VERTEX => ShaderKind::Vertex,
        vk::ShaderStageFlags::FRAGMENT => ShaderKind::Fragment,
        vk::ShaderStageFlags::COMPUTE => ShaderKind::Compute,
        vk::ShaderStageFlags::GEOMETRY => ShaderKind::Geometry,
        vk::ShaderStageFlags::TESSELLATION_CONTROL => ShaderKind::TessControl,
        vk::ShaderStageFlags::TESSELLATION_EVALUATION => ShaderKind::TessEvaluation,
        other => return Err(VkError::UnsupportedStage(other)),
    })
}

pub struct ShaderCompiler {
    compiler: Compiler,
}

impl ShaderCompiler {
    pub fn new() -> VkResult<Self> {
        let compiler = Compiler::new().map_err(|e| VkError::ShaderCompile {
            name: "<compiler>".into(),
            message: e.to_string(),
        })?;
        Ok(Self { compiler })
    }

    pub fn compile(
        &self,
        source: &str,
        stage: vk::ShaderStageFlags,
        name: &str,
    ) -> VkResult<Vec<u32>> {
        let kind = shader_kind(stage)?;
        let fail = |message: String| VkError::ShaderCompile {
            name: name.to_owned(),
            message,
        };
        let mut options = CompileOptions::new().map_err(|e| fail(e.to_string()))?;
        options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_0 as u32);
        let artifact = self
            .compiler
            .compile_into_spirv(source, kind, name, "main", Some(&options))
            .map_err(|e| fail(e.to_string()))?;
        if artifact.get_num_warnings() > 0 {
            debug!("{name}: {}", artifact.get_warning_messages());
        }
        Ok(artifact.as_binary().to_vec())
    }

    pub fn compile_file(&self, path: &Path, stage: vk::ShaderStageFlags) -> VkResult<Vec<u32>> {
        let source = std::fs::read_to_string(path).map_err(|source| VkError::Io {
            path: path.to_owned(),
            source,
        })?;
        self.compile(&source, stage, &path.display().to_string())
    }
}

pub struct ShaderModule {
    device: Arc<Device>,
    raw: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    pub fn new(device: &Arc<Device>, code: &[u32], stage: vk::ShaderStageFlags) -> VkResult<Self> {
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: std::mem::size_of_val(code),
            p_code: code.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe { device.raw().create_shader_module(&info, None) }
            .check("Failed to create shader module")?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
            stage,
        })
    }

    pub fn load(
        device: &Arc<Device>,
        compiler: &ShaderCompiler,
        path: &Path,
        stage: vk::ShaderStageFlags,
    ) -> VkResult<Self> {
        let code = compiler.compile_file(path, stage)?;
        debug!("Compiled {} ({} words)", path.display(), code.len());
        Self::new(device, &code, stage)
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: self.stage,
            module: self.raw,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        }
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_shader_module(self.raw, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn graphics_and_compute_stages_map() {
        assert_eq!(shader_kind(vk::ShaderStageFlags::VERTEX).unwrap(), ShaderKind::Vertex);
        assert_eq!(shader_kind(vk::ShaderStageFlags::FRAGMENT).unwrap(), ShaderKind::Fragment);
        assert_eq!(shader_kind(vk::ShaderStageFlags::COMPUTE).unwrap(), ShaderKind::Compute);
    }

    #[test]
    fn combined_or_unknown_stages_are_rejected() {
        for stage in [
            vk::ShaderStageFlags::ALL_GRAPHICS,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            vk::ShaderStageFlags::empty(),
        ] {
            assert!(matches!(shader_kind(stage), Err(VkError::UnsupportedStage(s)) if s == stage));
        }
    }

    #[test]
    fn bundled_shaders_compile() {
        let compiler = ShaderCompiler::new().unwrap();
        let sources = [
            (include_str!("../../../shaders/compute.comp"), vk::ShaderStageFlags::COMPUTE, "compute.comp"),
            (include_str!("../../../shaders/mesh.vert"), vk::ShaderStageFlags::VERTEX, "mesh.vert"),
            (include_str!("../../../shaders/mesh.frag"), vk::ShaderStageFlags::FRAGMENT, "mesh.frag"),
        ];
        for (src, stage, name) in sources {
            let words = compiler.compile(src, stage, name).unwrap();
            assert_eq!(words[0], SPIRV_MAGIC, "{name}");
        }
    }

    #[test]
    fn syntax_errors_surface_as_compile_errors() {
        let compiler = ShaderCompiler::new().unwrap();
        let err = compiler
            .compile("#version 450\nvoid main() { oops }", vk::ShaderStageFlags::COMPUTE, "bad.comp")
            .unwrap_err();
        match err {
            VkError::ShaderCompile { name, message } => {
                assert_eq!(name, "bad.comp");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let compiler = ShaderCompiler::new().unwrap();
        let err = compiler
            .compile_file(Path::new("does/not/exist.vert"), vk::ShaderStageFlags::VERTEX)
            .unwrap_err();
        assert!(matches!(err, VkError::Io { .. }));
    }
}
