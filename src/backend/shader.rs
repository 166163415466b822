// Shader module compilation and management
//
// Shaders are written in WGSL and compiled to SPIR-V at runtime with naga.
// Clip-space Y is flipped during translation to match Vulkan's convention.

use anyhow::{anyhow, bail, Context, Result};
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

use super::device::GraphicsDevice;
use super::types::ShaderStages;

/// Single pipeline stage a shader module is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }

    pub fn to_vk(self) -> vk::ShaderStageFlags {
        self.stages().to_vk()
    }

    pub fn stages(self) -> ShaderStages {
        match self {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::Fragment => ShaderStages::FRAGMENT,
        }
    }
}

/// Compile one entry point of a WGSL module to SPIR-V words.
pub fn compile_wgsl(source: &str, stage: ShaderStage, entry_point: &str) -> Result<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL parse error:\n{}", e.emit_to_string(source)))?;

    let found = module
        .entry_points
        .iter()
        .find(|ep| ep.name == entry_point)
        .with_context(|| format!("Entry point '{}' not found in shader", entry_point))?;
    if found.stage != stage.to_naga() {
        bail!(
            "Entry point '{}' is a {:?} shader, expected {:?}",
            entry_point,
            found.stage,
            stage
        );
    }

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("WGSL validation error:\n{}", e.emit_to_string(source)))?;

    let mut options = naga::back::spv::Options::default();
    options.flags |= naga::back::spv::WriterFlags::ADJUST_COORDINATE_SPACE;

    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage.to_naga(),
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .with_context(|| format!("Failed to write SPIR-V for '{}'", entry_point))
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderDescription<'a> {
    pub stage: ShaderStage,
    pub source: &'a str,
    pub entry_point: &'a str,
}

impl<'a> ShaderDescription<'a> {
    pub fn new(stage: ShaderStage, source: &'a str, entry_point: &'a str) -> Self {
        Self {
            stage,
            source,
            entry_point,
        }
    }
}

/// Compiled shader module plus the entry point it was compiled for.
pub struct Shader {
    pub(crate) module: vk::ShaderModule,
    pub(crate) stage: ShaderStage,
    pub(crate) entry_point: CString,
    device: Arc<GraphicsDevice>,
}

impl Shader {
    pub fn from_wgsl(device: &Arc<GraphicsDevice>, description: &ShaderDescription) -> Result<Self> {
        let code = compile_wgsl(description.source, description.stage, description.entry_point)?;
        let entry_point = CString::new(description.entry_point)
            .context("Entry point name contains a NUL byte")?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        log::debug!(
            "Compiled {:?} shader '{}' ({} words)",
            description.stage,
            description.entry_point,
            code.len()
        );

        Ok(Self {
            module,
            stage: description.stage,
            entry_point,
            device: device.clone(),
        })
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

/// Helper to compile a shader embedded at compile time
#[macro_export]
macro_rules! load_shader {
    ($device:expr, $stage:expr, $path:expr, $entry:expr) => {{
        let source = include_str!($path);
        $crate::backend::shader::Shader::from_wgsl(
            $device,
            &$crate::backend::shader::ShaderDescription::new($stage, source, $entry),
        )
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUBE_SHADER: &str = include_str!("../../shaders/cube.wgsl");

    #[test]
    fn cube_shader_compiles_for_both_stages() {
        let vs = compile_wgsl(CUBE_SHADER, ShaderStage::Vertex, "VS").unwrap();
        let fs = compile_wgsl(CUBE_SHADER, ShaderStage::Fragment, "FS").unwrap();
        assert_eq!(vs[0], 0x0723_0203);
        assert_eq!(fs[0], 0x0723_0203);
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        assert!(compile_wgsl(CUBE_SHADER, ShaderStage::Vertex, "main").is_err());
    }

    #[test]
    fn stage_mismatch_is_an_error() {
        assert!(compile_wgsl(CUBE_SHADER, ShaderStage::Fragment, "VS").is_err());
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = compile_wgsl("fn broken( {", ShaderStage::Vertex, "VS").unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }
}
