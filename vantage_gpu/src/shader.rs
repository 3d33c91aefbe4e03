use anyhow::{Context as _, Result};
use vantage_core::{ash, vk};

/// A compiled SPIR-V module (spec §3 "Shader"). Source bytecode is
/// retained so the module can be recreated without re-reading the
/// file — `filename` is the identity key a hot-reload watcher keys
/// off of. Shader *compilation* from GLSL/HLSL source is out of
/// scope (spec §1 non-goals); this type only loads precompiled
/// bytecode.
pub struct Shader {
    device: ash::Device,
    raw: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    bytecode: Vec<u8>,
    filename: String,
}

impl Shader {
    pub fn from_bytecode(device: ash::Device, filename: &str, bytecode: Vec<u8>, stage: vk::ShaderStageFlags) -> Result<Self> {
        let raw = Self::create_module(&device, &bytecode)?;
        Ok(Self {
            device,
            raw,
            stage,
            bytecode,
            filename: filename.to_owned(),
        })
    }

    pub fn from_file(device: ash::Device, path: &str, stage: vk::ShaderStageFlags) -> Result<Self> {
        let bytecode = std::fs::read(path).with_context(|| format!("reading shader bytecode from {path}"))?;
        Self::from_bytecode(device, path, bytecode, stage)
    }

    fn create_module(device: &ash::Device, bytecode: &[u8]) -> Result<vk::ShaderModule> {
        let mut cursor = std::io::Cursor::new(bytecode);
        let code = ash::util::read_spv(&mut cursor).context("shader bytecode is not valid SPIR-V")?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let raw = unsafe { device.create_shader_module(&create_info, None) }.context("create shader module")?;
        Ok(raw)
    }

    /// Destroys the current module and recreates it from the retained
    /// bytecode — used after a hot-reload watcher has swapped
    /// `bytecode` in place via `set_bytecode`.
    pub fn rebuild(&mut self) -> Result<()> {
        let raw = Self::create_module(&self.device, &self.bytecode)?;
        unsafe { self.device.destroy_shader_module(self.raw, None) };
        self.raw = raw;
        Ok(())
    }

    pub fn set_bytecode(&mut self, bytecode: Vec<u8>) {
        self.bytecode = bytecode;
    }

    pub fn raw(&self) -> vk::ShaderModule {
        self.raw
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn stage_create_info(&self, entry_point: &std::ffi::CStr) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.raw)
            .name(entry_point)
            .build()
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.raw, None) };
    }
}
