// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. The blobs are compiled ahead of
// time and read from disk at startup.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::device::VulkanDevice;
use crate::error::RendererError;

/// Read a SPIR-V file into 32-bit words.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, RendererError> {
    let bytes = std::fs::read(path).map_err(|source| RendererError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })?;
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|source| RendererError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })
}

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn new(device: &Arc<VulkanDevice>, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self {
            module,
            device: device.clone(),
        })
    }

    pub fn from_file(device: &Arc<VulkanDevice>, path: &Path) -> Result<Self> {
        let code = load_spirv(path)?;
        log::debug!("Loaded shader {:?} ({} words)", path, code.len());
        Self::new(device, &code)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

/// The two programmable stages of the quad pipeline. Kept alive for the
/// renderer's lifetime so pipelines can be rebuilt without reloading.
pub struct ShaderStages {
    pub vertex: ShaderModule,
    pub fragment: ShaderModule,
}

impl ShaderStages {
    pub fn load(device: &Arc<VulkanDevice>, vertex: &Path, fragment: &Path) -> Result<Self> {
        Ok(Self {
            vertex: ShaderModule::from_file(device, vertex)?,
            fragment: ShaderModule::from_file(device, fragment)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("quad-renderer-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_is_a_shader_load_error() {
        let err = load_spirv(Path::new("no/such/shader.spv")).unwrap_err();
        match err {
            RendererError::ShaderLoad { path, source } => {
                assert_eq!(path, PathBuf::from("no/such/shader.spv"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn reads_words_verbatim() {
        // SPIR-V magic number followed by one arbitrary word, little endian
        let path = temp_file("valid.spv", &[0x03, 0x02, 0x23, 0x07, 0xaa, 0xbb, 0xcc, 0xdd]);
        let words = load_spirv(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(words, vec![0x0723_0203, 0xddcc_bbaa]);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let path = temp_file("truncated.spv", &[0x03, 0x02, 0x23]);
        let result = load_spirv(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(RendererError::ShaderLoad { .. })));
    }
}
