//! Model resolution
//!
//! Turns a user-supplied model location and device preference into what the
//! llama backend needs: one GGUF file and a GPU layer count.

use super::InferenceError;
use crate::system::gpu::detect_gpu;
use crate::types::Device;
use std::path::{Path, PathBuf};

/// Offload every layer when running on a GPU
pub const ALL_GPU_LAYERS: u32 = 99;

/// Resolve `path` to a single GGUF weights file
///
/// A directory is accepted when it holds exactly one `.gguf` file, which is
/// what the fetch command leaves behind.
pub fn resolve_model_file(path: &Path) -> Result<PathBuf, InferenceError> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    if !path.is_dir() {
        return Err(InferenceError::ModelPath(format!(
            "{} does not exist",
            path.display()
        )));
    }

    let mut candidates = Vec::new();
    collect_gguf_files(path, &mut candidates)
        .map_err(|e| InferenceError::ModelPath(format!("{}: {}", path.display(), e)))?;
    candidates.sort();

    match candidates.len() {
        0 => Err(InferenceError::ModelPath(format!(
            "no .gguf file found in {}",
            path.display()
        ))),
        1 => Ok(candidates.remove(0)),
        _ => Err(InferenceError::ModelPath(format!(
            "multiple .gguf files found in {}, pick one of: {}",
            path.display(),
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

fn collect_gguf_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_gguf_files(&path, out)?;
        } else if path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gguf"))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Map a device preference onto a GPU layer count
pub fn gpu_layers_for(device: Device) -> Result<u32, InferenceError> {
    gpu_layers_with(device, || {
        let gpu = detect_gpu();
        if gpu.is_available {
            tracing::info!("Found {} with {} MB VRAM", gpu.name, gpu.vram_total_mb);
        }
        gpu.is_available
    })
}

fn gpu_layers_with(device: Device, gpu_present: impl FnOnce() -> bool) -> Result<u32, InferenceError> {
    match device {
        Device::Cpu => Ok(0),
        Device::Gpu => Ok(ALL_GPU_LAYERS),
        Device::Npu => Err(InferenceError::UnsupportedDevice(device)),
        Device::Auto => {
            if gpu_present() {
                tracing::info!("GPU detected, offloading all layers");
                Ok(ALL_GPU_LAYERS)
            } else {
                tracing::info!("No GPU detected, running on CPU");
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_file_directly() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("model.gguf");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(resolve_model_file(&file).unwrap(), file);
    }

    #[test]
    fn test_resolve_single_gguf_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), b"readme").unwrap();
        std::fs::create_dir(dir.path().join("q4")).unwrap();
        let file = dir.path().join("q4").join("Llama-3.2-3B-Q4_K_M.GGUF");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(resolve_model_file(dir.path()).unwrap(), file);
    }

    #[test]
    fn test_resolve_rejects_ambiguous_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.gguf"), b"x").unwrap();
        std::fs::write(dir.path().join("b.gguf"), b"x").unwrap();
        let err = resolve_model_file(dir.path()).unwrap_err();
        assert!(err.to_string().contains("multiple .gguf files"));
    }

    #[test]
    fn test_resolve_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_model_file(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, InferenceError::ModelPath(_)));
    }

    #[test]
    fn test_device_layers() {
        assert_eq!(gpu_layers_with(Device::Cpu, || true).unwrap(), 0);
        assert_eq!(gpu_layers_with(Device::Gpu, || false).unwrap(), ALL_GPU_LAYERS);
        assert_eq!(gpu_layers_with(Device::Auto, || true).unwrap(), ALL_GPU_LAYERS);
        assert_eq!(gpu_layers_with(Device::Auto, || false).unwrap(), 0);
        assert!(matches!(
            gpu_layers_with(Device::Npu, || true),
            Err(InferenceError::UnsupportedDevice(Device::Npu))
        ));
    }
}
