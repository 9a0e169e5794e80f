//! Model types
//!
//! Metadata about the model artifact an engine has loaded.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Information about a loaded model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Display name of the model
    pub name: String,
    /// Path to the weights file
    pub path: PathBuf,
    /// Model size in bytes
    pub size_bytes: u64,
}

impl ModelInfo {
    /// Describe a weights file on disk
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Self {
            name,
            path: path.to_path_buf(),
            size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_info_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llama-3.2-3b.Q4_K_M.gguf");
        std::fs::write(&path, b"GGUF1234").unwrap();

        let info = ModelInfo::from_path(&path);
        assert_eq!(info.name, "llama-3.2-3b.Q4_K_M");
        assert_eq!(info.size_bytes, 8);
    }
}
