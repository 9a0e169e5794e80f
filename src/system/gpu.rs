//! GPU detection
//!
//! Best-effort probe used to resolve the `auto` device. Nothing here is
//! authoritative; a failed probe just means "run on the CPU".

use std::process::Command;

/// GPU information
#[derive(Debug, Clone, Default)]
pub struct GpuInfo {
    pub name: String,
    pub vram_total_mb: u64,
    pub is_available: bool,
}

impl GpuInfo {
    fn not_detected() -> Self {
        Self {
            name: "GPU not detected".to_string(),
            vram_total_mb: 0,
            is_available: false,
        }
    }
}

/// Detect available GPU (best effort)
pub fn detect_gpu() -> GpuInfo {
    let detected = detect_platform_gpu();
    match &detected {
        Some(gpu) => tracing::debug!("Detected GPU: {} ({} MB)", gpu.name, gpu.vram_total_mb),
        None => tracing::debug!("No GPU detected"),
    }
    detected.unwrap_or_else(GpuInfo::not_detected)
}

#[cfg(target_os = "macos")]
fn detect_platform_gpu() -> Option<GpuInfo> {
    detect_gpu_system_profiler()
}

#[cfg(not(target_os = "macos"))]
fn detect_platform_gpu() -> Option<GpuInfo> {
    detect_gpu_nvidia_smi()
}

/// Run a probe command, returning stdout on success
fn probe(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(not(target_os = "macos"))]
fn detect_gpu_nvidia_smi() -> Option<GpuInfo> {
    let stdout = probe(
        "nvidia-smi",
        &["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"],
    )?;
    parse_nvidia_smi(&stdout)
}

/// Parse the first `name, memory.total` line of nvidia-smi CSV output
#[cfg_attr(target_os = "macos", allow(dead_code))]
fn parse_nvidia_smi(stdout: &str) -> Option<GpuInfo> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() < 2 || parts[0].is_empty() {
        return None;
    }

    Some(GpuInfo {
        name: parts[0].to_string(),
        vram_total_mb: parts[1].parse::<u64>().ok()?,
        is_available: true,
    })
}

/// Detect GPU using system_profiler SPDisplaysDataType
#[cfg(target_os = "macos")]
fn detect_gpu_system_profiler() -> Option<GpuInfo> {
    let stdout = probe("system_profiler", &["SPDisplaysDataType"])?;
    parse_system_profiler(&stdout)
}

/// Parse `Chipset Model:` and `VRAM` lines from system_profiler output
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_system_profiler(stdout: &str) -> Option<GpuInfo> {
    let mut gpu_name: Option<String> = None;
    let mut vram_mb: Option<u64> = None;

    for line in stdout.lines() {
        let trimmed = line.trim();

        // GPU name: "Chipset Model: Apple M2 Pro" or "Chipset Model: AMD Radeon Pro 5500M"
        if let Some(name) = trimmed.strip_prefix("Chipset Model:") {
            let name = name.trim();
            if !name.is_empty() {
                gpu_name = Some(name.to_string());
            }
        }

        // VRAM: "VRAM (Total): 16 GB" or "VRAM (Dynamic, Max): 48 GB"
        if trimmed.starts_with("VRAM") {
            let after_colon = trimmed.rsplit(':').next().unwrap_or("").trim();
            let parts: Vec<&str> = after_colon.split_whitespace().collect();
            if parts.len() >= 2 {
                if let Ok(val) = parts[0].parse::<u64>() {
                    vram_mb = Some(match parts[1].to_uppercase().as_str() {
                        "GB" => val * 1024,
                        _ => val,
                    });
                }
            }
        }
    }

    // Apple Silicon uses unified memory and reports no VRAM line
    let name = gpu_name?;
    Some(GpuInfo {
        name: format!("{} (Metal)", name),
        vram_total_mb: vram_mb.unwrap_or(0),
        is_available: true,
    })
}
