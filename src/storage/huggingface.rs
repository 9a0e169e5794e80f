//! HuggingFace model downloader
//!
//! Mirrors a model repository from the HuggingFace Hub into a local directory.
//! Files already present with the expected size are not transferred again, so
//! re-running a fetch is cheap.

use crate::storage::StorageError;
use glob::Pattern;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Parse a HuggingFace URL to extract model info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuggingFaceUrl {
    pub repo_id: String,
    /// File or folder inside the repo, empty for the whole repo
    pub filename: String,
    pub revision: String,
}

impl HuggingFaceUrl {
    /// Parse various HuggingFace URL formats
    pub fn parse(url: &str) -> Result<Self, StorageError> {
        // Handle different URL formats:
        // 1. https://huggingface.co/username/repo/blob/main/model.gguf
        // 2. https://huggingface.co/username/repo/resolve/main/model.gguf
        // 3. https://huggingface.co/username/repo/tree/main
        // 4. huggingface.co/username/repo (no scheme)
        // 5. username/repo/model.gguf
        // 6. username/repo or username/repo@revision

        let url = url.trim();
        let url = url.split('?').next().unwrap_or(url);
        let url = url.split('#').next().unwrap_or(url);
        let url = url.trim_end_matches('/');

        if url.is_empty() {
            return Err(StorageError::InvalidModelId("empty model id".to_string()));
        }

        let without_scheme = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        let without_scheme = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);

        if let Some(path) = without_scheme.strip_prefix("huggingface.co/") {
            let parts: Vec<&str> = path.split('/').collect();
            if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
                return Err(StorageError::InvalidModelId(url.to_string()));
            }

            let repo_id = format!("{}/{}", parts[0], parts[1]);

            if let Some(marker) = parts
                .iter()
                .position(|&p| p == "blob" || p == "resolve" || p == "tree")
            {
                if parts.len() > marker + 1 {
                    return Ok(Self {
                        repo_id,
                        filename: parts[marker + 2..].join("/"),
                        revision: parts[marker + 1].to_string(),
                    });
                }
            }

            return Ok(Self {
                repo_id,
                filename: String::new(),
                revision: "main".to_string(),
            });
        }

        let (path, revision) = match url.split_once('@') {
            Some((path, rev)) if !rev.is_empty() => (path, rev.to_string()),
            Some(_) => return Err(StorageError::InvalidModelId(url.to_string())),
            None => (url, "main".to_string()),
        };

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() >= 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            return Ok(Self {
                repo_id: format!("{}/{}", parts[0], parts[1]),
                filename: parts[2..].join("/"),
                revision,
            });
        }

        Err(StorageError::InvalidModelId(format!(
            "could not parse {:?}, expected owner/repo",
            url
        )))
    }

    /// Build the download URL for a file in the repo
    pub fn download_url(&self, endpoint: &str, filename: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            endpoint.trim_end_matches('/'),
            self.repo_id,
            self.revision,
            filename
        )
    }

    fn tree_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/models/{}/tree/{}?recursive=true",
            endpoint.trim_end_matches('/'),
            self.repo_id,
            self.revision
        )
    }
}

/// What to fetch and where to put it
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub model_id: String,
    pub local_dir: PathBuf,
    /// Glob patterns on repo paths; empty means every file
    pub include: Vec<String>,
    /// Overrides the revision named in the model id
    pub revision: Option<String>,
    /// Bearer token for gated or private repos
    pub token: Option<String>,
    pub endpoint: String,
}

impl FetchRequest {
    /// New request using `HF_TOKEN` and `HF_ENDPOINT` from the environment
    pub fn new(model_id: impl Into<String>, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_id: model_id.into(),
            local_dir: local_dir.into(),
            include: Vec::new(),
            revision: None,
            token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
            endpoint: std::env::var("HF_ENDPOINT")
                .ok()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        }
    }

    pub fn with_include(mut self, patterns: Vec<String>) -> Self {
        self.include = patterns;
        self
    }

    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        if token.is_some() {
            self.token = token;
        }
        self
    }
}

/// Outcome of a fetch
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    pub local_dir: PathBuf,
    pub downloaded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub bytes_downloaded: u64,
}

/// A file entry from the hub's tree listing
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct RepoFile {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Turn a repo path into a safe relative path under the destination
fn sanitize_relative_path(repo_path: &str) -> Result<PathBuf, StorageError> {
    let trimmed = repo_path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(StorageError::UnsafePath(repo_path.to_string()));
    }

    let mut out = PathBuf::new();
    for segment in trimmed.replace('\\', "/").split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            return Err(StorageError::UnsafePath(repo_path.to_string()));
        }

        let mut sanitized = String::with_capacity(segment.len());
        for ch in segment.chars() {
            let invalid = matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*');
            if invalid || ch.is_control() {
                sanitized.push('_');
            } else {
                sanitized.push(ch);
            }
        }
        while sanitized.ends_with('.') || sanitized.ends_with(' ') {
            sanitized.pop();
        }
        if sanitized.is_empty() {
            return Err(StorageError::UnsafePath(repo_path.to_string()));
        }
        out.push(sanitized);
    }

    if out.as_os_str().is_empty() || out.components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(StorageError::UnsafePath(repo_path.to_string()));
    }
    Ok(out)
}

/// Keep files matching any pattern (all files when there are none)
pub fn select_files(files: Vec<RepoFile>, patterns: &[String]) -> Result<Vec<RepoFile>, StorageError> {
    let patterns = patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(|e| StorageError::InvalidPattern(format!("{}: {}", p, e))))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(files
        .into_iter()
        .filter(|f| f.kind == "file")
        .filter(|f| patterns.is_empty() || patterns.iter().any(|p| p.matches(&f.path)))
        .collect())
}

/// Whether a previous run already left a complete copy at `path`
pub fn is_up_to_date(path: &Path, expected_size: Option<u64>) -> bool {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => match expected_size {
            Some(size) => metadata.len() == size,
            None => metadata.len() > 0,
        },
        _ => false,
    }
}

/// Download every selected file of a model repository into `request.local_dir`
pub async fn fetch_model(
    request: &FetchRequest,
    progress_callback: impl Fn(&str, u64, u64),
) -> Result<FetchSummary, StorageError> {
    let mut hf_url = HuggingFaceUrl::parse(&request.model_id)?;
    if let Some(revision) = &request.revision {
        hf_url.revision = revision.clone();
    }

    let mut patterns = request.include.clone();
    if !hf_url.filename.is_empty() {
        patterns.push(hf_url.filename.clone());
        patterns.push(format!("{}/**", hf_url.filename));
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(3600)) // 1 hour timeout for large models
        .user_agent(concat!("localchat/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let listing = list_repo_files(&client, request, &hf_url).await?;
    let files = select_files(listing, &patterns)?;
    if files.is_empty() {
        return Err(StorageError::NoFiles(if patterns.is_empty() {
            format!("{} has no files", hf_url.repo_id)
        } else {
            format!("nothing in {} matches {}", hf_url.repo_id, patterns.join(", "))
        }));
    }

    fs::create_dir_all(&request.local_dir)?;
    tracing::info!(
        "Fetching {} files from {}@{} into {}",
        files.len(),
        hf_url.repo_id,
        hf_url.revision,
        request.local_dir.display()
    );

    let mut summary = FetchSummary {
        local_dir: request.local_dir.clone(),
        ..FetchSummary::default()
    };

    for file in &files {
        let relative = sanitize_relative_path(&file.path)?;
        let output_path = request.local_dir.join(&relative);

        if is_up_to_date(&output_path, file.size) {
            tracing::info!("Already present: {:?}", output_path);
            summary.skipped.push(output_path);
            continue;
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let url = hf_url.download_url(&request.endpoint, &file.path);
        let bytes = download_file(&client, &url, request.token.as_deref(), &output_path, file.size, |done, total| {
            progress_callback(&file.path, done, total)
        })
        .await
        .map_err(|e| match e {
            StorageError::Incomplete { got, expected, .. } => StorageError::Incomplete {
                file: file.path.clone(),
                got,
                expected,
            },
            other => other,
        })?;

        summary.bytes_downloaded += bytes;
        summary.downloaded.push(output_path);
    }

    tracing::info!(
        "Fetch complete: {} downloaded ({}), {} already present",
        summary.downloaded.len(),
        format_size(summary.bytes_downloaded),
        summary.skipped.len()
    );

    Ok(summary)
}

/// List files in a HuggingFace repository
async fn list_repo_files(
    client: &reqwest::Client,
    request: &FetchRequest,
    hf_url: &HuggingFaceUrl,
) -> Result<Vec<RepoFile>, StorageError> {
    let api_url = hf_url.tree_url(&request.endpoint);
    tracing::debug!("Listing {}", api_url);

    let mut req = client.get(&api_url);
    if let Some(token) = &request.token {
        req = req.bearer_auth(token);
    }
    let response = req.send().await?;

    if !response.status().is_success() {
        return Err(StorageError::Hub(format!(
            "listing {}@{} failed with status {}",
            hf_url.repo_id,
            hf_url.revision,
            response.status()
        )));
    }

    Ok(response.json().await?)
}

async fn download_file(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    output_path: &Path,
    expected_size: Option<u64>,
    progress_callback: impl Fn(u64, u64),
) -> Result<u64, StorageError> {
    tracing::info!("Downloading from: {}", url);

    let mut req = client.get(url);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let mut response = req.send().await?;

    if !response.status().is_success() {
        return Err(StorageError::Hub(format!(
            "download of {} failed with status: {}",
            url,
            response.status()
        )));
    }

    let total_size = response.content_length().or(expected_size).unwrap_or(0);

    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = output_path.with_file_name(format!("{}.tmp", file_name));

    // Write to temp file first
    let mut temp_file = File::create(&temp_path).await?;
    let mut downloaded: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        temp_file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        progress_callback(downloaded, total_size);
    }
    temp_file.flush().await?;
    drop(temp_file);

    if total_size > 0 && downloaded != total_size {
        let _ = fs::remove_file(&temp_path);
        return Err(StorageError::Incomplete {
            file: url.to_string(),
            got: downloaded,
            expected: total_size,
        });
    }

    // Rename temp file to final location (atomic operation)
    fs::rename(&temp_path, output_path)?;
    tracing::debug!("Saved {:?} ({})", output_path, format_size(downloaded));

    Ok(downloaded)
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64) -> RepoFile {
        RepoFile {
            kind: "file".to_string(),
            path: path.to_string(),
            size: Some(size),
        }
    }

    #[test]
    fn test_parse_repo_id() {
        let parsed = HuggingFaceUrl::parse("llmware/llama-3.2-3b-instruct-npu-ov").unwrap();
        assert_eq!(parsed.repo_id, "llmware/llama-3.2-3b-instruct-npu-ov");
        assert_eq!(parsed.filename, "");
        assert_eq!(parsed.revision, "main");
    }

    #[test]
    fn test_parse_repo_with_revision() {
        let parsed = HuggingFaceUrl::parse("bartowski/Llama-3.2-3B-Instruct-GGUF@v2").unwrap();
        assert_eq!(parsed.repo_id, "bartowski/Llama-3.2-3B-Instruct-GGUF");
        assert_eq!(parsed.revision, "v2");
    }

    #[test]
    fn test_parse_hf_url_full() {
        let url = "https://huggingface.co/TheBloke/Llama-2-7B-GGUF/blob/main/llama-2-7b.Q4_K_M.gguf";
        let parsed = HuggingFaceUrl::parse(url).unwrap();
        assert_eq!(parsed.repo_id, "TheBloke/Llama-2-7B-GGUF");
        assert_eq!(parsed.filename, "llama-2-7b.Q4_K_M.gguf");
        assert_eq!(parsed.revision, "main");
    }

    #[test]
    fn test_parse_tree_url() {
        let parsed = HuggingFaceUrl::parse("https://huggingface.co/org/repo/tree/dev/").unwrap();
        assert_eq!(parsed.repo_id, "org/repo");
        assert_eq!(parsed.revision, "dev");
        assert_eq!(parsed.filename, "");
    }

    #[test]
    fn test_parse_url_without_scheme() {
        let parsed = HuggingFaceUrl::parse("huggingface.co/org/repo").unwrap();
        assert_eq!(parsed.repo_id, "org/repo");
        assert_eq!(parsed.filename, "");
        assert_eq!(parsed.revision, "main");

        let parsed = HuggingFaceUrl::parse("www.huggingface.co/org/repo/resolve/v1/model.gguf").unwrap();
        assert_eq!(parsed.repo_id, "org/repo");
        assert_eq!(parsed.filename, "model.gguf");
        assert_eq!(parsed.revision, "v1");

        assert!(HuggingFaceUrl::parse("huggingface.co").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(HuggingFaceUrl::parse("").is_err());
        assert!(HuggingFaceUrl::parse("   ").is_err());
        assert!(HuggingFaceUrl::parse("just-a-name").is_err());
        assert!(HuggingFaceUrl::parse("org/repo@").is_err());
    }

    #[test]
    fn test_download_url() {
        let parsed = HuggingFaceUrl::parse("org/repo").unwrap();
        assert_eq!(
            parsed.download_url("https://huggingface.co/", "sub/model.gguf"),
            "https://huggingface.co/org/repo/resolve/main/sub/model.gguf"
        );
    }

    #[test]
    fn test_select_files_with_patterns() {
        let listing = vec![
            file("README.md", 10),
            file("Llama-3.2-3B-Instruct-Q4_K_M.gguf", 100),
            file("Llama-3.2-3B-Instruct-Q8_0.gguf", 200),
            RepoFile {
                kind: "directory".to_string(),
                path: "extra".to_string(),
                size: None,
            },
        ];

        let all = select_files(listing.clone(), &[]).unwrap();
        assert_eq!(all.len(), 3);

        let q4 = select_files(listing, &["*Q4_K_M.gguf".to_string()]).unwrap();
        assert_eq!(q4, vec![file("Llama-3.2-3B-Instruct-Q4_K_M.gguf", 100)]);
    }

    #[test]
    fn test_select_files_bad_pattern() {
        let err = select_files(vec![file("a", 1)], &["[".to_string()]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidPattern(_)));
    }

    #[test]
    fn test_sanitize_relative_path() {
        assert_eq!(
            sanitize_relative_path("openvino_model.bin").unwrap(),
            PathBuf::from("openvino_model.bin")
        );
        assert_eq!(
            sanitize_relative_path("/tokenizer/vocab.json").unwrap(),
            PathBuf::from("tokenizer").join("vocab.json")
        );
        assert_eq!(
            sanitize_relative_path("weird:name?.gguf").unwrap(),
            PathBuf::from("weird_name_.gguf")
        );
        assert!(sanitize_relative_path("../etc/passwd").is_err());
        assert!(sanitize_relative_path("a/../../b").is_err());
        assert!(sanitize_relative_path("").is_err());
    }

    #[test]
    fn test_is_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.gguf");
        assert!(!is_up_to_date(&path, Some(4)));

        fs::write(&path, b"GGUF").unwrap();
        assert!(is_up_to_date(&path, Some(4)));
        assert!(!is_up_to_date(&path, Some(5)));
        assert!(is_up_to_date(&path, None));

        fs::write(&path, b"").unwrap();
        assert!(!is_up_to_date(&path, None));
        assert!(!is_up_to_date(dir.path(), None));
    }

    #[test]
    fn test_repo_listing_deserializes() {
        let json = r#"[
            {"type":"file","oid":"abc","size":1519,"path":".gitattributes"},
            {"type":"directory","oid":"def","size":0,"path":"onnx"},
            {"type":"file","oid":"123","size":2019377696,"path":"model.gguf","lfs":{"oid":"x","size":2019377696,"pointerSize":135}}
        ]"#;
        let files: Vec<RepoFile> = serde_json::from_str(json).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[2].size, Some(2_019_377_696));
        assert_eq!(select_files(files, &[]).unwrap().len(), 2);
    }

    #[test]
    fn test_request_overrides() {
        let request = FetchRequest::new("org/repo", "out")
            .with_token(Some("hf_x".to_string()))
            .with_revision(Some(" ".to_string()));
        assert_eq!(request.token.as_deref(), Some("hf_x"));
        assert_eq!(request.local_dir, PathBuf::from("out"));
        assert!(request.revision.is_none());

        let request = request.with_revision(Some("refs/pr/1".to_string()));
        assert_eq!(request.revision.as_deref(), Some("refs/pr/1"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
