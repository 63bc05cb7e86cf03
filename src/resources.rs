use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const FALLBACK_MIME: &str = "application/octet-stream";

/// A page file served to the webview.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
}

pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "htm" | "html" => "text/html",
        "txt" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "json" | "map" => "application/json",
        "png" => "image/png",
        "css" => "text/css",
        "js" => "text/javascript",
        "woff2" => "font/woff2",
        _ => return None,
    };
    Some(mime)
}

/// Serves the page's bundled files by URL path.
#[derive(Debug, Default)]
pub struct ResourceProvider {
    files: HashMap<String, Vec<u8>>,
}

impl ResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every file under `root`, keyed by its `/`-separated relative path.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut provider = Self::new();
        provider.load_dir(root, root)?;
        log::info!(
            "Loaded {} page file(s) from {}",
            provider.files.len(),
            root.display()
        );
        Ok(provider)
    }

    fn load_dir(&mut self, root: &Path, dir: &Path) -> Result<()> {
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read page directory {}", dir.display()))?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.load_dir(root, &path)?;
                continue;
            }
            // Linked directories are not followed; a link cycle would never end.
            if file_type.is_symlink() && path.is_dir() {
                log::warn!("Skipping linked directory {}", path.display());
                continue;
            }

            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let data = fs::read(&path)
                .with_context(|| format!("Failed to read page file {}", path.display()))?;
            self.files.insert(key, data);
        }

        Ok(())
    }

    pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>) {
        self.files
            .insert(path.trim_start_matches('/').to_string(), data.into());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up the file for a request URL. `/` serves `index.html`.
    pub fn get(&self, url: &str) -> Option<Resource> {
        log::debug!("Resource requested: {}", url);

        let path = if url == "/" {
            "index.html"
        } else {
            url.strip_prefix('/').unwrap_or(url)
        };

        let data = self.files.get(path)?;
        let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        let mime_type = mime_for_extension(extension).unwrap_or_else(|| {
            log::warn!("No MIME type for '{}', serving as {}", path, FALLBACK_MIME);
            FALLBACK_MIME
        });

        Some(Resource {
            data: data.clone(),
            mime_type,
        })
    }
}
