//! Per-room storage of uploaded data files.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{GatewayError, Result};

/// On-disk store of uploaded files, one directory per room.
pub struct UploadStore {
    root: PathBuf,
    max_bytes: u64,
    allowed_exts: Vec<String>,
}

impl UploadStore {
    pub fn new(root: PathBuf, max_bytes: u64, allowed_exts: Vec<String>) -> Self {
        Self {
            root,
            max_bytes,
            allowed_exts,
        }
    }

    /// Validate and store an upload, returning the sanitized filename.
    pub async fn save(&self, room_id: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        if bytes.len() as u64 > self.max_bytes {
            return Err(GatewayError::SizeExceeded(format!(
                "upload exceeds maximum of {} MB",
                self.max_bytes / (1024 * 1024)
            )));
        }
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !self.allowed_exts.iter().any(|a| *a == ext) {
            return Err(GatewayError::Validation(format!(
                "invalid file type: .{ext}"
            )));
        }

        let safe_name = sanitize(file_name);
        let room_dir = self.room_dir(room_id);
        tokio::fs::create_dir_all(&room_dir).await?;
        tokio::fs::write(room_dir.join(&safe_name), bytes).await?;

        info!(room_id, file_name = %safe_name, size = bytes.len(), "file uploaded");
        Ok(safe_name)
    }

    /// Names of a room's uploads. A room with no uploads lists as empty.
    pub async fn list(&self, room_id: &str) -> Result<Vec<String>> {
        let room_dir = self.room_dir(room_id);
        if !room_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&room_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn delete(&self, room_id: &str, file_name: &str) -> Result<()> {
        let path = self.room_dir(room_id).join(sanitize(file_name));
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    fn room_dir(&self, room_id: &str) -> PathBuf {
        // Room ids are caller-supplied; sanitizing keeps them from escaping
        // the upload root.
        self.root.join(sanitize(room_id))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`. Dot-only names
/// would still be path components, so they collapse to `_`.
pub fn sanitize(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        safe
    }
}
