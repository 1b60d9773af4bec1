use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

const MAX_NAME_CHARS: usize = 100;

/// Filesystem blob store for message attachments.
///
/// Blobs live at `{dir}/{room_id}/{sha256 prefix}-{name}` and are served
/// read-only under `{public_url}/files/`.
pub struct BlobStore {
    dir: PathBuf,
    public_url: String,
}

impl BlobStore {
    pub async fn new(dir: PathBuf, public_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.dir
    }

    /// Storage path for an attachment. Content-addressed, so re-uploading the
    /// same bytes under the same name lands on the same path.
    pub fn blob_path(room_id: Uuid, name: &str, data: &[u8]) -> String {
        let digest = hex::encode(Sha256::digest(data));
        format!("{}/{}-{}", room_id, &digest[..16], sanitize_name(name))
    }

    /// Write `data` at `path` (relative to the store) and return its public URL.
    pub async fn upload(&self, path: &str, data: &[u8]) -> Result<String> {
        if path.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
            bail!("invalid blob path: {}", path);
        }

        let full = self.dir.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&full).await?;
        file.write_all(data).await?;
        file.flush().await?;

        info!("Stored blob {} ({} bytes)", path, data.len());
        Ok(format!("{}/files/{}", self.public_url, path))
    }
}

/// Keep a display name filesystem- and URL-safe.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_CHARS)
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
