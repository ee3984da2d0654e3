//! Local media files: naming, kind detection, hashing and cleanup.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::channel::MediaRef;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_video(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

pub fn is_image(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// File extension (with dot) for a media reference, from its name or mime type.
fn extension_for(media: &MediaRef) -> String {
    if let Some(ext) = media
        .file_name
        .as_deref()
        .map(Path::new)
        .and_then(extension_of)
    {
        return format!(".{}", ext);
    }
    let ext = match media.mime_type.as_deref() {
        Some("image/jpeg") => ".jpg",
        Some("image/png") => ".png",
        Some("image/webp") => ".webp",
        Some("image/gif") => ".gif",
        Some("video/mp4") => ".mp4",
        Some("video/quicktime") => ".mov",
        Some("video/x-msvideo") => ".avi",
        _ => "",
    };
    ext.to_string()
}

/// `media_<8 hex>_<message id><ext>`; the random part keeps retries apart.
pub fn local_file_name(message_id: i64, media: &MediaRef) -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("media_{}_{}{}", &nonce[..8], message_id, extension_for(media))
}

/// SHA-256 of the file contents, hex encoded.
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open media file {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("failed to read media file {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Delete a downloaded file; a missing file is not an error.
pub async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed local media"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove local media"),
    }
}

/// Resize/watermark step applied to images before sending.
#[async_trait::async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Rewrite the image at `path` in place.
    async fn prepare(&self, path: &Path) -> Result<()>;
}

/// Sends images untouched.
pub struct PassthroughMediaProcessor;

#[async_trait::async_trait]
impl MediaProcessor for PassthroughMediaProcessor {
    async fn prepare(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "image passed through unchanged");
        Ok(())
    }
}
