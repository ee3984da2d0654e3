//! Chat-network capability used by the pipeline.
//!
//! The wire protocol lives behind [`ChannelClient`]; the crate ships one
//! adapter, [`http::HttpChannelClient`], which talks to a JSON bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod http;
pub mod resilience;

/// Reference to a media attachment, resolved by [`ChannelClient::download_media`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// A message as fetched from a source channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Channel-scoped, monotonically increasing id
    pub id: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<MediaRef>,
    pub date: DateTime<Utc>,
}

impl RawMessage {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// Messages with neither text nor media carry nothing to mirror.
    pub fn has_content(&self) -> bool {
        !self.text().is_empty() || self.has_media()
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Flood-wait imposed by the network; the caller must pause this long.
    #[error("rate limited, retry after {wait_secs}s")]
    RateLimited { wait_secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("connection not established after {attempts} attempts")]
    ConnectionExhausted { attempts: u32 },
}

impl ChannelError {
    /// Errors no retry or skip can recover from for this client.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChannelError::Unauthorized(_) | ChannelError::ConnectionExhausted { .. }
        )
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        ChannelError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Transport(format!("io: {}", e))
    }
}

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Fetch, media download, send and connectivity primitives of a chat network.
#[async_trait::async_trait]
pub trait ChannelClient: Send + Sync {
    /// Resolve a handle to the canonical handle used by the network.
    async fn resolve(&self, channel: &str) -> ChannelResult<String>;

    /// Up to `limit` of the newest messages with an id greater than `since_id`.
    async fn fetch(&self, channel: &str, since_id: i64, limit: usize) -> ChannelResult<Vec<RawMessage>>;

    /// A single message by id.
    async fn fetch_one(&self, channel: &str, id: i64) -> ChannelResult<Option<RawMessage>>;

    /// Download the message's media into `dest_dir`. `None` when it has none.
    async fn download_media(&self, message: &RawMessage, dest_dir: &Path) -> ChannelResult<Option<PathBuf>>;

    async fn send(&self, target: &str, caption: &str, media: Option<&Path>) -> ChannelResult<()>;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> ChannelResult<()>;
}
