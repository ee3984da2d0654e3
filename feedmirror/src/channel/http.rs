use anyhow::Context;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{ChannelClient, ChannelError, ChannelResult, RawMessage};
use crate::media;

/// Flood-wait applied when a 429 carries no usable hint.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// [`ChannelClient`] speaking JSON over HTTP to a chat-network bridge.
///
/// Routes:
/// - `GET  /health`
/// - `GET  /channels/{handle}`
/// - `GET  /channels/{handle}/messages?since_id=&limit=`
/// - `GET  /channels/{handle}/messages/{id}`
/// - `GET  /media/{id}`
/// - `POST /channels/{handle}/messages` (multipart `caption` + optional `media`)
pub struct HttpChannelClient {
    base_url: Url,
    token: Option<String>,
    client: Client,
    connected: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct ResolvedChannel {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: Option<u64>,
}

impl HttpChannelClient {
    pub fn new(base_url: &str, token: Option<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid bridge URL: {}", base_url))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("feedmirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url,
            token,
            client,
            connected: AtomicBool::new(false),
        })
    }

    /// Build from the `[bridge]` config section, reading the token from its env var.
    pub fn from_config(cfg: &common::BridgeConfig) -> anyhow::Result<Self> {
        let token = match cfg.token_env.as_deref() {
            Some(var) => Some(
                std::env::var(var).with_context(|| format!("bridge token env var '{}' not set", var))?,
            ),
            None => None,
        };
        Self::new(&cfg.base_url, token, cfg.timeout_seconds.unwrap_or(30))
    }

    fn url(&self, segments: &[&str]) -> ChannelResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChannelError::Transport(format!("bridge URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn execute(&self, req: reqwest::RequestBuilder) -> ChannelResult<Response> {
        match self.authorized(req).send().await {
            Ok(response) => check_status(response).await,
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(e.into())
            }
        }
    }
}

/// Map bridge HTTP statuses onto [`ChannelError`] variants.
async fn check_status(response: Response) -> ChannelResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let header_hint = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let wait_secs = match header_hint {
                Some(secs) => secs,
                None => response
                    .json::<RateLimitBody>()
                    .await
                    .ok()
                    .and_then(|b| b.retry_after)
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            };
            Err(ChannelError::RateLimited { wait_secs })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            let body = response.text().await.unwrap_or_default();
            Err(ChannelError::Unauthorized(format!("{}: {}", status, body)))
        }
        StatusCode::NOT_FOUND => {
            let url = response.url().to_string();
            Err(ChannelError::NotFound(url))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(ChannelError::Transport(format!("bridge returned {}: {}", status, body)))
        }
    }
}

#[async_trait::async_trait]
impl ChannelClient for HttpChannelClient {
    async fn resolve(&self, channel: &str) -> ChannelResult<String> {
        let url = self.url(&["channels", channel])?;
        let resolved: ResolvedChannel = self.execute(self.client.get(url)).await?.json().await?;
        Ok(resolved.handle)
    }

    async fn fetch(&self, channel: &str, since_id: i64, limit: usize) -> ChannelResult<Vec<RawMessage>> {
        let url = self.url(&["channels", channel, "messages"])?;
        let req = self
            .client
            .get(url)
            .query(&[("since_id", since_id.to_string()), ("limit", limit.to_string())]);
        let messages: Vec<RawMessage> = self.execute(req).await?.json().await?;
        debug!(channel, since_id, count = messages.len(), "fetched messages");
        Ok(messages)
    }

    async fn fetch_one(&self, channel: &str, id: i64) -> ChannelResult<Option<RawMessage>> {
        let url = self.url(&["channels", channel, "messages", &id.to_string()])?;
        match self.execute(self.client.get(url)).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(ChannelError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn download_media(&self, message: &RawMessage, dest_dir: &Path) -> ChannelResult<Option<PathBuf>> {
        let Some(media_ref) = &message.media else {
            return Ok(None);
        };

        let url = self.url(&["media", &media_ref.id])?;
        let bytes = self.execute(self.client.get(url)).await?.bytes().await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(media::local_file_name(message.id, media_ref));
        tokio::fs::write(&path, &bytes).await?;
        info!(message_id = message.id, path = %path.display(), bytes = bytes.len(), "media downloaded");
        Ok(Some(path))
    }

    async fn send(&self, target: &str, caption: &str, media: Option<&Path>) -> ChannelResult<()> {
        let url = self.url(&["channels", target, "messages"])?;
        let mut form = reqwest::multipart::Form::new().text("caption", caption.to_string());
        if let Some(path) = media {
            let bytes = tokio::fs::read(path).await?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "media".to_string());
            form = form.part("media", reqwest::multipart::Part::bytes(bytes).file_name(file_name));
        }
        self.execute(self.client.post(url).multipart(form)).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> ChannelResult<()> {
        let url = self.url(&["health"])?;
        self.execute(self.client.get(url)).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
