//! Sending finished captions (and media) to the destination channel.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::channel::resilience::{ensure_connected, honor_rate_limit, BackoffPolicy};
use crate::channel::{ChannelClient, ChannelError};
use crate::media::{self, MediaProcessor};
use crate::text::{hard_truncate, truncate_to_sentence};

/// Upper bound for a media caption on the destination network.
pub const MAX_CAPTION_CHARS: usize = 1024;

/// Append `signature` on its own line, shortening only the caption so the
/// result fits [`MAX_CAPTION_CHARS`].
pub fn append_signature(caption: &str, signature: &str) -> String {
    if signature.is_empty() {
        return truncate_to_sentence(caption, MAX_CAPTION_CHARS);
    }
    if caption.is_empty() {
        return hard_truncate(signature, MAX_CAPTION_CHARS);
    }

    let budget = MAX_CAPTION_CHARS.saturating_sub(signature.chars().count() + 1);
    let body = truncate_to_sentence(caption, budget);
    let full = if body.is_empty() {
        signature.to_string()
    } else {
        format!("{}\n{}", body, signature)
    };
    if full.chars().count() > MAX_CAPTION_CHARS {
        hard_truncate(&full, MAX_CAPTION_CHARS)
    } else {
        full
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The network imposed a wait, which has already been slept.
    /// The message is not retried.
    RateLimited { wait_secs: u64 },
    Failed(String),
}

pub struct Publisher {
    client: Arc<dyn ChannelClient>,
    target: String,
    signature: String,
    media_processor: Arc<dyn MediaProcessor>,
    backoff: BackoffPolicy,
}

impl Publisher {
    pub fn new(
        client: Arc<dyn ChannelClient>,
        target: impl Into<String>,
        signature: impl Into<String>,
        media_processor: Arc<dyn MediaProcessor>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            client,
            target: target.into(),
            signature: signature.into(),
            media_processor,
            backoff,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Publish `caption` with optional media. The media file is deleted
    /// afterwards whatever the outcome.
    ///
    /// Only fatal channel errors are returned as `Err`.
    pub async fn publish(&self, caption: &str, media: Option<&Path>) -> Result<PublishOutcome, ChannelError> {
        let result = self.send(caption, media).await;
        if let Some(path) = media {
            media::remove_quietly(path).await;
        }
        result
    }

    async fn send(&self, caption: &str, media: Option<&Path>) -> Result<PublishOutcome, ChannelError> {
        let text = append_signature(caption, &self.signature);

        if let Some(path) = media.filter(|p| media::is_image(p)) {
            if let Err(e) = self.media_processor.prepare(path).await {
                warn!(path = %path.display(), error = %e, "image preparation failed, sending original");
            }
        }

        ensure_connected(self.client.as_ref(), &self.backoff).await?;

        match honor_rate_limit(self.client.send(&self.target, &text, media).await).await {
            Ok(()) => {
                info!(target_channel = %self.target, chars = text.chars().count(), media = media.is_some(), "published");
                Ok(PublishOutcome::Published)
            }
            Err(ChannelError::RateLimited { wait_secs }) => Ok(PublishOutcome::RateLimited { wait_secs }),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(target_channel = %self.target, error = %e, "send failed");
                Ok(PublishOutcome::Failed(e.to_string()))
            }
        }
    }
}
