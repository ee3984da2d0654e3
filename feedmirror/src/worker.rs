//! Per-channel pipeline: fetch, filter, transform, dedup, media, publish.

use common::PipelineVariant;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::channel::resilience::{ensure_connected, honor_rate_limit};
use crate::channel::{ChannelError, RawMessage};
use crate::context::MirrorContext;
use crate::filter::FilterRejection;
use crate::ledger::ContentKey;
use crate::media;
use crate::orchestrator::{ActivityLog, ChannelReport, PassState};
use crate::publisher::PublishOutcome;
use crate::transform::TransformOutcome;

/// Why a single message was not published.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Filtered(FilterRejection),
    /// The channel's strategy does not handle this message
    NotApplicable,
    SimilarCaption { ratio: f64 },
    MediaUnavailable(String),
    Duplicate,
    RateLimited { wait_secs: u64 },
    PublishFailed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Filtered(r) => write!(f, "filtered: {}", r),
            RejectReason::NotApplicable => write!(f, "not applicable to channel variant"),
            RejectReason::SimilarCaption { ratio } => {
                write!(f, "similar to a published caption ({:.2})", ratio)
            }
            RejectReason::MediaUnavailable(e) => write!(f, "media download failed: {}", e),
            RejectReason::Duplicate => write!(f, "content already published"),
            RejectReason::RateLimited { wait_secs } => write!(f, "rate limited ({}s)", wait_secs),
            RejectReason::PublishFailed(e) => write!(f, "publish failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Published,
    Rejected(RejectReason),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Unrecoverable for the client; stops the whole run.
    #[error("fatal channel error: {0}")]
    Fatal(ChannelError),
    /// The rest of this channel's pass was abandoned.
    #[error("channel pass aborted: {0:#}")]
    Aborted(anyhow::Error),
}

impl WorkerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Fatal(_))
    }
}

impl From<ChannelError> for WorkerError {
    fn from(e: ChannelError) -> Self {
        if e.is_fatal() {
            WorkerError::Fatal(e)
        } else {
            WorkerError::Aborted(e.into())
        }
    }
}

/// Result of one worker run: the report survives an aborted pass.
#[derive(Debug)]
pub struct WorkerRun {
    pub report: ChannelReport,
    pub result: Result<(), WorkerError>,
}

pub struct ChannelWorker<'a> {
    ctx: &'a MirrorContext,
    pass: &'a PassState,
    activity: &'a ActivityLog,
    handle: String,
    variant: PipelineVariant,
}

impl<'a> ChannelWorker<'a> {
    pub fn new(ctx: &'a MirrorContext, pass: &'a PassState, activity: &'a ActivityLog, handle: impl Into<String>) -> Self {
        let handle = handle.into();
        let variant = ctx.variant_for(&handle);
        Self {
            ctx,
            pass,
            activity,
            handle,
            variant,
        }
    }

    pub async fn run(&self) -> WorkerRun {
        let mut report = ChannelReport::new(&self.handle);
        report.cursor_before = self.ctx.cursors.lock().await.get(&self.handle);

        let result = self.process_channel(&mut report).await;

        report.cursor_after = self.ctx.cursors.lock().await.get(&self.handle);
        match &result {
            Ok(()) => info!(
                channel = %self.handle,
                published = report.published,
                rejected = report.rejected,
                cursor = report.cursor_after,
                "channel pass finished"
            ),
            Err(e) => {
                error!(channel = %self.handle, error = %e, "channel pass stopped");
                report.error = Some(e.to_string());
                self.activity.record(&self.handle, None, format!("error: {}", e));
            }
        }
        WorkerRun { report, result }
    }

    async fn process_channel(&self, report: &mut ChannelReport) -> Result<(), WorkerError> {
        ensure_connected(self.ctx.source.as_ref(), &self.ctx.backoff).await?;

        let resolved = honor_rate_limit(self.ctx.source.resolve(&self.handle).await).await?;
        let since_id = report.cursor_before;
        let fetched = self
            .ctx
            .source
            .fetch(&resolved, since_id, self.ctx.settings.fetch_limit)
            .await;
        let mut messages = honor_rate_limit(fetched).await?;
        messages.sort_by_key(|m| m.id);
        messages.retain(|m| m.id > since_id && m.has_content());
        report.fetched = messages.len();
        info!(channel = %self.handle, since_id, candidates = messages.len(), "new messages");

        for message in messages {
            if !self.pass.claim(&self.handle, message.id) {
                debug!(channel = %self.handle, message_id = message.id, "already processed in this pass");
                continue;
            }

            match self.process_message(&message).await? {
                MessageOutcome::Published => {
                    report.published += 1;
                    self.activity.record(&self.handle, Some(message.id), "published");
                    tokio::time::sleep(self.ctx.settings.post_delay).await;
                }
                MessageOutcome::Rejected(reason) => {
                    report.rejected += 1;
                    info!(channel = %self.handle, message_id = message.id, reason = %reason, "message rejected");
                    self.activity
                        .record(&self.handle, Some(message.id), format!("rejected: {}", reason));
                }
            }
        }
        Ok(())
    }

    async fn process_message(&self, message: &RawMessage) -> Result<MessageOutcome, WorkerError> {
        let ctx = self.ctx;

        if let Err(rejection) = ctx.filter.check(message) {
            return Ok(MessageOutcome::Rejected(RejectReason::Filtered(rejection)));
        }

        let mut caption = match ctx.transformer.transform(self.variant, message.text()).await {
            TransformOutcome::Transformed(text) => text,
            TransformOutcome::Fallback(text) => {
                debug!(channel = %self.handle, message_id = message.id, "using original caption");
                text
            }
            TransformOutcome::NotApplicable => {
                return Ok(MessageOutcome::Rejected(RejectReason::NotApplicable));
            }
        };

        if let Some(ratio) = ctx.ledger.lock().await.similar_caption(&caption) {
            return Ok(MessageOutcome::Rejected(RejectReason::SimilarCaption { ratio }));
        }

        let downloaded = ctx.source.download_media(message, &ctx.settings.download_dir).await;
        let media_path = match honor_rate_limit(downloaded).await {
            Ok(path) => path,
            Err(e) if e.is_fatal() => return Err(WorkerError::Fatal(e)),
            Err(e) => {
                warn!(channel = %self.handle, message_id = message.id, error = %e, "media download failed");
                return Ok(MessageOutcome::Rejected(RejectReason::MediaUnavailable(e.to_string())));
            }
        };

        if let Some(path) = media_path.as_deref().filter(|p| media::is_video(p)) {
            if !caption.is_empty() {
                debug!(channel = %self.handle, message_id = message.id, path = %path.display(), "translating video caption");
                if let Some(translated) = ctx.transformer.translate(&caption).await.into_caption() {
                    caption = translated;
                }
            }
        }

        self.publish(message, caption, media_path).await
    }

    /// Ledger dedup, publish and state updates. Owns `media_path` from here on.
    async fn publish(
        &self,
        message: &RawMessage,
        caption: String,
        media_path: Option<PathBuf>,
    ) -> Result<MessageOutcome, WorkerError> {
        let ctx = self.ctx;

        let media_hash = match media_path.as_deref() {
            Some(path) => match media::hash_file(path).await {
                Ok(hash) => Some(hash),
                Err(e) => {
                    media::remove_quietly(path).await;
                    return Err(WorkerError::Aborted(e));
                }
            },
            None => None,
        };
        let key = ContentKey::new(caption, media_hash);

        if !ctx.ledger.lock().await.reserve(&key) {
            if let Some(path) = media_path.as_deref() {
                media::remove_quietly(path).await;
            }
            return Ok(MessageOutcome::Rejected(RejectReason::Duplicate));
        }

        let outcome = match ctx.publisher.publish(&key.caption, media_path.as_deref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                ctx.ledger.lock().await.release(&key);
                return Err(e.into());
            }
        };

        match outcome {
            PublishOutcome::Published => {
                ctx.ledger
                    .lock()
                    .await
                    .commit(key)
                    .await
                    .map_err(WorkerError::Aborted)?;
                ctx.cursors
                    .lock()
                    .await
                    .advance(&self.handle, message.id)
                    .await
                    .map_err(WorkerError::Aborted)?;
                info!(channel = %self.handle, message_id = message.id, "message mirrored");
                Ok(MessageOutcome::Published)
            }
            PublishOutcome::RateLimited { wait_secs } => {
                ctx.ledger.lock().await.release(&key);
                Ok(MessageOutcome::Rejected(RejectReason::RateLimited { wait_secs }))
            }
            PublishOutcome::Failed(reason) => {
                ctx.ledger.lock().await.release(&key);
                Ok(MessageOutcome::Rejected(RejectReason::PublishFailed(reason)))
            }
        }
    }
}
