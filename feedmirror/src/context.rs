//! Everything a pass needs, built once from configuration and shared by all
//! workers of a run.

use anyhow::Result;
use common::{ChannelConfig, Config, PipelineVariant};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::channel::resilience::BackoffPolicy;
use crate::channel::ChannelClient;
use crate::cursor::CursorStore;
use crate::filter::ContentFilter;
use crate::ledger::ContentLedger;
use crate::llm::LlmProvider;
use crate::media::{MediaProcessor, PassthroughMediaProcessor};
use crate::publisher::Publisher;
use crate::transform::rephrase::{DEFAULT_PROMPT_TEMPLATE, DEFAULT_TRANSLATION_LANGUAGE};
use crate::transform::CaptionTransformer;

/// Pass-level tunables resolved from `[mirror]`.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub fetch_limit: usize,
    pub post_delay: Duration,
    pub download_dir: PathBuf,
    pub max_concurrent_channels: usize,
    pub activity_log_capacity: usize,
}

impl MirrorSettings {
    pub fn from_config(cfg: &common::MirrorConfig) -> Self {
        Self {
            fetch_limit: cfg.fetch_limit(),
            post_delay: Duration::from_secs(cfg.post_delay_seconds()),
            download_dir: cfg.download_dir(),
            max_concurrent_channels: cfg.max_concurrent_channels(),
            activity_log_capacity: cfg.activity_log_capacity(),
        }
    }
}

pub struct MirrorContext {
    pub settings: MirrorSettings,
    pub channels: Vec<ChannelConfig>,
    pub filter: ContentFilter,
    pub transformer: CaptionTransformer,
    /// Client used to read source channels
    pub source: Arc<dyn ChannelClient>,
    pub publisher: Publisher,
    pub backoff: BackoffPolicy,
    pub ledger: Arc<Mutex<ContentLedger>>,
    pub cursors: Arc<Mutex<CursorStore>>,
}

impl MirrorContext {
    /// Build the context and load both state files.
    ///
    /// `publish_client` may be the same instance as `source`.
    pub async fn from_config(
        config: &Config,
        source: Arc<dyn ChannelClient>,
        publish_client: Arc<dyn ChannelClient>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Result<Self> {
        Self::with_media_processor(config, source, publish_client, llm, Arc::new(PassthroughMediaProcessor)).await
    }

    pub async fn with_media_processor(
        config: &Config,
        source: Arc<dyn ChannelClient>,
        publish_client: Arc<dyn ChannelClient>,
        llm: Option<Arc<dyn LlmProvider>>,
        media_processor: Arc<dyn MediaProcessor>,
    ) -> Result<Self> {
        let mirror = &config.mirror;
        let backoff = BackoffPolicy::from_config(config.connection.as_ref());

        let prompt_template = config
            .llm
            .as_ref()
            .and_then(|l| l.prompt_template.as_deref())
            .unwrap_or(DEFAULT_PROMPT_TEMPLATE);
        let translation_language = config
            .llm
            .as_ref()
            .and_then(|l| l.translation_language.as_deref())
            .unwrap_or(DEFAULT_TRANSLATION_LANGUAGE);

        let ledger = ContentLedger::load(mirror.ledger_file()).await?;
        let cursors = CursorStore::load(mirror.cursor_file()).await?;

        Ok(Self {
            settings: MirrorSettings::from_config(mirror),
            channels: config.channels.clone(),
            filter: ContentFilter::new(mirror.min_message_length(), &mirror.ad_keywords),
            transformer: CaptionTransformer::with_provider(llm, prompt_template, translation_language),
            source,
            publisher: Publisher::new(
                publish_client,
                mirror.target_channel.clone(),
                mirror.signature.clone(),
                media_processor,
                backoff,
            ),
            backoff,
            ledger: Arc::new(Mutex::new(ledger)),
            cursors: Arc::new(Mutex::new(cursors)),
        })
    }

    pub fn variant_for(&self, handle: &str) -> PipelineVariant {
        PipelineVariant::for_channel(&self.channels, handle)
    }
}
