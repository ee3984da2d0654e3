//! In-memory chat network and helpers shared by the pipeline tests.
#![allow(dead_code)]

use chrono::Utc;
use common::Config;
use feedmirror::channel::{ChannelClient, ChannelError, ChannelResult, MediaRef, RawMessage};
use feedmirror::context::MirrorContext;
use feedmirror::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SentPost {
    pub target: String,
    pub caption: String,
    pub media_name: Option<String>,
    pub media_bytes: Option<Vec<u8>>,
}

#[derive(Default)]
pub struct FakeNetwork {
    messages: Mutex<HashMap<String, Vec<RawMessage>>>,
    media: Mutex<HashMap<String, Vec<u8>>>,
    fetch_errors: Mutex<HashMap<String, ChannelError>>,
    send_errors: Mutex<VecDeque<ChannelError>>,
    download_errors: Mutex<VecDeque<ChannelError>>,
    pub sent: Mutex<Vec<SentPost>>,
    fetch_delay: Mutex<Duration>,
    active_fetches: AtomicUsize,
    pub max_active_fetches: AtomicUsize,
    connected: AtomicBool,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_text(&self, channel: &str, id: i64, text: &str) {
        self.push(channel, id, Some(text), None);
    }

    /// Message carrying media; `file_name` decides the media kind.
    pub fn add_media(&self, channel: &str, id: i64, text: Option<&str>, file_name: &str, bytes: &[u8]) {
        let media_id = format!("{}-{}", channel.trim_start_matches('@'), id);
        self.media.lock().unwrap().insert(media_id.clone(), bytes.to_vec());
        self.push(
            channel,
            id,
            text,
            Some(MediaRef {
                id: media_id,
                mime_type: None,
                file_name: Some(file_name.to_string()),
            }),
        );
    }

    /// Message whose media cannot be downloaded.
    pub fn add_broken_media(&self, channel: &str, id: i64, text: &str) {
        self.push(
            channel,
            id,
            Some(text),
            Some(MediaRef {
                id: "missing".into(),
                mime_type: Some("image/jpeg".into()),
                file_name: None,
            }),
        );
    }

    fn push(&self, channel: &str, id: i64, text: Option<&str>, media: Option<MediaRef>) {
        self.messages
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(RawMessage {
                id,
                text: text.map(str::to_string),
                media,
                date: Utc::now(),
            });
    }

    pub fn fail_next_fetch(&self, channel: &str, error: ChannelError) {
        self.fetch_errors.lock().unwrap().insert(channel.to_string(), error);
    }

    pub fn fail_next_download(&self, error: ChannelError) {
        self.download_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_send(&self, error: ChannelError) {
        self.send_errors.lock().unwrap().push_back(error);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn sent(&self) -> Vec<SentPost> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_captions(&self) -> Vec<String> {
        self.sent().into_iter().map(|p| p.caption).collect()
    }
}

#[async_trait::async_trait]
impl ChannelClient for FakeNetwork {
    async fn resolve(&self, channel: &str) -> ChannelResult<String> {
        Ok(channel.to_string())
    }

    async fn fetch(&self, channel: &str, since_id: i64, limit: usize) -> ChannelResult<Vec<RawMessage>> {
        let active = self.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_fetches.fetch_max(active, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.active_fetches.fetch_sub(1, Ordering::SeqCst);

        if let Some(e) = self.fetch_errors.lock().unwrap().remove(channel) {
            return Err(e);
        }
        // newest first, like the real network
        let mut found: Vec<RawMessage> = self
            .messages
            .lock()
            .unwrap()
            .get(channel)
            .map(|all| all.iter().filter(|m| m.id > since_id).cloned().collect())
            .unwrap_or_default();
        found.sort_by_key(|m| std::cmp::Reverse(m.id));
        found.truncate(limit);
        Ok(found)
    }

    async fn fetch_one(&self, channel: &str, id: i64) -> ChannelResult<Option<RawMessage>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(channel)
            .and_then(|all| all.iter().find(|m| m.id == id).cloned()))
    }

    async fn download_media(&self, message: &RawMessage, dest_dir: &Path) -> ChannelResult<Option<PathBuf>> {
        let Some(media) = &message.media else {
            return Ok(None);
        };
        if let Some(e) = self.download_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        let bytes = self
            .media
            .lock()
            .unwrap()
            .get(&media.id)
            .cloned()
            .ok_or_else(|| ChannelError::Transport(format!("media {} unavailable", media.id)))?;
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(feedmirror::media::local_file_name(message.id, media));
        tokio::fs::write(&path, bytes).await?;
        Ok(Some(path))
    }

    async fn send(&self, target: &str, caption: &str, media: Option<&Path>) -> ChannelResult<()> {
        if let Some(e) = self.send_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        let post = SentPost {
            target: target.to_string(),
            caption: caption.to_string(),
            media_name: media.and_then(|p| p.file_name()).map(|n| n.to_string_lossy().into_owned()),
            media_bytes: media.map(|p| std::fs::read(p).expect("media exists while sending")),
        };
        self.sent.lock().unwrap().push(post);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> ChannelResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Rewrites by prefixing, translates by prefixing; fails on request.
pub struct PrefixLlm {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl PrefixLlm {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for PrefixLlm {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("LLM API error 503 Service Unavailable");
        }
        let content = match request.prompt.split_once('\n') {
            Some((head, body)) if head.starts_with("متن زیر را به") => format!("translated: {}", body),
            _ => format!("rephrased: {}", request.prompt.rsplit("\n\n").next().unwrap_or_default()),
        };
        Ok(LlmResponse {
            content,
            usage: UsageMetadata::default(),
            model: "prefix".into(),
        })
    }
}

pub const SIGNATURE: &str = "@mirror";

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub network: Arc<FakeNetwork>,
    pub ctx: Arc<MirrorContext>,
}

impl Harness {
    /// `channels` are `(handle, variant)` pairs.
    pub async fn new(channels: &[(&str, &str)], concurrency: usize, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let network = FakeNetwork::new();
        let ctx = Self::context(&dir, &network, channels, concurrency, llm).await;
        Self { dir, network, ctx }
    }

    async fn context(
        dir: &tempfile::TempDir,
        network: &Arc<FakeNetwork>,
        channels: &[(&str, &str)],
        concurrency: usize,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Arc<MirrorContext> {
        let root = dir.path().display();
        let mut toml = format!(
            r#"
            [mirror]
            target_channel = "@mirror"
            signature = "{SIGNATURE}"
            post_delay_seconds = 0
            max_concurrent_channels = {concurrency}
            min_message_length = 20
            ad_keywords = ["promo code"]
            cursor_file = "{root}/ids.json"
            ledger_file = "{root}/posted.json"
            download_dir = "{root}/downloads"

            [llm]
            prompt_template = "Rewrite:\n\n{{caption}}"

            [bridge]
            base_url = "http://127.0.0.1:9"

            [connection]
            max_attempts = 2
            initial_delay_seconds = 0
            "#
        );
        for (handle, variant) in channels {
            toml.push_str(&format!("\n[[channels]]\nhandle = \"{}\"\nvariant = \"{}\"\n", handle, variant));
        }
        let config = Config::from_toml_str(&toml).expect("test config");
        let client: Arc<dyn ChannelClient> = network.clone();
        Arc::new(
            MirrorContext::from_config(&config, client.clone(), client, llm)
                .await
                .expect("context"),
        )
    }

    /// Fresh context over the same state files, as after a restart.
    pub async fn restart(&mut self, channels: &[(&str, &str)]) {
        self.ctx = Self::context(&self.dir, &self.network, channels, 3, None).await;
    }

    pub fn download_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    pub async fn cursor(&self, channel: &str) -> i64 {
        self.ctx.cursors.lock().await.get(channel)
    }

    pub async fn ledger_len(&self) -> usize {
        self.ctx.ledger.lock().await.len()
    }

    /// Files left behind in the download directory.
    pub fn leftover_media(&self) -> usize {
        std::fs::read_dir(self.download_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn signed(caption: &str) -> String {
    format!("{}\n{}", caption, SIGNATURE)
}
