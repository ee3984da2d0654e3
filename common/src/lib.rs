/*!
common/src/lib.rs

Shared configuration types and state-file helpers for feedmirror.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an override file
- Helpers to load and atomically rewrite the JSON state files
*/

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline variant applied to every message of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineVariant {
    /// Free text, rewritten through the text-generation capability.
    #[default]
    Rephrase,
    /// Market-rate bulletins, reformatted deterministically.
    Currency,
}

impl PipelineVariant {
    /// Variant configured for `handle`, `Rephrase` when unknown.
    pub fn for_channel(channels: &[ChannelConfig], handle: &str) -> Self {
        channels
            .iter()
            .find(|c| c.handle == handle)
            .map(|c| c.variant)
            .unwrap_or_default()
    }
}

/// One source channel to mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Public handle, e.g. "@somechannel"
    pub handle: String,
    #[serde(default)]
    pub variant: PipelineVariant,
}

/// Core mirroring options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Destination channel handle
    pub target_channel: String,
    /// Signature appended to every published caption
    pub signature: String,
    pub post_delay_seconds: Option<u64>,
    pub max_concurrent_channels: Option<usize>,
    pub fetch_limit: Option<usize>,
    pub min_message_length: Option<usize>,
    #[serde(default)]
    pub ad_keywords: Vec<String>,
    pub cursor_file: Option<String>,
    pub ledger_file: Option<String>,
    pub download_dir: Option<String>,
    pub activity_log_capacity: Option<usize>,
}

impl MirrorConfig {
    pub fn post_delay_seconds(&self) -> u64 {
        self.post_delay_seconds.unwrap_or(10)
    }

    pub fn max_concurrent_channels(&self) -> usize {
        self.max_concurrent_channels.unwrap_or(3).max(1)
    }

    pub fn fetch_limit(&self) -> usize {
        self.fetch_limit.unwrap_or(10)
    }

    pub fn min_message_length(&self) -> usize {
        self.min_message_length.unwrap_or(20)
    }

    pub fn cursor_file(&self) -> PathBuf {
        PathBuf::from(self.cursor_file.as_deref().unwrap_or("data/last_message_ids.json"))
    }

    pub fn ledger_file(&self) -> PathBuf {
        PathBuf::from(self.ledger_file.as_deref().unwrap_or("data/posted_content.json"))
    }

    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(self.download_dir.as_deref().unwrap_or("data/downloads"))
    }

    pub fn activity_log_capacity(&self) -> usize {
        self.activity_log_capacity.unwrap_or(500)
    }
}

/// Remote LLM endpoint config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "gemini", "none"
    pub remote: Option<RemoteLlmConfig>,
    /// Rephrase prompt; `{caption}` is replaced by the source text
    pub prompt_template: Option<String>,
    /// Target language name used by the video-caption translator
    pub translation_language: Option<String>,
}

/// JSON-over-HTTP bridge to the chat network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub base_url: String,
    /// Name of the env var holding the bridge bearer token
    pub token_env: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Reconnect backoff options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay_seconds: Option<u64>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    pub llm: Option<LlmConfig>,
    pub bridge: BridgeConfig,
    /// Optional distinct bridge used for publishing (defaults to `bridge`)
    pub publish_bridge: Option<BridgeConfig>,
    pub connection: Option<ConnectionConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::from_toml_str(&data)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(data: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for (label, path) in [("default", default_path), ("override", override_path)] {
            let Some(path) = path else { continue };
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {} config: {}", label, path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse {} configuration", label))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn variant_for(&self, handle: &str) -> PipelineVariant {
        PipelineVariant::for_channel(&self.channels, handle)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Create the parent directory of `path` if it has one.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Read a JSON state file. A missing file is created holding `T::default()`.
///
/// A file that exists but cannot be parsed is an error: silently starting from
/// an empty state would re-publish everything.
pub async fn load_json_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    match tokio::fs::read_to_string(path).await {
        Ok(data) => serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse state file: {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let value = T::default();
            write_json_atomic(path, &value).await?;
            Ok(value)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read state file: {}", path.display())),
    }
}

/// Serialize `value` and replace `path` with it atomically (temp file + rename).
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path).await?;
    let data = serde_json::to_vec(value).context("Failed to serialize state")?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("Failed to write temp state file: {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to replace state file: {}", path.display()))?;
    Ok(())
}
