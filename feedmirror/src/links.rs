//! On-demand repost of individual links.
//!
//! A channel post link (`t.me/<channel>/<id>`) is fetched through the source
//! client and run through the channel's caption strategy. Any other page is
//! fetched over HTTP and mirrored from its Open Graph tags. Neither path goes
//! through the filter or the ledger.

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::channel::resilience::{ensure_connected, honor_rate_limit};
use crate::channel::ChannelError;
use crate::context::MirrorContext;
use crate::media;
use crate::publisher::PublishOutcome;
use crate::transform::TransformOutcome;

static RE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static RE_POST_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?(?:t|telegram)\.me/(?:s/)?([A-Za-z0-9_]+)/(\d+)").unwrap()
});

/// Every `http(s)://` link in free text, in order of appearance.
pub fn extract_links(text: &str) -> Vec<String> {
    RE_URL.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    ChannelPost { channel: String, id: i64 },
    External(Url),
}

/// Classify a link; `None` when it is not a usable URL.
pub fn classify(link: &str) -> Option<LinkTarget> {
    if let Some(caps) = RE_POST_LINK.captures(link) {
        let id = caps[2].parse().ok()?;
        return Some(LinkTarget::ChannelPost {
            channel: format!("@{}", &caps[1]),
            id,
        });
    }
    let url = Url::parse(link).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(LinkTarget::External(url))
}

/// Media and caption advertised by a page's Open Graph tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenGraph {
    /// `og:video` when present, otherwise `og:image`
    pub media_url: Option<Url>,
    pub description: Option<String>,
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[property="{}"]"#, property)).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

pub fn parse_open_graph(html: &str, page_url: &Url) -> OpenGraph {
    let document = Html::parse_document(html);
    let media_url = meta_content(&document, "og:video")
        .or_else(|| meta_content(&document, "og:image"))
        .and_then(|raw| page_url.join(&raw).ok());
    OpenGraph {
        media_url,
        description: meta_content(&document, "og:description"),
    }
}

fn external_file_name(url: &Url) -> String {
    let base = url
        .path_segments()
        .and_then(|s| s.last())
        .filter(|s| !s.is_empty())
        .unwrap_or("media");
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("external_{}_{}", &nonce[..8], base)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepostOutcome {
    Published,
    Skipped(String),
    RateLimited { wait_secs: u64 },
    Failed(String),
}

impl From<PublishOutcome> for RepostOutcome {
    fn from(outcome: PublishOutcome) -> Self {
        match outcome {
            PublishOutcome::Published => RepostOutcome::Published,
            PublishOutcome::RateLimited { wait_secs } => RepostOutcome::RateLimited { wait_secs },
            PublishOutcome::Failed(reason) => RepostOutcome::Failed(reason),
        }
    }
}

pub struct LinkReposter<'a> {
    ctx: &'a MirrorContext,
    http: Client,
}

impl<'a> LinkReposter<'a> {
    pub fn new(ctx: &'a MirrorContext, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("feedmirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { ctx, http })
    }

    /// Repost one link. Only fatal channel errors are returned as `Err`.
    pub async fn repost(&self, link: &str) -> Result<RepostOutcome, ChannelError> {
        match classify(link) {
            Some(LinkTarget::ChannelPost { channel, id }) => self.repost_channel_post(&channel, id).await,
            Some(LinkTarget::External(url)) => self.repost_external(&url).await,
            None => Ok(RepostOutcome::Skipped(format!("not a link: {}", link))),
        }
    }

    async fn repost_channel_post(&self, channel: &str, id: i64) -> Result<RepostOutcome, ChannelError> {
        let ctx = self.ctx;
        info!(channel, message_id = id, "reposting channel post");

        let fetched = async {
            ensure_connected(ctx.source.as_ref(), &ctx.backoff).await?;
            let resolved = honor_rate_limit(ctx.source.resolve(channel).await).await?;
            honor_rate_limit(ctx.source.fetch_one(&resolved, id).await).await
        }
        .await;
        let message = match fetched {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(RepostOutcome::Skipped("message not found".into())),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(RepostOutcome::Failed(e.to_string())),
        };

        let caption = match ctx.transformer.transform(ctx.variant_for(channel), message.text()).await {
            TransformOutcome::NotApplicable => {
                return Ok(RepostOutcome::Skipped("not applicable to channel variant".into()));
            }
            other => other.into_caption().unwrap_or_default(),
        };

        let downloaded = ctx.source.download_media(&message, &ctx.settings.download_dir).await;
        let media_path = match honor_rate_limit(downloaded).await {
            Ok(path) => path,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(RepostOutcome::Failed(format!("media download failed: {}", e))),
        };

        self.finish(caption, media_path).await
    }

    async fn repost_external(&self, url: &Url) -> Result<RepostOutcome, ChannelError> {
        info!(url = %url, "reposting external link");
        let html = match self.fetch_page(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %url, error = %e, "failed to fetch external page");
                return Ok(RepostOutcome::Failed(format!("{:#}", e)));
            }
        };

        let og = parse_open_graph(&html, url);
        let caption = og.description.unwrap_or_default();
        let media_path = match &og.media_url {
            Some(media_url) => match self.download(media_url, &self.ctx.settings.download_dir).await {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(url = %media_url, error = %e, "external media unavailable, posting text only");
                    None
                }
            },
            None => None,
        };

        if caption.is_empty() && media_path.is_none() {
            return Ok(RepostOutcome::Skipped("page has no Open Graph content".into()));
        }
        self.finish(caption, media_path).await
    }

    /// Translate video captions, then publish.
    async fn finish(&self, mut caption: String, media_path: Option<PathBuf>) -> Result<RepostOutcome, ChannelError> {
        if media_path.as_deref().is_some_and(media::is_video) && !caption.is_empty() {
            if let Some(translated) = self.ctx.transformer.translate(&caption).await.into_caption() {
                caption = translated;
            }
        }
        let outcome = self.ctx.publisher.publish(&caption, media_path.as_deref()).await?;
        Ok(outcome.into())
    }

    async fn fetch_page(&self, url: &Url) -> Result<String> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .context("failed to fetch page")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("page fetch failed with status: {}", status);
        }
        response.text().await.context("failed to read page body")
    }

    async fn download(&self, url: &Url, dest_dir: &Path) -> Result<PathBuf> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .context("failed to fetch media")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("media fetch failed with status: {}", status);
        }
        let bytes = response.bytes().await.context("failed to read media body")?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        let path = dest_dir.join(external_file_name(url));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), bytes = bytes.len(), "external media downloaded");
        Ok(path)
    }
}
