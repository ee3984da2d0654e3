/*
feedmirror - main.rs
Mirrors source channels into one destination channel: a single pass, a
periodic watch loop, or an on-demand repost of links.
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use feedmirror::channel::http::HttpChannelClient;
use feedmirror::channel::ChannelClient;
use feedmirror::context::MirrorContext;
use feedmirror::links::{self, LinkReposter};
use feedmirror::llm::gemini::{GeminiLlmProvider, DEFAULT_GEMINI_URL};
use feedmirror::llm::remote::RemoteLlmProvider;
use feedmirror::llm::LlmProvider;
use feedmirror::orchestrator::{PassReport, ScrapeOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "feedmirror", about = "Mirror chat channels into one destination channel")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single pass over every configured channel
    Run,
    /// Run passes periodically until ctrl-c
    Watch {
        #[arg(long, default_value_t = 60)]
        interval_minutes: u64,
    },
    /// Repost channel post links or external pages
    Repost {
        /// Links, or text containing links
        #[arg(required = true)]
        links: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, channels = config.channels.len(), "configuration loaded");

    // working area: state files are created by their loaders
    let download_dir = config.mirror.download_dir();
    tokio::fs::create_dir_all(&download_dir)
        .await
        .with_context(|| format!("Failed to create download dir: {}", download_dir.display()))?;

    let llm: Option<Arc<dyn LlmProvider>> = match config.llm.as_ref() {
        Some(llm_config) => match create_llm_provider(llm_config) {
            Ok(provider) => provider,
            Err(e) => {
                error!("Failed to initialize LLM provider: {:#}", e);
                None
            }
        },
        None => None,
    };
    if llm.is_none() {
        warn!("no text-generation provider, captions are published unchanged");
    }

    let source: Arc<dyn ChannelClient> = Arc::new(HttpChannelClient::from_config(&config.bridge)?);
    let publish_client: Arc<dyn ChannelClient> = match config.publish_bridge.as_ref() {
        Some(bridge) => Arc::new(HttpChannelClient::from_config(bridge)?),
        None => source.clone(),
    };

    let ctx = Arc::new(MirrorContext::from_config(&config, source, publish_client, llm).await?);

    match args.command {
        Command::Run => {
            let orchestrator = ScrapeOrchestrator::new(ctx);
            let report = orchestrator.run_pass().await?;
            log_report(&report);
        }
        Command::Watch { interval_minutes } => {
            run_watch(ctx, Duration::from_secs(interval_minutes.max(1) * 60)).await?;
        }
        Command::Repost { links: inputs } => {
            let timeout_secs = config.bridge.timeout_seconds.unwrap_or(30);
            let reposter = LinkReposter::new(&ctx, timeout_secs)?;
            for input in &inputs {
                let mut found = links::extract_links(input);
                if found.is_empty() {
                    found.push(input.clone());
                }
                for link in found {
                    let outcome = reposter.repost(&link).await?;
                    info!(link = %link, outcome = ?outcome, "repost finished");
                }
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Pass loop. A shutdown request is observed between passes.
async fn run_watch(ctx: Arc<MirrorContext>, interval: Duration) -> Result<()> {
    let shutdown_notify = Arc::new(Notify::new());
    let signal_notify = shutdown_notify.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping after the current pass");
            signal_notify.notify_one();
        }
    });

    let orchestrator = ScrapeOrchestrator::new(ctx);
    loop {
        let report = orchestrator.run_pass().await?;
        log_report(&report);

        info!(minutes = interval.as_secs() / 60, "waiting for next pass");
        tokio::select! {
            _ = shutdown_notify.notified() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    Ok(())
}

fn log_report(report: &PassReport) {
    for channel in &report.channels {
        match &channel.error {
            Some(e) => warn!(
                channel = %channel.channel,
                published = channel.published,
                error = %e,
                "channel failed"
            ),
            None => info!(
                channel = %channel.channel,
                candidates = channel.fetched,
                published = channel.published,
                rejected = channel.rejected,
                cursor_before = channel.cursor_before,
                cursor_after = channel.cursor_after,
                "channel summary"
            ),
        }
    }
    let elapsed = report.finished_at - report.started_at;
    info!(
        published = report.published(),
        rejected = report.rejected(),
        seconds = elapsed.num_seconds(),
        "pass summary"
    );
}

/// Create the text-generation provider selected by `llm.adapter`.
/// `Ok(None)` when the adapter is "none".
fn create_llm_provider(llm_config: &common::LlmConfig) -> anyhow::Result<Option<Arc<dyn LlmProvider>>> {
    let adapter = llm_config.adapter.as_deref().unwrap_or("none");
    if adapter == "none" {
        return Ok(None);
    }

    let remote_config = llm_config
        .remote
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("{} adapter selected but no [llm.remote] config found", adapter))?;
    let api_key_env = remote_config
        .api_key_env
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Missing api_key_env in remote config"))?;
    let api_key = std::env::var(api_key_env)
        .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;
    let timeout_secs = remote_config.timeout_seconds.unwrap_or(30);
    let max_tokens = remote_config.max_tokens.unwrap_or(1024);

    let provider: Arc<dyn LlmProvider> = match adapter {
        "remote" => {
            let model = remote_config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            let api_url = remote_config
                .api_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/v1/chat/completions".to_string());
            Arc::new(RemoteLlmProvider::new(api_url, api_key, model).with_defaults(timeout_secs, max_tokens, 0.7))
        }
        "gemini" => {
            let model = remote_config.model.clone().unwrap_or_else(|| "gemini-1.5-flash".to_string());
            let api_url = remote_config
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string());
            Arc::new(GeminiLlmProvider::new(api_url, api_key, model).with_defaults(timeout_secs, max_tokens))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    };
    info!(adapter, model = ?remote_config.model, "LLM provider initialized");
    Ok(Some(provider))
}
