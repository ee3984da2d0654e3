//! Rephraser and translator: adapters over the text-generation capability.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::TransformOutcome;
use crate::llm::{LlmProvider, LlmRequest};
use crate::text::truncate_to_sentence;

/// Rephrased captions longer than this are cut back.
pub const MAX_REPHRASED_CHARS: usize = 900;

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Rewrite the following channel post so it reads as an original news item. \
Keep its language, every fact and number, and reply with the rewritten text only.\n\n{caption}";

pub const DEFAULT_TRANSLATION_LANGUAGE: &str = "فارسی";

fn render_prompt(template: &str, caption: &str) -> String {
    if template.contains("{caption}") {
        template.replace("{caption}", caption)
    } else {
        format!("{}\n{}", template, caption)
    }
}

/// Rewrites captions through the LLM, memoized by exact input.
///
/// Only successful results are memoized, so a failed call is retried the next
/// time the same caption shows up. Concurrent callers with the same caption
/// share one in-flight request.
pub struct Rephraser {
    provider: Option<Arc<dyn LlmProvider>>,
    template: String,
    cache: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl Rephraser {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, template: impl Into<String>) -> Self {
        Self {
            provider,
            template: template.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cell_for(&self, caption: &str) -> Arc<OnceCell<String>> {
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cache
            .entry(caption.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub async fn rephrase(&self, caption: &str) -> TransformOutcome {
        if caption.is_empty() {
            return TransformOutcome::Transformed(String::new());
        }
        let Some(provider) = &self.provider else {
            debug!("no text-generation provider configured, keeping original caption");
            return TransformOutcome::Fallback(caption.to_string());
        };

        let cell = self.cell_for(caption);
        if let Some(cached) = cell.get() {
            debug!("rephrase cache hit");
            return TransformOutcome::Transformed(cached.clone());
        }

        let result = cell
            .get_or_try_init(|| async {
                let prompt = render_prompt(&self.template, caption);
                let response = provider.generate(LlmRequest::from_prompt(prompt)).await?;
                let text = response.content.trim().to_string();
                if text.is_empty() {
                    anyhow::bail!("empty rephrase response");
                }
                Ok::<_, anyhow::Error>(truncate_to_sentence(&text, MAX_REPHRASED_CHARS))
            })
            .await;

        match result {
            Ok(rephrased) => {
                info!(chars = rephrased.chars().count(), "caption rephrased");
                TransformOutcome::Transformed(rephrased.clone())
            }
            Err(e) => {
                warn!(error = %e, "rephrase failed, keeping original caption");
                TransformOutcome::Fallback(caption.to_string())
            }
        }
    }
}

/// Translates captions (used for video posts). Neither cached nor truncated.
pub struct Translator {
    provider: Option<Arc<dyn LlmProvider>>,
    language: String,
}

impl Translator {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, language: impl Into<String>) -> Self {
        Self {
            provider,
            language: language.into(),
        }
    }

    pub async fn translate(&self, caption: &str) -> TransformOutcome {
        if caption.is_empty() {
            return TransformOutcome::Transformed(String::new());
        }
        let Some(provider) = &self.provider else {
            return TransformOutcome::Fallback(caption.to_string());
        };

        let prompt = format!("متن زیر را به {} ترجمه کن:\n{}", self.language, caption);
        match provider.generate(LlmRequest::from_prompt(prompt)).await {
            Ok(response) if !response.content.trim().is_empty() => {
                info!("caption translated");
                TransformOutcome::Transformed(response.content.trim().to_string())
            }
            Ok(_) => {
                warn!("empty translation response, keeping original caption");
                TransformOutcome::Fallback(caption.to_string())
            }
            Err(e) => {
                warn!(error = %e, "translation failed, keeping original caption");
                TransformOutcome::Fallback(caption.to_string())
            }
        }
    }
}
