//! Caption transformation, dispatched on the channel's pipeline variant.

use std::sync::Arc;

use common::PipelineVariant;

use crate::llm::LlmProvider;

pub mod currency;
pub mod rephrase;

pub use currency::CurrencyFormatter;
pub use rephrase::{Rephraser, Translator};

/// Result of a caption transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    Transformed(String),
    /// The capability failed; the original text is carried forward.
    Fallback(String),
    /// The strategy does not handle this input; the message must be skipped.
    NotApplicable,
}

impl TransformOutcome {
    pub fn into_caption(self) -> Option<String> {
        match self {
            TransformOutcome::Transformed(s) | TransformOutcome::Fallback(s) => Some(s),
            TransformOutcome::NotApplicable => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, TransformOutcome::Fallback(_))
    }
}

/// The closed set of caption strategies.
pub struct CaptionTransformer {
    currency: CurrencyFormatter,
    rephraser: Rephraser,
    translator: Translator,
}

impl CaptionTransformer {
    pub fn new(rephraser: Rephraser, translator: Translator) -> Self {
        Self {
            currency: CurrencyFormatter,
            rephraser,
            translator,
        }
    }

    /// Rephraser and translator sharing one provider.
    pub fn with_provider(
        provider: Option<Arc<dyn LlmProvider>>,
        prompt_template: &str,
        translation_language: &str,
    ) -> Self {
        Self::new(
            Rephraser::new(provider.clone(), prompt_template),
            Translator::new(provider, translation_language),
        )
    }

    pub async fn transform(&self, variant: PipelineVariant, text: &str) -> TransformOutcome {
        match variant {
            PipelineVariant::Currency => match self.currency.format(text) {
                Some(formatted) => TransformOutcome::Transformed(formatted),
                None => TransformOutcome::NotApplicable,
            },
            PipelineVariant::Rephrase => self.rephraser.rephrase(text).await,
        }
    }

    pub async fn translate(&self, text: &str) -> TransformOutcome {
        self.translator.translate(text).await
    }
}
