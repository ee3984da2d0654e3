use std::fmt;

use crate::channel::RawMessage;

/// Why a message was refused before any transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRejection {
    TooShort { len: usize, min: usize },
    Advertisement { keyword: String },
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRejection::TooShort { len, min } => {
                write!(f, "text too short ({} < {} chars) and no media", len, min)
            }
            FilterRejection::Advertisement { keyword } => {
                write!(f, "advertisement keyword '{}'", keyword)
            }
        }
    }
}

/// Length and advertisement gate.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    min_length: usize,
    /// Lowercased once at construction
    ad_keywords: Vec<String>,
}

impl ContentFilter {
    pub fn new(min_length: usize, ad_keywords: &[String]) -> Self {
        Self {
            min_length,
            ad_keywords: ad_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Short text passes only when media is attached; any ad keyword rejects.
    pub fn check(&self, message: &RawMessage) -> Result<(), FilterRejection> {
        let text = message.text();
        let len = text.chars().count();
        if len < self.min_length && !message.has_media() {
            return Err(FilterRejection::TooShort {
                len,
                min: self.min_length,
            });
        }

        if let Some(keyword) = self.advertisement_keyword(text) {
            return Err(FilterRejection::Advertisement {
                keyword: keyword.to_string(),
            });
        }
        Ok(())
    }

    fn advertisement_keyword(&self, text: &str) -> Option<&str> {
        if text.is_empty() {
            return None;
        }
        let lowered = text.to_lowercase();
        self.ad_keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
    }
}
