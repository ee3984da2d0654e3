//! Content ledger: every published (caption, media hash) pair plus the
//! captions used for near-duplicate detection.
//!
//! The ledger is rewritten wholesale after each publish and is never pruned;
//! history grows without bound.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, info};

/// Captions at least this similar to a published one are treated as repeats.
pub const SIMILARITY_THRESHOLD: f64 = 0.85;

/// Identity of published content: final caption and media hash (if any).
///
/// Persisted as a two-element JSON array `[caption, hash | null]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, Option<String>)", into = "(String, Option<String>)")]
pub struct ContentKey {
    pub caption: String,
    pub media_hash: Option<String>,
}

impl ContentKey {
    pub fn new(caption: impl Into<String>, media_hash: Option<String>) -> Self {
        Self {
            caption: caption.into(),
            media_hash,
        }
    }
}

impl From<(String, Option<String>)> for ContentKey {
    fn from((caption, media_hash): (String, Option<String>)) -> Self {
        Self { caption, media_hash }
    }
}

impl From<ContentKey> for (String, Option<String>) {
    fn from(key: ContentKey) -> Self {
        (key.caption, key.media_hash)
    }
}

/// Normalized edit-distance similarity: symmetric, 1.0 for identical strings.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

pub struct ContentLedger {
    path: PathBuf,
    keys: BTreeSet<ContentKey>,
    captions: HashSet<String>,
    /// Keys whose publish is under way; they are not part of the ledger.
    in_flight: HashSet<ContentKey>,
}

impl ContentLedger {
    /// Load the ledger at `path`, creating an empty one if missing.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let keys: BTreeSet<ContentKey> = common::load_json_or_default(&path).await?;
        let captions = keys
            .iter()
            .filter(|k| !k.caption.is_empty())
            .map(|k| k.caption.clone())
            .collect();
        info!(path = %path.display(), entries = keys.len(), "content ledger loaded");
        Ok(Self {
            path,
            keys,
            captions,
            in_flight: HashSet::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        self.keys.contains(key)
    }

    /// Highest similarity ratio against a historical caption, when it reaches
    /// [`SIMILARITY_THRESHOLD`]. Empty captions are never compared.
    pub fn similar_caption(&self, caption: &str) -> Option<f64> {
        if caption.is_empty() {
            return None;
        }
        self.captions
            .iter()
            .map(|old| similarity_ratio(caption, old))
            .find(|ratio| *ratio >= SIMILARITY_THRESHOLD)
    }

    /// Claim `key` for publishing. `false` if it is already published or
    /// claimed by another worker.
    pub fn reserve(&mut self, key: &ContentKey) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        self.in_flight.insert(key.clone())
    }

    /// Drop a claim after a failed publish.
    pub fn release(&mut self, key: &ContentKey) {
        self.in_flight.remove(key);
    }

    /// Record a successful publish and persist the ledger.
    pub async fn commit(&mut self, key: ContentKey) -> Result<()> {
        self.in_flight.remove(&key);
        if !key.caption.is_empty() {
            self.captions.insert(key.caption.clone());
        }
        self.keys.insert(key);
        self.persist().await
    }

    pub async fn persist(&self) -> Result<()> {
        common::write_json_atomic(&self.path, &self.keys).await?;
        debug!(entries = self.keys.len(), "content ledger saved");
        Ok(())
    }
}
