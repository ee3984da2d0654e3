use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Last processed message id per channel handle, persisted as a JSON object.
pub struct CursorStore {
    path: PathBuf,
    cursors: BTreeMap<String, i64>,
}

impl CursorStore {
    /// Load cursors from `path`, creating an empty file if missing.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cursors: BTreeMap<String, i64> = common::load_json_or_default(&path).await?;
        info!(path = %path.display(), channels = cursors.len(), "cursors loaded");
        Ok(Self { path, cursors })
    }

    /// Cursor for `channel`; 0 when the channel has never published.
    pub fn get(&self, channel: &str) -> i64 {
        self.cursors.get(channel).copied().unwrap_or(0)
    }

    /// Move the cursor forward to `id` and persist. Ids at or behind the
    /// current cursor are ignored and `false` is returned.
    ///
    /// The in-memory value changes only once the file is written.
    pub async fn advance(&mut self, channel: &str, id: i64) -> Result<bool> {
        let current = self.get(channel);
        if id <= current {
            debug!(channel, id, current, "cursor not advanced");
            return Ok(false);
        }

        let mut next = self.cursors.clone();
        next.insert(channel.to_string(), id);
        common::write_json_atomic(&self.path, &next).await?;
        self.cursors = next;
        debug!(channel, from = current, to = id, "cursor advanced");
        Ok(true)
    }
}
