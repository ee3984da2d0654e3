//! Bounded-concurrency fan-out of channel workers, one pass at a time.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::channel::ChannelError;
use crate::context::MirrorContext;
use crate::worker::{ChannelWorker, WorkerError, WorkerRun};

/// Message ids claimed during the current pass, keyed by channel.
#[derive(Default)]
pub struct PassState {
    processed: Mutex<HashSet<(String, i64)>>,
}

impl PassState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` the first time `(channel, id)` is claimed in this pass.
    pub fn claim(&self, channel: &str, id: i64) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((channel.to_string(), id))
    }

    pub fn len(&self) -> usize {
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub channel: String,
    pub message_id: Option<i64>,
    pub event: String,
}

/// Ring buffer of recent pipeline events; the oldest entry is dropped when full.
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<ActivityEntry>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, channel: &str, message_id: Option<i64>, event: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(ActivityEntry {
            at: Utc::now(),
            channel: channel.to_string(),
            message_id,
            event: event.into(),
        });
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelReport {
    pub channel: String,
    pub cursor_before: i64,
    pub cursor_after: i64,
    /// Candidates after the cursor and content checks
    pub fetched: usize,
    pub published: usize,
    pub rejected: usize,
    pub error: Option<String>,
}

impl ChannelReport {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub channels: Vec<ChannelReport>,
}

impl PassReport {
    pub fn published(&self) -> usize {
        self.channels.iter().map(|c| c.published).sum()
    }

    pub fn rejected(&self) -> usize {
        self.channels.iter().map(|c| c.rejected).sum()
    }

    pub fn failed_channels(&self) -> impl Iterator<Item = &ChannelReport> {
        self.channels.iter().filter(|c| c.error.is_some())
    }

    pub fn channel(&self, handle: &str) -> Option<&ChannelReport> {
        self.channels.iter().find(|c| c.channel == handle)
    }
}

pub struct ScrapeOrchestrator {
    ctx: Arc<MirrorContext>,
    activity: Arc<ActivityLog>,
}

impl ScrapeOrchestrator {
    pub fn new(ctx: Arc<MirrorContext>) -> Self {
        let activity = Arc::new(ActivityLog::new(ctx.settings.activity_log_capacity));
        Self { ctx, activity }
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// One pass over every configured channel, at most
    /// `max_concurrent_channels` at a time.
    ///
    /// Returns only after every worker has finished. A channel failure is
    /// recorded in the report; a fatal channel error is returned instead,
    /// once all workers are done.
    pub async fn run_pass(&self) -> Result<PassReport, ChannelError> {
        let started_at = Utc::now();
        let pass = Arc::new(PassState::new());
        let semaphore = Arc::new(Semaphore::new(self.ctx.settings.max_concurrent_channels));
        info!(
            channels = self.ctx.channels.len(),
            concurrency = self.ctx.settings.max_concurrent_channels,
            "starting pass"
        );

        let mut handles = Vec::with_capacity(self.ctx.channels.len());
        for channel in &self.ctx.channels {
            let handle = channel.handle.clone();
            let ctx = self.ctx.clone();
            let pass = pass.clone();
            let activity = self.activity.clone();
            let semaphore = semaphore.clone();

            let task = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let mut report = ChannelReport::new(&handle);
                        report.error = Some(e.to_string());
                        return WorkerRun {
                            report,
                            result: Err(WorkerError::Aborted(e.into())),
                        };
                    }
                };
                ChannelWorker::new(&ctx, &pass, &activity, handle).run().await
            });
            handles.push((channel.handle.clone(), task));
        }

        let mut channels = Vec::with_capacity(handles.len());
        let mut fatal = None;
        for (handle, task) in handles {
            match task.await {
                Ok(run) => {
                    if let Err(WorkerError::Fatal(e)) = run.result {
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                    channels.push(run.report);
                }
                Err(join_err) => {
                    error!(channel = %handle, error = %join_err, "worker task panicked");
                    let mut report = ChannelReport::new(&handle);
                    report.error = Some(format!("worker task failed: {}", join_err));
                    channels.push(report);
                }
            }
        }

        let report = PassReport {
            started_at,
            finished_at: Utc::now(),
            channels,
        };
        info!(
            published = report.published(),
            rejected = report.rejected(),
            failed_channels = report.failed_channels().count(),
            messages_seen = pass.len(),
            "pass finished"
        );

        match fatal {
            Some(e) => {
                warn!(error = %e, "fatal channel error, stopping");
                Err(e)
            }
            None => Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_are_per_channel() {
        let pass = PassState::new();
        assert!(pass.claim("@a", 5));
        assert!(!pass.claim("@a", 5));
        assert!(pass.claim("@b", 5));
        assert_eq!(pass.len(), 2);
    }

    #[test]
    fn activity_log_drops_oldest() {
        let log = ActivityLog::new(3);
        for id in 1..=5 {
            log.record("@news", Some(id), "published");
        }
        let ids: Vec<_> = log.entries().iter().filter_map(|e| e.message_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn report_totals() {
        let mut a = ChannelReport::new("@a");
        a.published = 2;
        a.rejected = 1;
        let mut b = ChannelReport::new("@b");
        b.rejected = 4;
        b.error = Some("boom".into());
        let report = PassReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            channels: vec![a, b],
        };
        assert_eq!(report.published(), 2);
        assert_eq!(report.rejected(), 5);
        assert_eq!(report.failed_channels().count(), 1);
        assert_eq!(report.channel("@b").and_then(|c| c.error.as_deref()), Some("boom"));
    }
}
