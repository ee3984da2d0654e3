use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChannelClient, ChannelError, ChannelResult};

/// Reconnect schedule: `initial_delay`, doubled after every failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(cfg: Option<&common::ConnectionConfig>) -> Self {
        let defaults = Self::default();
        let Some(cfg) = cfg else { return defaults };
        Self {
            max_attempts: cfg.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_delay: cfg
                .initial_delay_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.initial_delay),
        }
    }
}

/// Sleep out the wait carried by a [`ChannelError::RateLimited`] result.
///
/// The result is handed back unchanged so callers still decide the outcome.
pub async fn honor_rate_limit<T>(result: ChannelResult<T>) -> ChannelResult<T> {
    if let Err(ChannelError::RateLimited { wait_secs }) = &result {
        warn!(wait_secs, "rate limited, waiting before continuing");
        tokio::time::sleep(Duration::from_secs(*wait_secs)).await;
    }
    result
}

/// Make sure `client` is connected before use.
///
/// Returns immediately when already connected. Exhausting the attempts yields
/// [`ChannelError::ConnectionExhausted`], which is fatal for this client.
/// An authorization failure is returned as-is without further attempts.
pub async fn ensure_connected(client: &dyn ChannelClient, policy: &BackoffPolicy) -> ChannelResult<()> {
    if client.is_connected() {
        debug!("connection already established");
        return Ok(());
    }

    let mut delay = policy.initial_delay;
    for attempt in 1..=policy.max_attempts {
        info!(attempt, max_attempts = policy.max_attempts, "connecting");
        match client.connect().await {
            Ok(()) if client.is_connected() => {
                info!(attempt, "connection established");
                return Ok(());
            }
            Ok(()) => warn!(attempt, "connect returned but client is still offline"),
            Err(e @ ChannelError::Unauthorized(_)) => return Err(e),
            Err(e) => warn!(attempt, error = %e, "connect attempt failed"),
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
    }

    Err(ChannelError::ConnectionExhausted {
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RawMessage;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Connects successfully on attempt number `succeed_on` (0 = never).
    struct FlakyClient {
        connected: AtomicBool,
        attempts: AtomicU32,
        succeed_on: u32,
        unauthorized: bool,
    }

    impl FlakyClient {
        fn new(connected: bool, succeed_on: u32) -> Self {
            Self {
                connected: AtomicBool::new(connected),
                attempts: AtomicU32::new(0),
                succeed_on,
                unauthorized: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl ChannelClient for FlakyClient {
        async fn resolve(&self, channel: &str) -> ChannelResult<String> {
            Ok(channel.to_string())
        }
        async fn fetch(&self, _: &str, _: i64, _: usize) -> ChannelResult<Vec<RawMessage>> {
            Ok(Vec::new())
        }
        async fn fetch_one(&self, _: &str, _: i64) -> ChannelResult<Option<RawMessage>> {
            Ok(None)
        }
        async fn download_media(&self, _: &RawMessage, _: &Path) -> ChannelResult<Option<PathBuf>> {
            Ok(None)
        }
        async fn send(&self, _: &str, _: &str, _: Option<&Path>) -> ChannelResult<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn connect(&self) -> ChannelResult<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.unauthorized {
                return Err(ChannelError::Unauthorized("revoked".into()));
            }
            if n == self.succeed_on {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                Err(ChannelError::Transport("connection refused".into()))
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn already_connected_is_immediate() {
        let client = FlakyClient::new(true, 0);
        ensure_connected(&client, &fast_policy(3)).await.expect("connected");
        assert_eq!(client.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_until_connected() {
        let client = FlakyClient::new(false, 3);
        ensure_connected(&client, &fast_policy(5)).await.expect("connected");
        assert_eq!(client.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_attempts_is_fatal() {
        let client = FlakyClient::new(false, 0);
        let err = ensure_connected(&client, &fast_policy(4)).await.unwrap_err();
        assert!(matches!(err, ChannelError::ConnectionExhausted { attempts: 4 }));
        assert!(err.is_fatal());
        assert_eq!(client.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unauthorized_stops_retrying() {
        let mut client = FlakyClient::new(false, 0);
        client.unauthorized = true;
        let err = ensure_connected(&client, &fast_policy(5)).await.unwrap_err();
        assert!(matches!(err, ChannelError::Unauthorized(_)));
        assert_eq!(client.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_slept_and_passed_through() {
        let started = std::time::Instant::now();
        let result: ChannelResult<()> = honor_rate_limit(Err(ChannelError::RateLimited { wait_secs: 1 })).await;
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(matches!(result, Err(ChannelError::RateLimited { wait_secs: 1 })));

        let started = std::time::Instant::now();
        let result: ChannelResult<()> = honor_rate_limit(Err(ChannelError::Transport("reset".into()))).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(result, Err(ChannelError::Transport(_))));
    }

    #[test]
    fn policy_from_config_keeps_defaults_for_missing_keys() {
        let cfg = common::ConnectionConfig {
            max_attempts: Some(4),
            initial_delay_seconds: None,
        };
        let policy = BackoffPolicy::from_config(Some(&cfg));
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_delay, Duration::from_secs(5));
    }
}
