//! Relay client configuration.

use std::time::Duration;

/// Statuses the helper cache may recover from.
pub const RETRYABLE_STATUSES: [u16; 7] = [408, 425, 429, 500, 502, 503, 504];

/// Fixed retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before attempt `n + 1`. The last entry repeats if there are
    /// more attempts than delays.
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delays: Vec::new(),
        }
    }

    /// Same delay between every attempt.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delays: vec![delay],
        }
    }

    /// Delay to wait after the given zero-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.delays
            .get(attempt as usize)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_retryable(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delays: vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
            ],
        }
    }
}

/// Configuration for the helper cache client.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the helper cache, without trailing slash.
    pub base_url: String,
    pub retry: RetryPolicy,
    /// Lifetime of each pending message.
    pub pending_ttl: Duration,
    pub request_timeout: Duration,
}

impl RelayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            retry: RetryPolicy::default(),
            pending_ttl: Duration::from_secs(48 * 60 * 60),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.attempts, 3);
        assert_eq!(retry.delay_after(0), Duration::from_millis(250));
        assert_eq!(retry.delay_after(2), Duration::from_secs(1));
        assert_eq!(retry.delay_after(9), Duration::from_secs(1));
        assert_eq!(RetryPolicy::none().delay_after(0), Duration::ZERO);
    }

    #[test]
    fn test_retryable_statuses() {
        for s in [408, 425, 429, 500, 502, 503, 504] {
            assert!(RetryPolicy::is_retryable(s));
        }
        for s in [400, 401, 403, 404, 409, 501] {
            assert!(!RetryPolicy::is_retryable(s));
        }
    }

    #[test]
    fn test_base_url_trimmed() {
        assert_eq!(RelayConfig::new("https://cache.example/").base_url, "https://cache.example");
        assert_eq!(
            RelayConfig::default().pending_ttl,
            Duration::from_secs(172_800)
        );
    }
}
