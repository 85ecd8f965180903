//! Exponential backoff with keyword-based failure classification.
//!
//! An error is retried only when its rendered message contains one of the
//! configured keywords (case-insensitive). Delays grow as
//! `initial_delay * multiplier^attempt`, capped at `max_delay`, with no jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Keywords that mark a failure as transient when no override is given
pub const DEFAULT_RETRYABLE_KEYWORDS: &[&str] = &["network", "timeout", "fetch", "connection"];

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retryable_errors: Vec<String>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retryable_errors: DEFAULT_RETRYABLE_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

impl RetryOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_retryable_errors<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_errors = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Delay slept after the failed attempt with index `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Checks whether an error message contains any retryable keyword
pub fn is_retryable_message(message: &str, keywords: &[String]) -> bool {
    let message = message.to_lowercase();
    keywords
        .iter()
        .any(|keyword| message.contains(&keyword.to_lowercase()))
}

/// Runs `operation`, retrying transient failures with exponential backoff.
///
/// The last error is returned unchanged once `max_retries` retries are spent
/// or as soon as a failure does not match any retryable keyword.
pub async fn retry<T, E, F, Fut>(mut operation: F, options: &RetryOptions) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let message = error.to_string();
                if attempt >= options.max_retries
                    || !is_retryable_message(&message, &options.retryable_errors)
                {
                    return Err(error);
                }

                let delay = options.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, backing off: {}",
                    message
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delays_are_capped_and_non_decreasing() {
        let options = RetryOptions::default().with_max_retries(6);
        let delays: Vec<Duration> = (0..6).map(|a| options.delay_for(a)).collect();

        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(10));
        assert_eq!(delays[5], Duration::from_secs(10));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_keyword_matching_is_case_insensitive() {
        let keywords = vec!["timeout".to_string(), "503".to_string()];
        assert!(is_retryable_message("Request TIMEOUT after 30s", &keywords));
        assert!(is_retryable_message("HTTP 503 from upstream", &keywords));
        assert!(!is_retryable_message("invalid api key", &keywords));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_max_retries_failures() {
        let options = RetryOptions::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = calls.clone();
        let result: Result<&str, String> = retry(
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        Err("network connection reset".to_string())
                    } else {
                        Ok("done")
                    }
                }
            },
            &options,
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff, three sleeps in total
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = calls.clone();
        let result: Result<(), String> = retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("permission denied".to_string())
                }
            },
            &RetryOptions::default(),
        )
        .await;

        assert_eq!(result.unwrap_err(), "permission denied");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_last_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = RetryOptions::default()
            .with_max_retries(2)
            .with_retryable_errors(["overloaded"]);

        let counter = calls.clone();
        let result: Result<(), String> = retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("model overloaded".to_string())
                }
            },
            &options,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
