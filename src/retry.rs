//! Bounded exponential backoff for transient download failures.
//!
//! The policy: retry only errors classified as transient (see
//! [`crate::download::DownloadError::is_transient`]), sleep an
//! exponentially growing, capped delay between attempts, and give up
//! with the last error once the attempt budget is spent.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// The delay sequence of one retryable operation.
///
/// Each call to [`Backoff::next_delay`] consumes one attempt from the
/// budget; `None` means the budget is spent and the caller must fail
/// with the error it is holding.
///
/// # Example
///
/// ```no_run
/// use e621_dl::config::RetryConfig;
/// use e621_dl::retry::Backoff;
///
/// # async fn example() {
/// let config = RetryConfig::default();
/// let mut backoff = Backoff::new(&config);
/// loop {
///     match fallible_operation().await {
///         Ok(_) => break,
///         Err(err) if err_is_transient(&err) => match backoff.next_delay() {
///             Some(delay) => tokio::time::sleep(delay).await,
///             None => panic!("attempts exhausted: {err}"),
///         },
///         Err(err) => panic!("{err}"),
///     }
/// }
/// # }
/// # async fn fallible_operation() -> Result<(), String> { Ok(()) }
/// # fn err_is_transient(_: &String) -> bool { true }
/// ```
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    attempt: u32,
    delay: Duration,
}

impl<'a> Backoff<'a> {
    pub fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            delay: config.initial_delay(),
        }
    }

    /// The delay to sleep before the next retry, or `None` once
    /// `max_attempts` retries have been handed out.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;

        let current = self.delay.min(self.config.max_delay());
        self.delay = Duration::from_secs_f64(
            current.as_secs_f64() * self.config.backoff_multiplier,
        )
        .min(self.config.max_delay());

        if self.config.jitter {
            Some(add_jitter(current))
        } else {
            Some(current)
        }
    }

    /// Retries handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Stretch `delay` by a uniform random factor in `1.0..=2.0`.
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
