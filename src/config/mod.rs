//! The explicit configuration passed into each download operation.
//!
//! Nothing in this crate reads module-global mutable state; every default
//! lives here and can be overridden per call.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
pub use validator::Validate;

use crate::api::Auth;

pub const DEFAULT_CONFIG_STR: &str = include_str!("default.toml");

/// The default identifying user agent, per the remote usage policy.
pub const DEFAULT_USER_AGENT: &str = "e621-dl/0.1 (by e621-dl)";

/// The default file name pattern; embeds both the post id and the md5.
///
/// `{i}` expands to the post id, `{m}` to the md5 checksum.
pub const DEFAULT_NAME_PATTERN: &str = "e621_{i}_{m}";

/// The default per-attempt timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

#[non_exhaustive]
#[derive(Debug, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct Config {
    /// Where downloads land; created recursively if missing.
    pub download_dir: PathBuf,
    /// File name pattern, `{i}` = post id, `{m}` = md5.
    #[validate(length(min = 1, message = "name_pattern must not be empty"))]
    pub name_pattern: String,
    #[validate(length(min = 1, message = "user_agent must not be empty"))]
    pub user_agent: String,
    /// Per-attempt timeout in seconds; `0` disables the timeout.
    pub timeout: u64,
    /// Embed title/description/tags into the downloaded file.
    pub embed_tags: bool,
    /// Write the record as a pretty-printed `.json` sidecar.
    pub save_json: bool,
    /// Suppress progress narration.
    pub quiet: bool,
    /// Suppress warnings, independently of `quiet`.
    pub no_warnings: bool,
    /// Optional `username:api_key` credentials.
    pub auth: Option<Auth>,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            download_dir: PathBuf::from("."),
            name_pattern: String::from(DEFAULT_NAME_PATTERN),
            user_agent: String::from(DEFAULT_USER_AGENT),
            timeout: DEFAULT_TIMEOUT_SECS,
            embed_tags: true,
            save_json: false,
            quiet: false,
            no_warnings: false,
            auth: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff applied to transient download failures.
#[non_exhaustive]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; `0` fails on the first error.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Cap applied to every delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Each delay is the previous one times this.
    pub backoff_multiplier: f64,
    /// Randomize each delay up to 2x to spread simultaneous callers.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_config() -> anyhow::Result<()> {
        let config: Config = toml::from_str(DEFAULT_CONFIG_STR)?;
        config.validate()?;

        assert_eq!(config.name_pattern, DEFAULT_NAME_PATTERN);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_SECS);
        assert!(config.embed_tags);
        assert!(!config.save_json);
        assert_eq!(config.retry.max_attempts, RetryConfig::default().max_attempts);
        Ok(())
    }

    #[test]
    fn test_parse_partial_config() -> anyhow::Result<()> {
        let toml = r#"
            name_pattern = "{m}"
            save_json = true

            [auth]
            username = "me"
            api_key = "secret"
        "#;
        let config: Config = toml::from_str(toml)?;
        config.validate()?;

        assert_eq!(config.name_pattern, "{m}");
        assert!(config.save_json);
        assert_eq!(config.auth.unwrap().username, "me");
        // everything unset falls back to the defaults
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        Ok(())
    }

    #[test]
    fn test_parse_empty_name_pattern() {
        let toml = r#"
            name_pattern = ""
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config
            .validate()
            .expect_err("empty name_pattern should be invalid");
    }
}
