//! A core module for command line interface.
//!
//! See [`Cli`] for more information.

use std::path::PathBuf;
use std::str::FromStr;

use clap::builder::{PathBufValueParser, StringValueParser, TypedValueParser};
pub use clap::{CommandFactory, Parser};

use crate::api::Auth;
use crate::config::{Config, Validate};

/// [`clap`] command line interface.
///
/// Flags map onto [`Config`] fields; an optional TOML config file
/// supplies defaults and explicit flags override it, see
/// [`Self::into_config`].
///
/// # Example
///
/// ```no_run
/// use e621_dl::cli::{Cli, Parser as _};
///
/// let cli = Cli::parse();
/// ```
#[non_exhaustive]
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// The id of the e621 post to download.
    #[arg(value_name = "ID")]
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub post_id: u64,

    /// The folder to download to.
    #[arg(short = 'f', long, value_name = "FOLDER")]
    pub dl_folder: Option<PathBuf>,

    /// The file name. Replacements: {m}=md5, {i}=post_id
    #[arg(short = 'p', long, value_name = "NAME")]
    pub name_pattern: Option<String>,

    /// Don't save tags or metadata.
    #[arg(short = 'n', long)]
    pub no_tags: bool,

    /// Also save the post record as a pretty-printed JSON sidecar.
    #[arg(short = 'j', long)]
    pub save_json: bool,

    /// `username:api_key` credentials for HTTP basic auth.
    #[arg(short = 'l', long, value_name = "USER:API_KEY")]
    #[arg(value_parser = StringValueParser::new().try_map(Self::parse_auth))]
    pub login: Option<Auth>,

    /// Manual override of the user agent string.
    #[arg(short = 'u', long, value_name = "USERAGENT")]
    pub user_agent: Option<String>,

    /// Per-attempt timeout in seconds; 0 disables the timeout.
    #[arg(short = 't', long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Retries after the first download attempt.
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Suppress progress narration.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Suppress warnings, independently of --quiet.
    #[arg(long)]
    pub no_warnings: bool,

    /// Read defaults from a TOML config file; explicit flags override it.
    #[arg(short = 'c', long, value_name = "PATH")]
    #[arg(value_parser = PathBufValueParser::new().try_map(Self::parse_config_from_filepath))]
    pub config: Option<Config>,
}

impl Cli {
    #[inline]
    fn parse_auth(value: String) -> anyhow::Result<Auth> {
        Auth::from_str(&value)
    }

    #[inline]
    fn parse_config_from_filepath(path: PathBuf) -> anyhow::Result<Config> {
        let config = std::fs::read_to_string(path)?;
        let config = toml::from_str::<Config>(&config)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge the config file (if any) under the explicit flags and
    /// validate the outcome.
    ///
    /// # Errors
    ///
    /// If the merged configuration fails validation,
    /// it will return an error.
    pub fn into_config(self) -> anyhow::Result<(u64, Config)> {
        let mut config = self.config.unwrap_or_default();

        if let Some(dl_folder) = self.dl_folder {
            config.download_dir = dl_folder;
        }
        if let Some(name_pattern) = self.name_pattern {
            config.name_pattern = name_pattern;
        }
        if let Some(user_agent) = self.user_agent {
            config.user_agent = user_agent;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(login) = self.login {
            config.auth = Some(login);
        }
        if self.no_tags {
            config.embed_tags = false;
        }
        if self.save_json {
            config.save_json = true;
        }
        if self.quiet {
            config.quiet = true;
        }
        if self.no_warnings {
            config.no_warnings = true;
        }

        config.validate()?;
        Ok((self.post_id, config))
    }
}
