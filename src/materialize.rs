//! A core module to materialize one post: fetch the record, keep the
//! optional JSON sidecar, download the asset, embed the metadata.
//!
//! See [`Materializer`] for more information.
//!
//! Following is the low-level module wrapped by this module:
//! - [`crate::api`]
//! - [`crate::download`]
//! - [`crate::embed`]
//! - [`crate::hash`]
//! - [`crate::retry`]
//! - [`crate::tags`]

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use reqwest::Client;

use crate::api::{self, data::Post, Getter};
use crate::config::Config;
use crate::download::Downloader;
use crate::embed::{AssetMetadata, EmbedError, MetadataEmbedder, XmpEmbedder};
use crate::hash::hash_file;
use crate::retry::Backoff;
use crate::tags::derive_tags;

const SPINNER_FINISH_MODE: ProgressFinish = ProgressFinish::AndClear;
const SPINNER_TICK_SECS: f32 = 0.1;

/// The terminal summary of one materialization.
///
/// Returned to the caller fully populated and never mutated afterwards.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadResult {
    /// A record was found (or supplied by the caller).
    pub post_exists: bool,
    /// The record is marked deleted; no download was attempted.
    pub post_deleted: bool,
    /// The record carries no download URL; no download was attempted.
    pub post_missing_url: bool,
    /// The asset is on disk at `path_image`, downloaded now or already
    /// present with a matching checksum.
    pub saved_image: bool,
    /// The metadata was embedded into the asset.
    pub saved_tags: bool,
    /// The record sidecar is on disk at `path_json`.
    pub saved_json: bool,
    /// The resolved asset path, when the asset was saved.
    pub path_image: Option<PathBuf>,
    /// The resolved sidecar path, when the sidecar was saved.
    pub path_json: Option<PathBuf>,
}

/// Progress/warning narration around one materialization.
///
/// Progress goes to stdout behind a spinner, warnings to stderr;
/// the two are suppressible independently.
struct Narrator {
    spinner: ProgressBar,
    quiet: bool,
    warnings: bool,
}

impl Narrator {
    fn new(quiet: bool, warnings: bool) -> Self {
        let spinner = if quiet {
            ProgressBar::hidden()
        } else {
            let spinner = ProgressBar::new_spinner()
                .with_finish(SPINNER_FINISH_MODE)
                .with_style(
                    ProgressStyle::with_template("{spinner:.blue} {msg}")
                        .unwrap()
                        // NOTE: use `ascii` only, because cmd/powershell maybe not support unicode.
                        .tick_strings(&[".  ", ".. ", "...", " ..", "  .", "   "]),
                );
            spinner.enable_steady_tick(Duration::from_secs_f32(SPINNER_TICK_SECS));
            spinner
        };
        Self {
            spinner,
            quiet,
            warnings,
        }
    }

    /// A persistent progress line.
    fn say(&self, msg: impl AsRef<str>) {
        if !self.quiet {
            let msg = msg.as_ref().to_owned();
            self.spinner.suspend(|| println!("{msg}"));
        }
    }

    /// The transient spinner text.
    fn step(&self, msg: impl Into<String>) {
        self.spinner.set_message(msg.into());
    }

    fn warn(&self, msg: impl AsRef<str>) {
        if self.warnings {
            let msg = msg.as_ref().to_owned();
            self.spinner.suspend(|| eprintln!("{msg}"));
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

/** The per-post state machine.

- One [`Materializer`] wraps a [`Client`] and a [`Config`] and can be
    reused across posts; every call is independent, the only state it
    touches is the files it writes.

- The JSON sidecar (when requested) is written *before* the
    deleted/missing-URL checks, so the record is captured even when the
    asset itself is not downloadable. This ordering is deliberate.

- An asset already on disk with a matching MD5 is not downloaded again.

- An asset whose format cannot hold the metadata is kept; the failure
    is reported through [`DownloadResult::saved_tags`] and a warning.

# Example
```no_run
use reqwest::Client;
use e621_dl::config::Config;
use e621_dl::materialize::Materializer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let materializer = Materializer::build(Client::new(), Config::default());
    let result = materializer.download(123).await?;

    println!("saved: {:?}", result.path_image);
    Ok(())
}
```
*/
pub struct Materializer {
    client: Client,
    config: Config,
    embedder: Box<dyn MetadataEmbedder + Send + Sync>,
}

impl Materializer {
    /// Create a new materializer with the shipped XMP embedder.
    pub fn build(client: Client, config: Config) -> Self {
        Self {
            client,
            config,
            embedder: Box::new(XmpEmbedder),
        }
    }

    /// Replace the embedding collaborator.
    pub fn with_embedder(
        mut self,
        embedder: impl MetadataEmbedder + Send + Sync + 'static,
    ) -> Self {
        self.embedder = Box::new(embedder);
        self
    }

    /// Fetch the record for `post_id` and materialize it.
    ///
    /// A missing record is a normal outcome: the returned result has
    /// `post_exists == false` and nothing was written.
    ///
    /// # Errors
    ///
    /// Invalid arguments, request failures, malformed records and
    /// filesystem errors propagate; see the crate-level error taxonomy.
    pub async fn download(&self, post_id: u64) -> anyhow::Result<DownloadResult> {
        let narrator = Narrator::new(self.config.quiet, !self.config.no_warnings);
        narrator.say(format!("[{post_id}] Getting info for e621 post..."));
        narrator.step("Fetching record...");

        let getter = Getter::build(
            &self.client,
            post_id,
            self.config.auth.as_ref(),
            &self.config.user_agent,
        )?;
        let record = getter
            .run()
            .await
            .context("failed to fetch the post record")?;

        let result = match record {
            Some(post) => self.materialize(post, &narrator).await,
            None => {
                narrator.warn(format!("[{post_id}] No info returned."));
                Ok(DownloadResult::default())
            }
        };
        narrator.finish();
        result
    }

    /// Materialize a caller-supplied record, bypassing the fetch.
    ///
    /// Feeding back a previously fetched record produces the same
    /// result as a fresh fetch of the identical record.
    pub async fn download_with_record(&self, post: Post) -> anyhow::Result<DownloadResult> {
        let narrator = Narrator::new(self.config.quiet, !self.config.no_warnings);
        let result = self.materialize(post, &narrator).await;
        narrator.finish();
        result
    }

    /// Resolve the asset file name from the configured pattern.
    ///
    /// `{m}` expands to the md5, `{i}` to the post id; the record's
    /// extension is appended after a literal dot.
    fn resolve_filename(&self, post: &Post) -> String {
        let stem = self
            .config
            .name_pattern
            .replace("{m}", &post.file.md5)
            .replace("{i}", &post.id.to_string());
        format!("{stem}.{}", post.file.ext)
    }

    async fn materialize(
        &self,
        post: Post,
        narrator: &Narrator,
    ) -> anyhow::Result<DownloadResult> {
        let mut result = DownloadResult {
            post_exists: true,
            ..DownloadResult::default()
        };

        let downloader = Downloader::session(self.client.clone(), &self.config.download_dir)
            .ensure()
            .await
            .context("unable to ensure the existence of the download directory")?;
        let filepath = downloader.path_for(self.resolve_filename(&post));

        // The sidecar lands before the deleted/missing-URL checks: the
        // record is worth keeping even when the asset is unavailable.
        if self.config.save_json {
            narrator.step("Saving record sidecar...");
            let path_json = sidecar_path(&filepath);
            let body =
                serde_json::to_string_pretty(&post).context("failed to serialize the record")?;
            tokio::fs::write(&path_json, body)
                .await
                .with_context(|| format!("failed to write sidecar: {}", path_json.display()))?;
            result.saved_json = true;
            result.path_json = Some(path_json);
        }

        if post.flags.deleted {
            narrator.warn(format!("[{}] Image has been deleted.", post.id));
            result.post_deleted = true;
            return Ok(result);
        }
        let Some(file_url) = post.file.url.as_deref() else {
            narrator.warn(format!("[{}] Image has no download URL.", post.id));
            result.post_missing_url = true;
            return Ok(result);
        };

        if check_file_existed(&filepath, &post.file.md5)
            .await
            .with_context(|| {
                format!(
                    "Failed to check if file is already existed: {}",
                    filepath.display()
                )
            })?
        {
            narrator.say("    Image already on disk, skipping download...");
        } else {
            narrator.say("    Downloading image...");
            narrator.step(format!("Downloading {file_url}..."));
            self.fetch_with_retry(&downloader, file_url, &filepath, narrator)
                .await?;
        }
        result.saved_image = true;
        result.path_image = Some(filepath.clone());

        if self.config.embed_tags {
            narrator.say("    Embedding tags...");
            narrator.step("Embedding tags...");
            let metadata = asset_metadata(&post);
            match self.embedder.embed(&filepath, &metadata) {
                Ok(()) => result.saved_tags = true,
                Err(EmbedError::UnsupportedFormat(format)) => {
                    narrator.warn(format!(
                        "[{}] `{format}` files cannot hold the metadata, tags were not embedded.",
                        post.id
                    ));
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to embed metadata: {}", filepath.display())
                    });
                }
            }
        }

        narrator.say(format!(
            "    Done downloading! Location: {}",
            filepath.display()
        ));
        Ok(result)
    }

    /// Drive one download under the bounded retry policy: transient
    /// failures sleep and retry, everything else propagates at once.
    async fn fetch_with_retry(
        &self,
        downloader: &Downloader,
        url: &str,
        filepath: &Path,
        narrator: &Narrator,
    ) -> anyhow::Result<()> {
        let mut backoff = Backoff::new(&self.config.retry);
        loop {
            match downloader.fetch(url, filepath).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        narrator.warn(format!(
                            "    Transient download failure ({err}), retry {} in {:.1}s...",
                            backoff.attempt(),
                            delay.as_secs_f64()
                        ));
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(err).with_context(|| {
                            format!(
                                "download still failing after {} retries: {}",
                                self.config.retry.max_attempts,
                                filepath.display()
                            )
                        });
                    }
                },
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Failed to download: {}", filepath.display()));
                }
            }
        }
    }
}

/// `<asset path>.json`, next to the asset.
fn sidecar_path(filepath: &Path) -> PathBuf {
    let mut path = filepath.as_os_str().to_owned();
    path.push(".json");
    PathBuf::from(path)
}

/// The metadata payload for `post`: canonical post page as the title,
/// the trimmed description only when something is left of it, and the
/// full derived tag sequence.
fn asset_metadata(post: &Post) -> AssetMetadata {
    let description = post.description.trim();
    AssetMetadata {
        title: api::url::post_page(post.id),
        description: (!description.is_empty()).then(|| description.to_owned()),
        tags: derive_tags(post),
    }
}

/// Check if the file already exists by comparing the MD5 hash.
/// If the file does not exist, return `false`.
///
/// Consume max to 2MB memory when hashing file.
#[inline]
async fn check_file_existed(
    filepath: impl AsRef<Path>,
    hashed_value: impl AsRef<str>,
) -> std::io::Result<bool> {
    type Hasher = md5::Md5;

    hash_file::<Hasher>(filepath)
        .await
        .map(|file_md5| file_md5 == hashed_value.as_ref())
        .or_else(|err| {
            if err.kind() == ErrorKind::NotFound {
                Ok(false)
            } else {
                Err(err)
            }
        })
}
