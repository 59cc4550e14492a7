use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use reqwest::{Client, IntoUrl};
use thiserror::Error;
use tokio::fs::{create_dir_all, File};
use tokio::io::{AsyncWriteExt, BufWriter};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("There is no content to download")]
    ZeroContentLength,
    #[error("Failed to allocate file size: {0}")]
    FileAllocationFailed(std::io::Error),
}

impl DownloadError {
    /// Whether retrying the same transfer can plausibly succeed.
    ///
    /// Timeouts and connection-level failures qualify; an HTTP error
    /// status, a short disk or a zero-length body do not.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Reqwest(err) => err.is_timeout() || err.is_connect(),
            DownloadError::Io(err) => matches!(
                err.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::Interrupted
            ),
            DownloadError::ZeroContentLength | DownloadError::FileAllocationFailed(_) => false,
        }
    }
}

/// Downloads single assets into a fixed directory.
///
/// One session holds the client and the destination directory; the
/// transfer itself is re-invocable so a retry loop can drive it.
pub struct Downloader {
    client: Client,
    download_dir: PathBuf,
}

impl Downloader {
    pub fn session(client: Client, download_dir: impl Into<PathBuf>) -> Self {
        let download_dir = download_dir.into();
        Self {
            client,
            download_dir,
        }
    }

    /// Create the download directory, recursively and idempotently.
    #[inline]
    pub async fn ensure(self) -> std::io::Result<Self> {
        create_dir_all(&self.download_dir).await?;
        Ok(self)
    }

    /// The full destination path for `filename`.
    #[inline]
    pub fn path_for(&self, filename: impl AsRef<Path>) -> PathBuf {
        self.download_dir.join(filename)
    }

    /// Stream the asset at `url` into `filepath`, truncating any
    /// previous content.
    ///
    /// The file size is pre-allocated when the server announces it,
    /// so a full disk fails early instead of mid-stream.
    pub async fn fetch(
        &self,
        url: impl IntoUrl,
        filepath: impl AsRef<Path>,
    ) -> Result<(), DownloadError> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut file_buf = BufWriter::new(File::create(&filepath).await?);

        // pre-allocate file size
        if let Some(content_length) = response.content_length() {
            if content_length == 0 {
                return Err(DownloadError::ZeroContentLength);
            }

            file_buf
                .get_ref()
                .set_len(content_length)
                .await
                // if disk is full, this will fail
                .map_err(DownloadError::FileAllocationFailed)?;
        }

        while let Some(mut chunk) = response.chunk().await? {
            file_buf.write_all_buf(&mut chunk).await?;
        }

        file_buf.flush().await?;
        Ok(())
    }
}
