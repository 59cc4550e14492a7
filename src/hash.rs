use std::cmp::min;
use std::path::Path;

use digest::Digest;
use tokio::io::AsyncReadExt;

const DEFAULT_BUF_SIZE: usize = 2 * 1024 * 1024; // 2MB

/// Hash a file chunk by chunk, handing the CPU-bound update to the
/// rayon pool so the async thread never stalls on a large file.
///
/// Consumes max 2MB of memory regardless of file size.
pub async fn hash_file<D: Digest + Send + 'static>(
    filepath: impl AsRef<Path>,
) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(filepath).await?;
    let file_size = file.metadata().await?.len();

    let buf_size = min(
        DEFAULT_BUF_SIZE,
        usize::try_from(file_size).unwrap_or(DEFAULT_BUF_SIZE),
    );

    let mut hasher = D::new();
    let mut buf = vec![u8::default(); buf_size];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        (hasher, buf) = tokio_rayon::spawn(move || {
            hasher.update(&buf[..n]);
            (hasher, buf)
        })
        .await;
    }

    Ok(base16ct::lower::encode_string(&hasher.finalize()))
}
