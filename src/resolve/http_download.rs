// backupingest/src/resolve/http_download.rs
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::info;
use url::Url;

use crate::errors::{RestoreError, Result};
use crate::utils::unix_timestamp;

/// Streams `url` into `dest_dir`, naming the file after the last path segment.
///
/// Any transport error or non-success status is a `Fetch` error; this layer
/// never retries.
pub async fn download_http(client: &reqwest::Client, url: &Url, dest_dir: &Path) -> Result<PathBuf> {
    info!("Downloading {}", url);

    let mut response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| RestoreError::Fetch(format!("{}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(RestoreError::Fetch(format!("HTTP {}: {}", response.status(), url)));
    }

    let destination = dest_dir.join(file_name_for(url));
    let mut output_file = File::create(&destination).await?;

    let mut total_bytes = 0usize;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| RestoreError::Fetch(format!("{}: {}", url, e)))?
    {
        output_file.write_all(&chunk).await?;
        total_bytes += chunk.len();
    }
    output_file.flush().await?;

    info!(
        "Downloaded {} bytes from {} to {}",
        total_bytes,
        url,
        destination.display()
    );
    Ok(destination)
}

fn file_name_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("download_{}", unix_timestamp()))
}
