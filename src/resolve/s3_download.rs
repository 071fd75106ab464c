// backupingest/src/resolve/s3_download.rs
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::error::DisplayErrorContext;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::config::S3Settings;
use crate::errors::{RestoreError, Result};
use crate::utils::unix_timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
    /// From a `?region=` query parameter; overrides the configured region.
    pub region: Option<String>,
}

/// Parses `s3://bucket/key[?region=...]`.
pub fn parse_s3_uri(uri: &Url) -> Result<S3Location> {
    let bucket = uri
        .host_str()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| RestoreError::InvalidInput(format!("S3 URI missing bucket name: {}", uri)))?
        .to_string();
    let key = uri.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(RestoreError::InvalidInput(format!(
            "S3 URI missing key (object path): {}",
            uri
        )));
    }
    let region = uri
        .query_pairs()
        .find(|(name, _)| name == "region")
        .map(|(_, value)| value.to_string());
    Ok(S3Location { bucket, key, region })
}

/// Downloads an object from S3 or an S3-compatible service into `dest_dir`.
pub async fn download_object(
    settings: &S3Settings,
    location: &S3Location,
    dest_dir: &Path,
) -> Result<PathBuf> {
    info!("Downloading s3://{}/{}", location.bucket, location.key);

    let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());
    if let Some(region) = location.region.as_ref().or(settings.region.as_ref()) {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = &settings.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(access_key), Some(secret_key)) =
        (&settings.access_key_id, &settings.secret_access_key)
    {
        loader = loader.credentials_provider(s3::config::Credentials::new(
            access_key, secret_key, None, None, "Static",
        ));
    }
    let sdk_config = loader.load().await;

    let mut client_config = s3::config::Builder::from(&sdk_config);
    if settings.endpoint_url.is_some() {
        // S3-compatible endpoints rarely support virtual-hosted buckets.
        client_config = client_config.force_path_style(true);
    }
    let client = s3::Client::from_conf(client_config.build());

    let mut object = client
        .get_object()
        .bucket(&location.bucket)
        .key(&location.key)
        .send()
        .await
        .map_err(|e| {
            RestoreError::Fetch(format!(
                "s3://{}/{}: {}",
                location.bucket,
                location.key,
                DisplayErrorContext(&e)
            ))
        })?;

    let destination = dest_dir.join(file_name_for(&location.key));
    let mut output_file = File::create(&destination).await?;

    let mut total_bytes = 0usize;
    while let Some(chunk) = object.body.try_next().await.map_err(|e| {
        RestoreError::Fetch(format!("s3://{}/{}: {}", location.bucket, location.key, e))
    })? {
        output_file.write_all(&chunk).await?;
        total_bytes += chunk.len();
    }
    output_file.flush().await?;

    debug!("Wrote {} to {}", location.key, destination.display());
    info!(
        "Downloaded {} bytes from s3://{}/{}",
        total_bytes, location.bucket, location.key
    );
    Ok(destination)
}

fn file_name_for(key: &str) -> String {
    key.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("s3_download_{}", unix_timestamp()))
}
