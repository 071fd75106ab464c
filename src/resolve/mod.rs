pub(crate) mod http_download;
pub(crate) mod s3_download;

use std::path::{Path, PathBuf};
use tempfile::{Builder as TempDirBuilder, TempDir};
use tracing::info;
use url::Url;

use crate::config::S3Settings;
use crate::errors::{RestoreError, Result};

/// A local file ready for processing.
///
/// Downloaded files live in a private directory that is removed when this
/// value is dropped.
#[derive(Debug)]
pub struct ResolvedResource {
    path: PathBuf,
    download_dir: Option<TempDir>,
}

impl ResolvedResource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_download(&self) -> bool {
        self.download_dir.is_some()
    }
}

/// Turns a resource URI (local path, `file://`, `http(s)://`, `s3://`) into a
/// local file.
pub struct ResourceResolver {
    s3: S3Settings,
    temp_root: Option<PathBuf>,
    http: reqwest::Client,
}

impl ResourceResolver {
    pub fn new(s3: S3Settings, temp_root: Option<PathBuf>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("backupingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RestoreError::Fetch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { s3, temp_root, http })
    }

    #[cfg(test)]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub async fn resolve(&self, uri: &str) -> Result<ResolvedResource> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(RestoreError::InvalidInput("Resource URI is empty".to_string()));
        }

        let url = match Url::parse(uri) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => return local_file(PathBuf::from(uri)),
            Err(e) => return Err(RestoreError::InvalidInput(format!("{}: {}", uri, e))),
        };

        match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| RestoreError::InvalidInput(format!("Invalid file URI: {}", uri)))?;
                local_file(path)
            }
            "http" | "https" => {
                let download_dir = self.download_dir()?;
                let path = http_download::download_http(&self.http, &url, download_dir.path()).await?;
                Ok(ResolvedResource {
                    path,
                    download_dir: Some(download_dir),
                })
            }
            "s3" => {
                let location = s3_download::parse_s3_uri(&url)?;
                let download_dir = self.download_dir()?;
                let path =
                    s3_download::download_object(&self.s3, &location, download_dir.path()).await?;
                Ok(ResolvedResource {
                    path,
                    download_dir: Some(download_dir),
                })
            }
            other => Err(RestoreError::UnsupportedScheme(other.to_string())),
        }
    }

    fn download_dir(&self) -> Result<TempDir> {
        let mut builder = TempDirBuilder::new();
        builder.prefix("backup_download_");
        let dir = match &self.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

fn local_file(path: PathBuf) -> Result<ResolvedResource> {
    if !path.is_file() {
        return Err(RestoreError::NotFound(path.display().to_string()));
    }
    info!("Using local file {}", path.display());
    Ok(ResolvedResource {
        path,
        download_dir: None,
    })
}
