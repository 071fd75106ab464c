// backupingest/src/archive/extract.rs
use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

use crate::errors::{RestoreError, Result};
use crate::utils::{file_name_lossy, find_executable};

/// Unpacks an archive into an existing output directory.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(&self, archive_path: &Path, output_dir: &Path) -> Result<()>;
}

/// Tar archives are unpacked in-process; RAR, ZIP and 7z go through whichever
/// of `unrar`, `7z` or `bsdtar` is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveTool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Tar,
    TarGz,
    Rar,
    Other,
}

impl ArchiveFormat {
    fn detect(archive_path: &Path) -> Self {
        let name = file_name_lossy(archive_path).to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveFormat::TarGz
        } else if name.ends_with(".tar") {
            ArchiveFormat::Tar
        } else if name.ends_with(".rar") {
            ArchiveFormat::Rar
        } else {
            ArchiveFormat::Other
        }
    }
}

#[async_trait]
impl ArchiveExtractor for ArchiveTool {
    async fn extract(&self, archive_path: &Path, output_dir: &Path) -> Result<()> {
        if !archive_path.is_file() {
            return Err(RestoreError::NotFound(format!(
                "Archive for extraction is not a file: {}",
                archive_path.display()
            )));
        }

        match ArchiveFormat::detect(archive_path) {
            format @ (ArchiveFormat::Tar | ArchiveFormat::TarGz) => {
                let archive = archive_path.to_path_buf();
                let output = output_dir.to_path_buf();
                tokio::task::spawn_blocking(move || {
                    unpack_tar(&archive, &output, format == ArchiveFormat::TarGz)
                })
                .await
                .map_err(|e| RestoreError::Extraction(format!("Extraction task failed: {}", e)))?
            }
            ArchiveFormat::Rar => {
                extract_with_tool(&["unrar", "7z", "bsdtar"], archive_path, output_dir).await
            }
            ArchiveFormat::Other => {
                extract_with_tool(&["7z", "bsdtar"], archive_path, output_dir).await
            }
        }
    }
}

fn unpack_tar(archive_path: &Path, output_dir: &Path, gzipped: bool) -> Result<()> {
    info!(
        "Extracting tar archive from {} to {}",
        archive_path.display(),
        output_dir.display()
    );
    let archive_file = File::open(archive_path)?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(archive_file))
    } else {
        Box::new(archive_file)
    };
    let mut archive = tar::Archive::new(reader);
    archive.unpack(output_dir).map_err(|e| {
        RestoreError::Extraction(format!(
            "Failed to unpack archive {} to {}: {}",
            archive_path.display(),
            output_dir.display(),
            e
        ))
    })?;
    info!("✓ Tar archive extracted successfully to {}", output_dir.display());
    Ok(())
}

fn tool_arguments(tool: &Path, archive_path: &Path, output_dir: &Path) -> Vec<String> {
    let archive = archive_path.display().to_string();
    let output = output_dir.display().to_string();
    match tool.file_stem().and_then(|s| s.to_str()).unwrap_or_default() {
        "unrar" => vec!["x".into(), "-o+".into(), "-y".into(), archive, format!("{}/", output)],
        "bsdtar" => vec!["-xf".into(), archive, "-C".into(), output],
        // 7z / 7za
        _ => vec!["x".into(), "-y".into(), format!("-o{}", output), archive],
    }
}

async fn extract_with_tool(candidates: &[&str], archive_path: &Path, output_dir: &Path) -> Result<()> {
    let tool: PathBuf = find_executable(candidates)
        .map_err(|e| RestoreError::Extraction(e.to_string()))?;
    let args = tool_arguments(&tool, archive_path, output_dir);
    info!("Extracting {} with {}", archive_path.display(), tool.display());

    let output = Command::new(&tool)
        .args(&args)
        .output()
        .await
        .map_err(|e| {
            RestoreError::Extraction(format!("Failed to execute {}: {}", tool.display(), e))
        })?;

    if !output.status.success() {
        return Err(RestoreError::Extraction(format!(
            "{} failed for {}.\nStatus: {}\nStdout: {}\nStderr: {}",
            tool.display(),
            archive_path.display(),
            output.status,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    info!("✓ Extraction completed for {}", archive_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data)?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    }

    #[test]
    fn test_detects_formats() {
        assert_eq!(ArchiveFormat::detect(Path::new("/x/a.TGZ")), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::detect(Path::new("/x/a.tar.gz")), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::detect(Path::new("/x/a.tar")), ArchiveFormat::Tar);
        assert_eq!(ArchiveFormat::detect(Path::new("/x/a.rar")), ArchiveFormat::Rar);
        assert_eq!(ArchiveFormat::detect(Path::new("/x/a.zip")), ArchiveFormat::Other);
    }

    #[test]
    fn test_tool_arguments() {
        let args = tool_arguments(Path::new("/usr/bin/7z"), Path::new("/in/a.zip"), Path::new("/out"));
        assert_eq!(args, vec!["x", "-y", "-o/out", "/in/a.zip"]);
        let args = tool_arguments(Path::new("/usr/bin/unrar"), Path::new("/in/a.rar"), Path::new("/out"));
        assert_eq!(args, vec!["x", "-o+", "-y", "/in/a.rar", "/out/"]);
    }

    #[tokio::test]
    async fn test_unpacks_tar_gz_in_process() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("nightly.tar.gz");
        write_tar_gz(&archive, &[("dump/MyDB.dat", &b"TAPE-data"[..])])?;
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out)?;

        ArchiveTool.extract(&archive, &out).await?;

        assert_eq!(std::fs::read(out.join("dump/MyDB.dat"))?, b"TAPE-data");
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_tar_gz_is_extraction_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("broken.tgz");
        std::fs::write(&archive, b"definitely not gzip")?;

        let result = ArchiveTool.extract(&archive, dir.path()).await;
        assert!(matches!(result, Err(RestoreError::Extraction(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_archive_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = ArchiveTool.extract(&dir.path().join("gone.rar"), dir.path()).await;
        assert!(matches!(result, Err(RestoreError::NotFound(_))));
    }
}
