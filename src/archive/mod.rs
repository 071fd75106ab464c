pub(crate) mod extract;

pub use extract::{ArchiveExtractor, ArchiveTool};

use std::path::{Path, PathBuf};
use tempfile::{Builder as TempDirBuilder, TempDir};
use tracing::info;
use walkdir::WalkDir;

use crate::errors::{RestoreError, Result};
use crate::utils::matching_extension;

/// Extracts `archive_path` into a fresh private directory.
///
/// The directory is removed when the returned guard is dropped, so a failed
/// extraction never leaves files behind.
pub async fn extract_to_temp(
    extractor: &dyn ArchiveExtractor,
    archive_path: &Path,
    temp_root: Option<&Path>,
) -> Result<TempDir> {
    let mut builder = TempDirBuilder::new();
    builder.prefix("backup_extract_");
    let temp_dir = match temp_root {
        Some(root) => builder.tempdir_in(root)?,
        None => builder.tempdir()?,
    };
    info!(
        "Extracting {} into temporary directory {}",
        archive_path.display(),
        temp_dir.path().display()
    );
    extractor.extract(archive_path, temp_dir.path()).await?;
    Ok(temp_dir)
}

/// Every file under `root` whose name matches one of `extensions`, in
/// directory-traversal order (not sorted).
pub fn find_candidates(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            RestoreError::Extraction(format!("Failed to walk {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if matching_extension(&name, extensions).is_some() {
            candidates.push(entry.into_path());
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restore::testing::ScriptedExtractor;

    fn dat() -> Vec<String> {
        vec![".dat".to_string()]
    }

    #[test]
    fn test_find_candidates_walks_nested_dirs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("nested/deeper"))?;
        std::fs::write(dir.path().join("readme.txt"), b"hi")?;
        std::fs::write(dir.path().join("nested/deeper/MyDB.DAT"), b"TAPE")?;

        let found = find_candidates(dir.path(), &dat())?;
        assert_eq!(found, vec![dir.path().join("nested/deeper/MyDB.DAT")]);
        Ok(())
    }

    #[test]
    fn test_find_candidates_returns_every_match() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.dat"), b"TAPE")?;
        std::fs::write(dir.path().join("b.dat"), b"TAPE")?;

        let mut found = find_candidates(dir.path(), &dat())?;
        assert_eq!(found.len(), 2);
        found.sort();
        assert_eq!(found, vec![dir.path().join("a.dat"), dir.path().join("b.dat")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_temp_dir_is_removed_on_drop() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let archive = root.path().join("nightly.rar");
        std::fs::write(&archive, b"Rar!")?;
        let extractor = ScriptedExtractor::with_files(&["inner/MyDB.dat"]);

        let extracted = extract_to_temp(&extractor, &archive, Some(root.path())).await?;
        let extracted_path = extracted.path().to_path_buf();
        assert!(extracted_path.join("inner/MyDB.dat").exists());

        drop(extracted);
        assert!(!extracted_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_extraction_leaves_nothing_behind() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let archive = root.path().join("broken.rar");
        std::fs::write(&archive, b"junk")?;
        let extractor = ScriptedExtractor::failing();

        let result = extract_to_temp(&extractor, &archive, Some(root.path())).await;
        assert!(matches!(result, Err(RestoreError::Extraction(_))));
        let leftovers: Vec<_> = std::fs::read_dir(root.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }
}
