use crate::blocks::RecognitionResult;
use crate::traits::PartStore;
use crate::DocumentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Split metadata written next to a document's part folder when it is split.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitManifest {
    pub total_parts: usize,
}

/// Part results on disk:
///
/// ```text
/// <root>/<document>.split              {"total_parts": n}
/// <root>/<document>/<name>_part_<i>_ocrresults.json
/// <root>/<document>_merged.json        written once every part is present
/// ```
pub struct FsPartStore {
    root: PathBuf,
}

impl FsPartStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn part_dir(&self, document: &str) -> PathBuf {
        self.root.join(document)
    }

    fn manifest_path(&self, document: &str) -> PathBuf {
        self.root.join(format!("{document}.split"))
    }

    fn merged_name(document: &str) -> String {
        format!("{document}_merged.json")
    }

    pub async fn write_manifest(&self, document: &str, total_parts: usize) -> Result<(), DocumentError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let body = serde_json::to_vec(&SplitManifest { total_parts })?;
        tokio::fs::write(self.manifest_path(document), body).await?;
        Ok(())
    }

    pub async fn write_part(
        &self,
        document: &str,
        key: &str,
        result: &RecognitionResult,
    ) -> Result<(), DocumentError> {
        let dir = self.part_dir(document);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(key), serde_json::to_vec(result)?).await?;
        Ok(())
    }
}

#[async_trait]
impl PartStore for FsPartStore {
    async fn expected_parts(&self, document: &str) -> Result<usize, DocumentError> {
        let path = self.manifest_path(document);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let manifest: SplitManifest = serde_json::from_str(&raw)?;
                Ok(manifest.total_parts)
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "split manifest missing, assuming a single part");
                Ok(1)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn list_part_keys(&self, document: &str) -> Result<Vec<String>, DocumentError> {
        let dir = self.part_dir(document);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|error| DocumentError::Store(error.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let is_json = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if !is_json {
                continue;
            }

            let name = entry.file_name().to_str().ok_or_else(|| {
                DocumentError::Store(format!("non utf-8 part name in {}", dir.display()))
            })?;
            keys.push(name.to_string());
        }

        keys.sort_unstable();
        Ok(keys)
    }

    async fn load_part(&self, document: &str, key: &str) -> Result<RecognitionResult, DocumentError> {
        let raw = tokio::fs::read_to_string(self.part_dir(document).join(key)).await?;
        RecognitionResult::from_json_str(&raw)
    }

    async fn store_merged(
        &self,
        document: &str,
        merged: &RecognitionResult,
    ) -> Result<String, DocumentError> {
        let name = Self::merged_name(document);
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(&name), serde_json::to_vec(merged)?).await?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::FsPartStore;
    use crate::blocks::RecognitionResult;
    use crate::config::MergeOptions;
    use crate::merge::{MergeStatus, PartMergeCoordinator};
    use crate::traits::PartStore;
    use tempfile::tempdir;

    const PAGE: &str = r#"{"Blocks": [{"Id": "ID", "BlockType": "PAGE", "Page": 1}]}"#;

    fn one_page(id: &str) -> Result<RecognitionResult, Box<dyn std::error::Error>> {
        Ok(RecognitionResult::from_json_str(&PAGE.replace("ID", id))?)
    }

    #[tokio::test]
    async fn missing_manifest_means_one_part() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = FsPartStore::new(dir.path());
        assert_eq!(store.expected_parts("scan").await?, 1);
        assert!(store.list_part_keys("scan").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn only_json_files_are_listed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = FsPartStore::new(dir.path());
        store.write_part("scan", "scan_part_2_ocrresults.json", &one_page("b")?).await?;
        store.write_part("scan", "scan_part_1_ocrresults.json", &one_page("a")?).await?;
        std::fs::write(dir.path().join("scan").join("notes.txt"), b"ignored")?;

        let keys = store.list_part_keys("scan").await?;
        assert_eq!(
            keys,
            vec!["scan_part_1_ocrresults.json", "scan_part_2_ocrresults.json"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn coordinator_writes_the_merged_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = FsPartStore::new(dir.path());
        store.write_manifest("scan", 2).await?;
        store.write_part("scan", "scan_part_1_ocrresults.json", &one_page("a")?).await?;

        let coordinator = PartMergeCoordinator::new(store, &MergeOptions::default())?;
        let status = coordinator.on_part_arrived("scan").await?;
        assert_eq!(status, MergeStatus::AwaitingParts { received: 1, expected: 2 });

        coordinator
            .store()
            .write_part("scan", "scan_part_2_ocrresults.json", &one_page("b")?)
            .await?;
        let status = coordinator.on_part_arrived("scan").await?;
        assert!(matches!(status, MergeStatus::Merged { .. }));

        let merged = RecognitionResult::from_json_str(&std::fs::read_to_string(
            dir.path().join("scan_merged.json"),
        )?)?;
        assert_eq!(merged.metadata.map(|metadata| metadata.pages), Some(2));
        assert_eq!(merged.blocks[1].page, Some(2));
        Ok(())
    }
}
