use crate::blocks::RecognitionResult;
use crate::traits::PartStore;
use crate::DocumentError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct DocumentParts {
    expected: Option<usize>,
    parts: BTreeMap<String, RecognitionResult>,
    merged: Option<RecognitionResult>,
}

/// Part store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPartStore {
    documents: RwLock<HashMap<String, DocumentParts>>,
}

impl InMemoryPartStore {
    pub async fn set_expected_parts(&self, document: &str, expected: usize) {
        let mut documents = self.documents.write().await;
        documents.entry(document.to_string()).or_default().expected = Some(expected);
    }

    pub async fn insert_part(&self, document: &str, key: &str, result: RecognitionResult) {
        let mut documents = self.documents.write().await;
        documents
            .entry(document.to_string())
            .or_default()
            .parts
            .insert(key.to_string(), result);
    }

    pub async fn merged(&self, document: &str) -> Option<RecognitionResult> {
        let documents = self.documents.read().await;
        documents.get(document).and_then(|entry| entry.merged.clone())
    }
}

#[async_trait]
impl PartStore for InMemoryPartStore {
    async fn expected_parts(&self, document: &str) -> Result<usize, DocumentError> {
        let documents = self.documents.read().await;
        documents
            .get(document)
            .and_then(|entry| entry.expected)
            .ok_or_else(|| DocumentError::Store(format!("no split manifest for {document}")))
    }

    async fn list_part_keys(&self, document: &str) -> Result<Vec<String>, DocumentError> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(document)
            .map(|entry| entry.parts.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_part(&self, document: &str, key: &str) -> Result<RecognitionResult, DocumentError> {
        let documents = self.documents.read().await;
        documents
            .get(document)
            .and_then(|entry| entry.parts.get(key))
            .cloned()
            .ok_or_else(|| DocumentError::Store(format!("part {key} of {document} not found")))
    }

    async fn store_merged(
        &self,
        document: &str,
        merged: &RecognitionResult,
    ) -> Result<String, DocumentError> {
        let mut documents = self.documents.write().await;
        documents.entry(document.to_string()).or_default().merged = Some(merged.clone());
        Ok(format!("{document}_merged.json"))
    }
}
