use crate::blocks::RecognitionResult;
use crate::config::GenerationParams;
use crate::{DocumentError, ModelError};
use async_trait::async_trait;

/// Where the per-part recognition results of split documents live.
#[async_trait]
pub trait PartStore {
    /// Total number of parts recorded when the document was split.
    async fn expected_parts(&self, document: &str) -> Result<usize, DocumentError>;

    /// Identifiers of every part result currently available for `document`.
    async fn list_part_keys(&self, document: &str) -> Result<Vec<String>, DocumentError>;

    async fn load_part(&self, document: &str, key: &str) -> Result<RecognitionResult, DocumentError>;

    /// Persists the merged graph and returns the identifier it was stored under.
    async fn store_merged(
        &self,
        document: &str,
        merged: &RecognitionResult,
    ) -> Result<String, DocumentError>;
}

#[async_trait]
pub trait LanguageModel {
    /// Returns the raw completion text. A prompt that does not fit the model's
    /// context window must fail with [`ModelError::ContextTooLong`].
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError>;
}
