use crate::error::{AnswerError, DocumentError};
use crate::models::parse_page_key;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

pub trait Embedder {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, AnswerError>;
}

/// Labels `render_page_text` writes on every page; they carry no content.
const SECTION_LABELS: [&str; 4] = ["key-value pairs:", "column header:", "tables:", "text:"];

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Deterministic embedder over hashed character trigrams of each word (padded
/// with spaces), for running without an embedding service.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AnswerError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];

        let mut lowered = text.to_lowercase();
        for label in SECTION_LABELS {
            lowered = lowered.replace(label, " ");
        }

        let words = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty());
        for word in words {
            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for trigram in padded.windows(3) {
                let bucket = trigram_bucket(trigram, vector.len());
                vector[bucket] += 1.0;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vector.iter_mut().for_each(|value| *value /= magnitude);
        }
        Ok(vector)
    }
}

fn trigram_bucket(trigram: &[char], buckets: usize) -> usize {
    let mut encoded = [0u8; 4];
    let hash = trigram.iter().fold(FNV_OFFSET, |hash, ch| {
        ch.encode_utf8(&mut encoded)
            .bytes()
            .fold(hash, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    });
    (hash % buckets as u64) as usize
}

#[derive(Debug, Clone, Serialize)]
struct EndpointRequest<'a> {
    inputs: &'a str,
}

/// Client for a hosted sentence-embedding endpoint that accepts
/// `{"inputs": text}` and answers with an `embeddings` or `predictions`
/// vector (optionally nested one level).
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    endpoint: String,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            dimensions,
            client: Client::new(),
        }
    }

    fn embed_blocking(&self, text: &str) -> Result<Vec<f32>, AnswerError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&EndpointRequest { inputs: text });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(AnswerError::Embedding(format!(
                "embedding request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: Value = response.json()?;
        vector_from_payload(&payload).ok_or_else(|| {
            AnswerError::Embedding(format!(
                "embedding response from {} holds no vector",
                self.endpoint
            ))
        })
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AnswerError> {
        tokio::task::block_in_place(|| self.embed_blocking(text))
    }
}

fn vector_from_payload(payload: &Value) -> Option<Vec<f32>> {
    let field = ["embeddings", "predictions", "embedding"]
        .iter()
        .find_map(|key| payload.get(*key))
        .unwrap_or(payload);

    let values = match field {
        Value::Array(items) if items.first().is_some_and(Value::is_array) => items.first()?.as_array()?,
        Value::Array(items) => items,
        _ => return None,
    };

    values
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect()
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let dot: f64 = left
        .iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();
    let left_norm = left.iter().map(|a| f64::from(*a).powi(2)).sum::<f64>().sqrt();
    let right_norm = right.iter().map(|b| f64::from(*b).powi(2)).sum::<f64>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

/// Page number → embedding vector; accepts `"3"` and `"Page 3"` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageEmbeddings {
    pub pages: BTreeMap<u32, Vec<f32>>,
}

impl PageEmbeddings {
    pub fn from_json_str(input: &str) -> Result<Self, DocumentError> {
        let raw: BTreeMap<String, Vec<f32>> = serde_json::from_str(input)?;
        let mut pages = BTreeMap::new();
        for (key, vector) in raw {
            pages.insert(parse_page_key(&key)?, vector);
        }
        Ok(Self { pages })
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn lowest_page(&self) -> Option<u32> {
        self.pages.keys().next().copied()
    }
}

pub fn build_page_embeddings<E>(
    embedder: &E,
    page_texts: &BTreeMap<u32, String>,
) -> Result<PageEmbeddings, AnswerError>
where
    E: Embedder + ?Sized,
{
    let mut pages = BTreeMap::new();
    for (page, text) in page_texts {
        tracing::debug!(page, total = page_texts.len(), "embedding page");
        pages.insert(*page, embedder.embed(text)?);
    }
    Ok(PageEmbeddings { pages })
}
