use crate::error::DocumentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One form field; serialized as a single-entry object `{key: value}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "BTreeMap<String, String>", try_from = "BTreeMap<String, String>")]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

impl KeyValuePair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Empty text is never considered contained.
    pub fn contains(&self, text: &str) -> bool {
        !text.is_empty() && (self.key.contains(text) || self.value.contains(text))
    }
}

impl From<KeyValuePair> for BTreeMap<String, String> {
    fn from(pair: KeyValuePair) -> Self {
        BTreeMap::from([(pair.key, pair.value)])
    }
}

impl TryFrom<BTreeMap<String, String>> for KeyValuePair {
    type Error = String;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!(
                "key/value entry must hold exactly one field, found {}",
                map.len()
            ));
        }
        let (key, value) = map.into_iter().next().unwrap_or_default();
        Ok(Self { key, value })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(rename = "Column Header", default)]
    pub header: Vec<String>,
    #[serde(rename = "Rows", default)]
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredPage {
    #[serde(rename = "text", default)]
    pub lines: Vec<String>,
    #[serde(rename = "KeyValuePairs", default)]
    pub key_value_pairs: Vec<KeyValuePair>,
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl StructuredPage {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.key_value_pairs.is_empty() && self.tables.is_empty()
    }
}

/// Page number → page content. Serializes with string page keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredDocument {
    pub pages: BTreeMap<u32, StructuredPage>,
}

impl StructuredDocument {
    pub fn from_json_str(input: &str) -> Result<Self, DocumentError> {
        Self::from_json_value(serde_json::from_str(input)?)
    }

    /// Like [`Self::from_json_str`]; page keys such as `"Page 3"` are normalized.
    pub fn from_json_value(value: Value) -> Result<Self, DocumentError> {
        let raw: BTreeMap<String, StructuredPage> = serde_json::from_value(value)?;
        let mut pages = BTreeMap::new();
        for (key, page) in raw {
            pages.insert(parse_page_key(&key)?, page);
        }
        Ok(Self { pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Parses `"3"`, `"Page 3"` or `"page3"` into `3`.
pub fn parse_page_key(key: &str) -> Result<u32, DocumentError> {
    let normalized = key.to_lowercase().replace("page", "").replace(' ', "");
    normalized
        .trim()
        .parse::<u32>()
        .map_err(|_| DocumentError::InvalidPageKey(key.to_string()))
}

/// Reads page texts from either the structured form (`{page: {text: [..]}}`,
/// rendered through [`crate::structurer::render_page_text`]) or the plain form
/// (`{page: "Text: ..."}`).
pub fn page_texts_from_json(value: Value) -> Result<BTreeMap<u32, String>, DocumentError> {
    let Value::Object(entries) = value else {
        return Err(DocumentError::InvalidArgument(
            "page document must be a JSON object keyed by page".to_string(),
        ));
    };

    let mut texts = BTreeMap::new();
    for (key, entry) in entries {
        let page = parse_page_key(&key)?;
        let text = match entry {
            Value::String(text) => text,
            structured @ Value::Object(_) => {
                let content: StructuredPage = serde_json::from_value(structured)?;
                crate::structurer::render_page_text(page, &content)
            }
            other => {
                return Err(DocumentError::InvalidArgument(format!(
                    "page {key} holds neither text nor a structured page: {other}"
                )))
            }
        };
        texts.insert(page, text);
    }

    Ok(texts)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
    pub reason: String,
    pub pages_used: Vec<u32>,
    pub confidence: f64,
}
