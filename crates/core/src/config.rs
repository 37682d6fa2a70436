//! Pipeline configuration. Every component takes its own section at
//! construction; a JSON file may override any subset of the defaults.

use crate::error::DocumentError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PART_NAME_PATTERN: &str = r"_part_(\d+)_ocrresults\.json$";
pub const DEFAULT_CONTEXT_PLACEHOLDER: &str = "{context}";
pub const DEFAULT_PAGE_BREAK: &str = "\n---PAGE BREAK---\n";
pub const DEFAULT_DELIMITER: &str = "||";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub structure: StructureOptions,
    pub merge: MergeOptions,
    pub cleaning: CleaningOptions,
    pub answer: AnswerOptions,
    pub generation: GenerationParams,
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, DocumentError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DocumentError> {
        self.merge.validate()?;
        self.cleaning.validate()?;
        self.answer.validate()?;
        self.generation.validate()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureOptions {
    /// Order table cells by column index instead of by encounter order.
    pub order_cells_by_column: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Regex with one capture group holding the 1-based part index.
    pub part_name_pattern: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            part_name_pattern: DEFAULT_PART_NAME_PATTERN.to_string(),
        }
    }
}

impl MergeOptions {
    fn validate(&self) -> Result<(), DocumentError> {
        let pattern = regex::Regex::new(&self.part_name_pattern)?;
        if pattern.captures_len() < 2 {
            return Err(DocumentError::InvalidConfig(format!(
                "part name pattern {} has no capture group",
                self.part_name_pattern
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningOptions {
    pub top_n: usize,
    pub bottom_n: usize,
    /// Fraction of pages a slice must strictly exceed to count as repeated.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Keep the text around the lines region (`Text:` header, key-value
    /// pairs, tables) when cleaning page texts; otherwise emit only the lines.
    pub keep_key_value_text: bool,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            top_n: 1,
            bottom_n: 1,
            threshold: 0.6,
            max_iterations: 100,
            keep_key_value_text: true,
        }
    }
}

impl CleaningOptions {
    fn validate(&self) -> Result<(), DocumentError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(DocumentError::InvalidConfig(format!(
                "cleaning threshold {} must be within [0, 1]",
                self.threshold
            )));
        }
        if self.top_n == 0 && self.bottom_n == 0 {
            return Err(DocumentError::InvalidConfig(
                "cleaning needs top_n or bottom_n above zero".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(DocumentError::InvalidConfig(
                "max_iterations must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerOptions {
    pub max_pages: usize,
    pub delimiter: String,
    pub context_placeholder: String,
    pub page_break: String,
    /// Lowercase the answer and strip `answer`, colons and newlines from it.
    pub normalize_answer: bool,
    pub prompt_template: String,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            max_pages: 8,
            delimiter: DEFAULT_DELIMITER.to_string(),
            context_placeholder: DEFAULT_CONTEXT_PLACEHOLDER.to_string(),
            page_break: DEFAULT_PAGE_BREAK.to_string(),
            normalize_answer: true,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

impl AnswerOptions {
    fn validate(&self) -> Result<(), DocumentError> {
        if self.max_pages == 0 {
            return Err(DocumentError::InvalidConfig(
                "max_pages must be greater than zero".to_string(),
            ));
        }
        if self.delimiter.is_empty() {
            return Err(DocumentError::InvalidConfig(
                "answer delimiter must not be empty".to_string(),
            ));
        }
        if self.context_placeholder.is_empty() {
            return Err(DocumentError::InvalidConfig(
                "context placeholder must not be empty".to_string(),
            ));
        }
        if !self.prompt_template.contains(&self.context_placeholder) {
            return Err(DocumentError::InvalidConfig(format!(
                "prompt template lacks the context placeholder {}",
                self.context_placeholder
            )));
        }
        Ok(())
    }
}

pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
Answer the QUESTION using only the CONTEXT below, which holds the most relevant pages \
of one hospitalization record. If the CONTEXT has no evidence of what the question asks \
about, treat it as absent. Give the answer, then the \"{delimiter}\" delimiter, then one \
sentence explaining how the CONTEXT supports it. Follow any formatting instructions in \
the QUESTION exactly.

QUESTION:
{question}

CONTEXT:
{context}
";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 2_048,
            temperature: 0.3,
            top_p: 0.9,
        }
    }
}

impl GenerationParams {
    fn validate(&self) -> Result<(), DocumentError> {
        if self.max_tokens == 0 {
            return Err(DocumentError::InvalidConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(DocumentError::InvalidConfig(format!(
                "top_p {} must be within [0, 1]",
                self.top_p
            )));
        }
        Ok(())
    }
}
