//! Recognition block graph: the wire records produced by the OCR service and
//! the typed view the structurer walks.

use crate::error::DocumentError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

pub const CHILD_RELATIONSHIP: &str = "CHILD";
pub const VALUE_RELATIONSHIP: &str = "VALUE";

/// One block exactly as the recognizer emits it.
///
/// Fields this crate does not interpret (geometry, confidence, ...) are kept in
/// `extra` so a merged graph serializes back without loss.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RawBlock {
    pub id: String,
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_index: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Relationship {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub ids: Vec<String>,
}

impl RawBlock {
    pub fn related_ids<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.relationships
            .iter()
            .filter(move |relationship| relationship.kind == kind)
            .flat_map(|relationship| relationship.ids.iter())
    }

    pub fn child_ids(&self) -> impl Iterator<Item = &String> + '_ {
        self.related_ids(CHILD_RELATIONSHIP)
    }

    pub fn is_page(&self) -> bool {
        self.block_type == "PAGE"
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    #[serde(rename = "Pages")]
    pub pages: u32,
}

/// The JSON document the recognizer writes for one pass (or one chunk).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecognitionResult {
    #[serde(rename = "DocumentMetadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
    #[serde(rename = "Blocks", default)]
    pub blocks: Vec<RawBlock>,
}

impl RecognitionResult {
    pub fn from_json_str(input: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn page_block_count(&self) -> u32 {
        self.blocks.iter().filter(|block| block.is_page()).count() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRole {
    Key,
    Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Page {
        children: Vec<String>,
    },
    Line {
        text: String,
        children: Vec<String>,
    },
    Word {
        text: String,
    },
    KeyValue {
        role: Option<EntityRole>,
        children: Vec<String>,
        values: Vec<String>,
    },
    Table {
        children: Vec<String>,
    },
    Cell {
        row: u32,
        column: u32,
        children: Vec<String>,
    },
    /// Block types the structurer has no use for (selection elements, merged
    /// cells, layout blocks). Their children are still walkable.
    Other {
        block_type: String,
        children: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    pub page: Option<u32>,
    pub kind: BlockKind,
}

impl Block {
    /// Page the block belongs to; blocks without one are on page 1.
    pub fn page_number(&self) -> u32 {
        self.page.unwrap_or(1)
    }

    pub fn child_ids(&self) -> &[String] {
        match &self.kind {
            BlockKind::Page { children }
            | BlockKind::Line { children, .. }
            | BlockKind::KeyValue { children, .. }
            | BlockKind::Table { children }
            | BlockKind::Cell { children, .. }
            | BlockKind::Other { children, .. } => children,
            BlockKind::Word { .. } => &[],
        }
    }
}

impl From<&RawBlock> for Block {
    fn from(raw: &RawBlock) -> Self {
        let children: Vec<String> = raw.child_ids().cloned().collect();
        let text = raw.text.clone().unwrap_or_default();

        let kind = match raw.block_type.as_str() {
            "PAGE" => BlockKind::Page { children },
            "LINE" => BlockKind::Line { text, children },
            "WORD" => BlockKind::Word { text },
            "KEY_VALUE_SET" | "KEY_VALUE" => BlockKind::KeyValue {
                role: entity_role(&raw.entity_types),
                children,
                values: raw.related_ids(VALUE_RELATIONSHIP).cloned().collect(),
            },
            "TABLE" => BlockKind::Table { children },
            "CELL" => BlockKind::Cell {
                row: raw.row_index.unwrap_or(0),
                column: raw.column_index.unwrap_or(0),
                children,
            },
            other => BlockKind::Other {
                block_type: other.to_string(),
                children,
            },
        };

        Block {
            id: raw.id.clone(),
            page: raw.page,
            kind,
        }
    }
}

fn entity_role(entity_types: &[String]) -> Option<EntityRole> {
    if entity_types.iter().any(|kind| kind == "KEY") {
        Some(EntityRole::Key)
    } else if entity_types.iter().any(|kind| kind == "VALUE") {
        Some(EntityRole::Value)
    } else {
        None
    }
}

/// Resolved view over one recognition pass.
#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    blocks: Vec<Block>,
    by_id: HashMap<String, usize>,
}

impl BlockGraph {
    pub fn new(blocks: Vec<Block>) -> Self {
        let by_id = blocks
            .iter()
            .enumerate()
            .map(|(position, block)| (block.id.clone(), position))
            .collect();

        Self { blocks, by_id }
    }

    pub fn from_raw(raw: &[RawBlock]) -> Self {
        Self::new(raw.iter().map(Block::from).collect())
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.by_id.get(id).map(|position| &self.blocks[*position])
    }

    /// Text of every WORD reachable from `ids`, in relationship order, joined
    /// with single spaces. Unknown ids are skipped; a word listed twice is
    /// emitted twice.
    pub fn word_text<'a, I>(&self, ids: I) -> String
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut words = Vec::new();
        let mut ancestors = HashSet::new();
        for id in ids {
            self.collect_words(id, &mut ancestors, &mut words);
        }
        words.join(" ").trim().to_string()
    }

    // `ancestors` holds the blocks on the current path, so only cycles are cut.
    fn collect_words<'a>(
        &'a self,
        id: &str,
        ancestors: &mut HashSet<&'a str>,
        words: &mut Vec<&'a str>,
    ) {
        let Some(block) = self.get(id) else {
            return;
        };

        match &block.kind {
            BlockKind::Word { text } => {
                if !text.is_empty() {
                    words.push(text.as_str());
                }
            }
            _ => {
                if !ancestors.insert(block.id.as_str()) {
                    return;
                }
                for child in block.child_ids() {
                    self.collect_words(child, ancestors, words);
                }
                ancestors.remove(block.id.as_str());
            }
        }
    }

    /// Key and value text for a KEY block; `None` for any other block.
    pub fn key_value(&self, block: &Block) -> Option<(String, String)> {
        let BlockKind::KeyValue {
            role: Some(EntityRole::Key),
            children,
            values,
        } = &block.kind
        else {
            return None;
        };

        let key = self.word_text(children);
        let value = self.word_text(
            values
                .iter()
                .filter_map(|value_id| self.get(value_id))
                .flat_map(|value_block| value_block.child_ids()),
        );

        Some((key, value))
    }

    /// CELL blocks directly under a TABLE block, in relationship order.
    pub fn table_cells<'a>(&'a self, table: &'a Block) -> impl Iterator<Item = &'a Block> + 'a {
        table
            .child_ids()
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|child| matches!(child.kind, BlockKind::Cell { .. }))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{RawBlock, Relationship, CHILD_RELATIONSHIP, VALUE_RELATIONSHIP};
    use serde_json::Map;

    pub fn raw(id: &str, block_type: &str, page: Option<u32>) -> RawBlock {
        RawBlock {
            id: id.to_string(),
            block_type: block_type.to_string(),
            page,
            text: None,
            entity_types: Vec::new(),
            relationships: Vec::new(),
            row_index: None,
            column_index: None,
            extra: Map::new(),
        }
    }

    pub fn word(id: &str, page: u32, text: &str) -> RawBlock {
        RawBlock {
            text: Some(text.to_string()),
            ..raw(id, "WORD", Some(page))
        }
    }

    pub fn line(id: &str, page: u32, text: &str) -> RawBlock {
        RawBlock {
            text: Some(text.to_string()),
            ..raw(id, "LINE", Some(page))
        }
    }

    pub fn with_children(mut block: RawBlock, ids: &[&str]) -> RawBlock {
        block.relationships.push(Relationship {
            kind: CHILD_RELATIONSHIP.to_string(),
            ids: ids.iter().map(|id| id.to_string()).collect(),
        });
        block
    }

    pub fn key(id: &str, page: u32, children: &[&str], values: &[&str]) -> RawBlock {
        let mut block = with_children(raw(id, "KEY_VALUE_SET", Some(page)), children);
        block.entity_types = vec!["KEY".to_string()];
        block.relationships.push(Relationship {
            kind: VALUE_RELATIONSHIP.to_string(),
            ids: values.iter().map(|id| id.to_string()).collect(),
        });
        block
    }

    pub fn value(id: &str, page: u32, children: &[&str]) -> RawBlock {
        let mut block = with_children(raw(id, "KEY_VALUE_SET", Some(page)), children);
        block.entity_types = vec!["VALUE".to_string()];
        block
    }

    pub fn cell(id: &str, page: u32, row: u32, column: u32, children: &[&str]) -> RawBlock {
        let mut block = with_children(raw(id, "CELL", Some(page)), children);
        block.row_index = Some(row);
        block.column_index = Some(column);
        block
    }
}
