//! Reassembly of documents that were recognized in several parts.

use crate::blocks::{DocumentMetadata, RawBlock, RecognitionResult};
use crate::config::MergeOptions;
use crate::error::DocumentError;
use crate::traits::PartStore;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// One recognized chunk of a split document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPart {
    pub part_index: usize,
    pub blocks: Vec<RawBlock>,
}

impl DocumentPart {
    pub fn page_count(&self) -> u32 {
        self.blocks.iter().filter(|block| block.is_page()).count() as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedDocument {
    pub total_pages: u32,
    pub blocks: Vec<RawBlock>,
}

impl MergedDocument {
    pub fn into_recognition_result(self) -> RecognitionResult {
        RecognitionResult {
            metadata: Some(DocumentMetadata {
                pages: self.total_pages,
            }),
            blocks: self.blocks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    AwaitingParts,
    Merging,
    Merged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeStatus {
    AwaitingParts { received: usize, expected: usize },
    Merged { key: String, document: MergedDocument },
}

impl MergeStatus {
    pub fn state(&self) -> MergeState {
        match self {
            Self::AwaitingParts { .. } => MergeState::AwaitingParts,
            Self::Merged { .. } => MergeState::Merged,
        }
    }
}

/// Extracts the 1-based part index from a part result identifier.
pub fn part_index_from_key(key: &str, pattern: &Regex) -> Result<usize, DocumentError> {
    pattern
        .captures(key)
        .and_then(|captures| captures.get(1))
        .and_then(|index| index.as_str().parse::<usize>().ok())
        .ok_or_else(|| DocumentError::MalformedPartName {
            key: key.to_string(),
            pattern: pattern.as_str().to_string(),
        })
}

/// Concatenates parts in index order, shifting page numbers by the pages of
/// every earlier part. Each page-bearing block of a part is shifted exactly
/// once, whether it is reached as a top-level block or through a CHILD link.
pub fn merge_parts(mut parts: Vec<DocumentPart>) -> MergedDocument {
    parts.sort_by_key(|part| part.part_index);

    let mut merged = Vec::new();
    let mut page_offset = 0u32;

    for part in parts {
        let page_count = part.page_count();
        let mut blocks = part.blocks;

        if page_offset > 0 {
            let positions: HashMap<String, usize> = blocks
                .iter()
                .enumerate()
                .map(|(position, block)| (block.id.clone(), position))
                .collect();
            let mut shifted = vec![false; blocks.len()];

            for position in 0..blocks.len() {
                shift_page(&mut blocks[position], &mut shifted[position], page_offset);

                let children: Vec<usize> = blocks[position]
                    .child_ids()
                    .filter_map(|id| positions.get(id).copied())
                    .collect();
                for child in children {
                    shift_page(&mut blocks[child], &mut shifted[child], page_offset);
                }
            }
        }

        debug!(
            part = part.part_index,
            pages = page_count,
            offset = page_offset,
            "merged part"
        );
        merged.extend(blocks);
        page_offset += page_count;
    }

    MergedDocument {
        total_pages: page_offset,
        blocks: merged,
    }
}

fn shift_page(block: &mut RawBlock, shifted: &mut bool, offset: u32) {
    if *shifted {
        return;
    }
    if let Some(page) = block.page.as_mut() {
        *page += offset;
    }
    *shifted = true;
}

/// Decides, on each part arrival, whether a split document is complete and
/// merges it when it is. Calling it again before completion only reports
/// progress; calling it after completion rebuilds the same merge.
pub struct PartMergeCoordinator<S>
where
    S: PartStore,
{
    store: S,
    pattern: Regex,
}

impl<S> PartMergeCoordinator<S>
where
    S: PartStore + Send + Sync,
{
    pub fn new(store: S, options: &MergeOptions) -> Result<Self, DocumentError> {
        Ok(Self {
            store,
            pattern: Regex::new(&options.part_name_pattern)?,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn on_part_arrived(&self, document: &str) -> Result<MergeStatus, DocumentError> {
        let expected = self.store.expected_parts(document).await?;
        let keys = self.store.list_part_keys(document).await?;

        let mut indexed: BTreeMap<usize, String> = BTreeMap::new();
        for key in keys {
            let index = part_index_from_key(&key, &self.pattern)?;
            if index == 0 || index > expected {
                return Err(DocumentError::UnexpectedPart {
                    document: document.to_string(),
                    index,
                    expected,
                });
            }
            if let Some(first) = indexed.get(&index) {
                return Err(DocumentError::DuplicatePart {
                    document: document.to_string(),
                    index,
                    first: first.clone(),
                    second: key,
                });
            }
            indexed.insert(index, key);
        }

        let present: HashSet<usize> = indexed.keys().copied().collect();
        let complete = present.len() == expected && (1..=expected).all(|index| present.contains(&index));
        if !complete {
            info!(
                document,
                received = indexed.len(),
                expected,
                state = ?MergeState::AwaitingParts,
                "waiting for more parts"
            );
            return Ok(MergeStatus::AwaitingParts {
                received: indexed.len(),
                expected,
            });
        }

        info!(document, parts = expected, state = ?MergeState::Merging, "all parts received");
        let mut parts = Vec::with_capacity(expected);
        for (part_index, key) in &indexed {
            let result = self.store.load_part(document, key).await?;
            parts.push(DocumentPart {
                part_index: *part_index,
                blocks: result.blocks,
            });
        }

        let merged = merge_parts(parts);
        let key = self
            .store
            .store_merged(document, &merged.clone().into_recognition_result())
            .await?;

        info!(
            document,
            total_pages = merged.total_pages,
            key = %key,
            state = ?MergeState::Merged,
            "merged part results"
        );
        Ok(MergeStatus::Merged {
            key,
            document: merged,
        })
    }
}
