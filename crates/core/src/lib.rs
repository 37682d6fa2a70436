pub mod answer;
pub mod blocks;
pub mod cleaner;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod merge;
pub mod models;
pub mod stores;
pub mod structurer;
pub mod traits;

pub use answer::{
    parse_answer_and_reason, rank_pages, similarity_weighted_confidence, AnswerEngine, RankedPage,
};
pub use blocks::{Block, BlockGraph, BlockKind, RawBlock, RecognitionResult};
pub use cleaner::{CleaningReport, NoiseCleaner};
pub use config::{
    AnswerOptions, CleaningOptions, GenerationParams, MergeOptions, PipelineConfig,
    StructureOptions,
};
pub use embeddings::{
    build_page_embeddings, cosine_similarity, CharacterNgramEmbedder, Embedder, HttpEmbedder,
    PageEmbeddings, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{AnswerError, DocumentError, ModelError};
pub use llm::{is_context_overflow, ChatCompletionModel};
pub use merge::{
    merge_parts, part_index_from_key, DocumentPart, MergeState, MergeStatus, MergedDocument,
    PartMergeCoordinator,
};
pub use models::{
    page_texts_from_json, parse_page_key, KeyValuePair, QueryResult, StructuredDocument,
    StructuredPage, Table,
};
pub use stores::{FsPartStore, InMemoryPartStore};
pub use structurer::{render_page_text, DocumentStructurer};
pub use traits::{LanguageModel, PartStore};
