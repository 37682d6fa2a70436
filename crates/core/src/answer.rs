//! Retrieval-augmented question answering over one document's pages.

use crate::config::{AnswerOptions, GenerationParams};
use crate::embeddings::{cosine_similarity, Embedder, PageEmbeddings};
use crate::error::{AnswerError, ModelError};
use crate::models::QueryResult;
use crate::traits::LanguageModel;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedPage {
    pub page: u32,
    pub similarity: f64,
}

pub struct AnswerEngine<E, M>
where
    E: Embedder,
    M: LanguageModel,
{
    embedder: E,
    model: M,
    options: AnswerOptions,
    generation: GenerationParams,
}

impl<E, M> AnswerEngine<E, M>
where
    E: Embedder + Send + Sync,
    M: LanguageModel + Send + Sync,
{
    pub fn new(embedder: E, model: M, options: AnswerOptions, generation: GenerationParams) -> Self {
        Self {
            embedder,
            model,
            options,
            generation,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Answers `question` from the best matching pages, giving up one page of
    /// context each time the model reports the prompt as too long.
    pub async fn answer(
        &self,
        question: &str,
        embeddings: &PageEmbeddings,
        page_texts: &BTreeMap<u32, String>,
    ) -> Result<QueryResult, AnswerError> {
        // Formatting instructions after `|` are not part of what is searched for.
        let searched = question.split('|').next().unwrap_or(question);
        let question_vector = self.embedder.embed(searched)?;
        let ranked = rank_pages(&question_vector, embeddings)?;
        let lowest_page = embeddings.lowest_page().ok_or(AnswerError::NoPages)?;

        let prompt_skeleton = self
            .options
            .prompt_template
            .replace("{question}", question)
            .replace("{delimiter}", &self.options.delimiter);

        let max_pages = self.options.max_pages.min(ranked.len());
        for page_budget in (1..=max_pages).rev() {
            let selected = &ranked[..page_budget];
            let confidence = similarity_weighted_confidence(
                &selected.iter().map(|page| page.similarity).collect::<Vec<_>>(),
            );
            let prompt = prompt_skeleton.replace(
                &self.options.context_placeholder,
                &self.build_context(selected, page_texts)?,
            );

            match self.model.generate(&prompt, &self.generation).await {
                Ok(response) => {
                    let (answer, reason) = parse_answer_and_reason(
                        &response,
                        &self.options.delimiter,
                        self.options.normalize_answer,
                    );
                    let pages_used = selected
                        .iter()
                        .map(|page| page.page - lowest_page + 1)
                        .collect();

                    info!(pages = selected.len(), confidence, "question answered");
                    return Ok(QueryResult {
                        question: question.to_string(),
                        answer,
                        reason,
                        pages_used,
                        confidence,
                    });
                }
                Err(ModelError::ContextTooLong(details)) => {
                    warn!(
                        pages = page_budget,
                        next = page_budget - 1,
                        details = %details,
                        "context too long, retrying with fewer pages"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(AnswerError::ContextExhausted {
            question: question.to_string(),
        })
    }

    fn build_context(
        &self,
        selected: &[RankedPage],
        page_texts: &BTreeMap<u32, String>,
    ) -> Result<String, AnswerError> {
        let texts = selected
            .iter()
            .map(|ranked| {
                page_texts
                    .get(&ranked.page)
                    .map(String::as_str)
                    .ok_or(AnswerError::MissingPageText(ranked.page))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(texts.join(&self.options.page_break))
    }
}

/// Pages ordered by similarity to `question`, best first; ties keep page order.
pub fn rank_pages(question: &[f32], embeddings: &PageEmbeddings) -> Result<Vec<RankedPage>, AnswerError> {
    if embeddings.is_empty() {
        return Err(AnswerError::NoPages);
    }

    let mut ranked = embeddings
        .pages
        .iter()
        .map(|(page, vector)| {
            if vector.len() != question.len() {
                return Err(AnswerError::DimensionMismatch {
                    page: *page,
                    expected: question.len(),
                    found: vector.len(),
                });
            }
            Ok(RankedPage {
                page: *page,
                similarity: cosine_similarity(question, vector),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    ranked.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));
    Ok(ranked)
}

/// Mean of the similarities weighted by their own square, so strong matches
/// dominate weak ones.
pub fn similarity_weighted_confidence(similarities: &[f64]) -> f64 {
    let weights: f64 = similarities.iter().map(|score| score * score).sum();
    if weights == 0.0 {
        return 0.0;
    }
    similarities.iter().map(|score| score * score * score).sum::<f64>() / weights
}

/// Splits a model response at the first `delimiter` into answer and reason.
pub fn parse_answer_and_reason(response: &str, delimiter: &str, normalize: bool) -> (String, String) {
    let (answer, reason) = match response.split_once(delimiter) {
        Some((answer, reason)) => {
            if reason.contains(delimiter) {
                warn!(
                    delimiter,
                    occurrences = response.matches(delimiter).count(),
                    "delimiter repeated in model response, splitting at the first"
                );
            }
            (answer, reason.trim().to_string())
        }
        None => {
            warn!(delimiter, response, "delimiter missing from model response");
            (response, String::new())
        }
    };

    let answer = if normalize {
        normalize_answer(answer)
    } else {
        answer.trim().to_string()
    };
    (answer, reason)
}

fn normalize_answer(answer: &str) -> String {
    answer
        .to_lowercase()
        .replace("answer", "")
        .replace(['\n', ':'], "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PAGE_BREAK;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns the same vector for every question.
    struct FixedEmbedder(Vec<f32>);

    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            self.0.len()
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, AnswerError> {
            Ok(self.0.clone())
        }
    }

    enum Behaviour {
        Reply(String),
        TooLongAbove(usize),
        AlwaysTooLong,
        Unavailable,
    }

    struct FakeModel {
        behaviour: Behaviour,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeModel {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn page_counts(&self) -> Vec<usize> {
            self.prompts
                .lock()
                .map(|prompts| {
                    prompts
                        .iter()
                        .map(|prompt| prompt.matches(DEFAULT_PAGE_BREAK).count() + 1)
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl LanguageModel for FakeModel {
        async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, ModelError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            let pages = prompt.matches(DEFAULT_PAGE_BREAK).count() + 1;
            match &self.behaviour {
                Behaviour::Reply(text) => Ok(text.clone()),
                Behaviour::TooLongAbove(limit) if pages > *limit => Err(ModelError::ContextTooLong(
                    "This model's maximum context length is 4096 tokens. Please reduce the length of the messages.".to_string(),
                )),
                Behaviour::TooLongAbove(_) => Ok("Yes || found on the page".to_string()),
                Behaviour::AlwaysTooLong => Err(ModelError::ContextTooLong("too long".to_string())),
                Behaviour::Unavailable => Err(ModelError::BackendResponse {
                    backend: "fake".to_string(),
                    details: "503".to_string(),
                }),
            }
        }
    }

    fn engine(question: Vec<f32>, behaviour: Behaviour, max_pages: usize) -> AnswerEngine<FixedEmbedder, FakeModel> {
        AnswerEngine::new(
            FixedEmbedder(question),
            FakeModel::new(behaviour),
            AnswerOptions {
                max_pages,
                ..AnswerOptions::default()
            },
            GenerationParams::default(),
        )
    }

    fn embeddings(pages: &[(u32, [f32; 2])]) -> PageEmbeddings {
        PageEmbeddings {
            pages: pages.iter().map(|(page, vector)| (*page, vector.to_vec())).collect(),
        }
    }

    fn texts(pages: &[u32]) -> BTreeMap<u32, String> {
        pages
            .iter()
            .map(|page| (*page, format!("Text:\ncontent of page {page}")))
            .collect()
    }

    #[tokio::test]
    async fn single_best_page_gives_full_confidence() {
        let engine = engine(vec![1.0, 0.0], Behaviour::Reply("Yes || the note says so".to_string()), 1);
        let result = engine
            .answer(
                "Was a central line placed?",
                &embeddings(&[(1, [1.0, 0.0]), (2, [0.0, 1.0])]),
                &texts(&[1, 2]),
            )
            .await
            .expect("answers");

        assert_eq!(result.pages_used, vec![1]);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.answer, "yes");
        assert_eq!(result.reason, "the note says so");
    }

    #[tokio::test]
    async fn context_is_built_in_rank_order() {
        let engine = engine(vec![0.0, 1.0], Behaviour::Reply("No || none".to_string()), 8);
        let result = engine
            .answer(
                "Any falls?",
                &embeddings(&[(3, [1.0, 0.0]), (4, [0.6, 0.8]), (5, [0.0, 1.0])]),
                &texts(&[3, 4, 5]),
            )
            .await
            .expect("answers");

        assert_eq!(result.pages_used, vec![3, 2, 1]);
        let prompts = engine.model().prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default();
        let prompt = &prompts[0];
        let fifth = prompt.find("content of page 5").expect("page 5 in context");
        let third = prompt.find("content of page 3").expect("page 3 in context");
        assert!(fifth < third);
        assert!(prompt.contains("Any falls?"));
    }

    #[tokio::test]
    async fn too_long_context_sheds_one_page_at_a_time() {
        let engine = engine(vec![1.0, 0.0], Behaviour::TooLongAbove(1), 3);
        let result = engine
            .answer(
                "Was the patient transfused?",
                &embeddings(&[(1, [1.0, 0.0]), (2, [0.8, 0.6]), (3, [0.6, 0.8])]),
                &texts(&[1, 2, 3]),
            )
            .await
            .expect("answers with one page");

        assert_eq!(engine.model().page_counts(), vec![3, 2, 1]);
        assert_eq!(result.pages_used, vec![1]);
    }

    #[tokio::test]
    async fn exhausting_every_page_is_a_distinct_error() {
        let engine = engine(vec![1.0, 0.0], Behaviour::AlwaysTooLong, 3);
        let result = engine
            .answer(
                "Was the patient transfused?",
                &embeddings(&[(1, [1.0, 0.0]), (2, [0.8, 0.6]), (3, [0.6, 0.8])]),
                &texts(&[1, 2, 3]),
            )
            .await;

        assert!(matches!(result, Err(AnswerError::ContextExhausted { .. })));
        assert_eq!(engine.model().page_counts(), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn retries_start_from_the_ranked_page_count() {
        let engine = engine(vec![1.0, 0.0], Behaviour::AlwaysTooLong, 8);
        let result = engine
            .answer("Q", &embeddings(&[(1, [1.0, 0.0]), (2, [0.0, 1.0])]), &texts(&[1, 2]))
            .await;

        assert!(matches!(result, Err(AnswerError::ContextExhausted { .. })));
        assert_eq!(engine.model().page_counts(), vec![2, 1]);
    }

    #[tokio::test]
    async fn other_model_failures_are_not_retried() {
        let engine = engine(vec![1.0, 0.0], Behaviour::Unavailable, 4);
        let result = engine
            .answer("Q", &embeddings(&[(1, [1.0, 0.0]), (2, [0.0, 1.0])]), &texts(&[1, 2]))
            .await;

        assert!(matches!(
            result,
            Err(AnswerError::Model(ModelError::BackendResponse { .. }))
        ));
        assert_eq!(engine.model().page_counts().len(), 1);
    }

    #[tokio::test]
    async fn ranked_pages_need_text() {
        let engine = engine(vec![1.0, 0.0], Behaviour::Reply("x || y".to_string()), 2);
        let result = engine
            .answer("Q", &embeddings(&[(1, [1.0, 0.0]), (2, [0.0, 1.0])]), &texts(&[1]))
            .await;
        assert!(matches!(result, Err(AnswerError::MissingPageText(2))));
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let embeddings = PageEmbeddings {
            pages: BTreeMap::from([(1, vec![1.0, 0.0, 0.0])]),
        };
        assert!(matches!(
            rank_pages(&[1.0, 0.0], &embeddings),
            Err(AnswerError::DimensionMismatch { page: 1, expected: 2, found: 3 })
        ));
    }

    #[test]
    fn ties_keep_page_order() {
        let ranked = rank_pages(&[1.0, 0.0], &embeddings(&[(2, [1.0, 0.0]), (1, [1.0, 0.0]), (3, [0.0, 1.0])]))
            .expect("ranks");
        assert_eq!(ranked.iter().map(|page| page.page).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn confidence_favours_strong_pages() {
        assert_eq!(similarity_weighted_confidence(&[0.5]), 0.5);
        let mixed = similarity_weighted_confidence(&[0.9, 0.1]);
        assert!(mixed > 0.5 && mixed < 0.9);
        assert!((mixed - (0.729 + 0.001) / (0.81 + 0.01)).abs() < 1e-12);
        assert_eq!(similarity_weighted_confidence(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn responses_split_on_the_first_delimiter() {
        assert_eq!(
            parse_answer_and_reason("Answer: Yes || seen in MAR", "||", true),
            ("yes".to_string(), "seen in MAR".to_string())
        );
        assert_eq!(
            parse_answer_and_reason("No || first || second", "||", false),
            ("No".to_string(), "first || second".to_string())
        );
        assert_eq!(
            parse_answer_and_reason("Can't tell", "||", true),
            ("can't tell".to_string(), String::new())
        );
    }
}
