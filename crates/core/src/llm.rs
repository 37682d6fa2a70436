use crate::config::GenerationParams;
use crate::traits::LanguageModel;
use crate::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const BACKEND: &str = "chat-completions";

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct ChatCompletionModel {
    client: Client,
    url: Url,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionModel {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ModelError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            url: base.join("v1/chat/completions")?,
            model: model.into(),
            api_key,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for ChatCompletionModel {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "querying language model");

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        };

        let mut request = self.client.post(self.url.clone()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            if is_context_overflow(&details) {
                return Err(ModelError::ContextTooLong(details));
            }
            return Err(ModelError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {details}"),
            });
        }

        let payload: ChatResponse = response.json().await?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "response has no message content".to_string(),
            })
    }
}

/// True when a model error message says the prompt is too long.
pub fn is_context_overflow(message: &str) -> bool {
    let lowered = message.to_lowercase();
    (lowered.contains("maximum context length") && lowered.contains("reduce the length"))
        || lowered.contains("context_length_exceeded")
}
