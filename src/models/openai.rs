use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{CallError, GenerateRequest, LlmClient, LlmSettings};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Any `chat/completions` compatible endpoint.
pub struct OpenAiCompatClient {
    endpoint: String,
    model: String,
    headers: HeaderMap,
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new(settings: &LlmSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build OpenAI-compatible HTTP client")?;
        let mut headers = HeaderMap::new();
        let key = settings.api_key.trim();
        if !key.is_empty() {
            let auth = format!("Bearer {key}");
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth).context("invalid API key")?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let base = settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        Ok(Self {
            endpoint: format!("{base}/chat/completions"),
            model: settings.model.clone(),
            headers,
            client,
        })
    }
}

impl LlmClient for OpenAiCompatClient {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, CallError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: request.prompt,
            }],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .map_err(CallError::from_transport)?;
        let status = resp.status();
        let text = resp.text().map_err(CallError::from_transport)?;
        if !status.is_success() {
            return Err(CallError::from_status(status.as_u16(), text));
        }
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| CallError::Malformed(e.to_string()))?;
        answer_text(parsed)
    }
}

fn answer_text(parsed: ChatResponse) -> Result<String, CallError> {
    let Some(choice) = parsed.choices.into_iter().next() else {
        return Err(CallError::EmptyResponse("no choices".to_string()));
    };
    let finish = choice.finish_reason.unwrap_or_default();
    if finish == "content_filter" {
        return Err(CallError::Blocked(finish));
    }
    let content = choice.message.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(CallError::EmptyResponse(finish));
    }
    Ok(content)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}
