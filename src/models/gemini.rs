use anyhow::Context;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{CallError, GenerateRequest, LlmClient, LlmSettings};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const BLOCKING_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Google `generateContent` REST endpoint.
pub struct GeminiClient {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(settings: &LlmSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        let base = settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        Ok(Self {
            endpoint: format!("{base}/models/{}:generateContent", settings.model),
            api_key: settings.api_key.trim().to_string(),
            client,
        })
    }
}

impl LlmClient for GeminiClient {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, CallError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: SAFETY_THRESHOLD,
                })
                .collect(),
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(CallError::from_transport)?;
        let status = resp.status();
        let text = resp.text().map_err(CallError::from_transport)?;
        if !status.is_success() {
            return Err(CallError::from_status(status.as_u16(), text));
        }
        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| CallError::Malformed(e.to_string()))?;
        extract_text(parsed)
    }
}

fn extract_text(resp: GenerateContentResponse) -> Result<String, CallError> {
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(CallError::Blocked(reason));
    }
    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Err(CallError::EmptyResponse("no candidates".to_string()));
    };
    let finish = candidate.finish_reason.unwrap_or_default();
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if BLOCKING_FINISH_REASONS.contains(&finish.as_str()) {
        return Err(CallError::Blocked(finish));
    }
    if text.trim().is_empty() {
        return Err(CallError::EmptyResponse(if finish.is_empty() {
            "unknown".to_string()
        } else {
            finish
        }));
    }
    Ok(text)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
struct SafetySetting<'a> {
    category: &'a str,
    threshold: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<String, CallError> {
        extract_text(serde_json::from_str(json).expect("fixture json"))
    }

    #[test]
    fn joins_candidate_parts() {
        let got = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"Привет, "},{"text":"мир"}]},"finishReason":"STOP"}]}"#,
        );
        assert_eq!(got.ok().as_deref(), Some("Привет, мир"));
    }

    #[test]
    fn prompt_block_is_fatal() {
        let got = parse(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        assert!(matches!(got, Err(CallError::Blocked(r)) if r == "SAFETY"));
    }

    #[test]
    fn safety_finish_is_fatal_even_with_partial_text() {
        let got = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"half"}]},"finishReason":"SAFETY"}]}"#,
        );
        assert!(matches!(got, Err(CallError::Blocked(_))));
    }

    #[test]
    fn missing_text_is_transient() {
        let got = parse(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#);
        match got {
            Err(e @ CallError::EmptyResponse(_)) => assert!(e.is_transient()),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(parse("{}"), Err(CallError::EmptyResponse(_))));
    }

    #[test]
    fn request_body_uses_camel_case() {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: "hi" }],
            }],
            generation_config: GenerationConfig { temperature: 0.5 },
            safety_settings: vec![SafetySetting {
                category: SAFETY_CATEGORIES[0],
                threshold: SAFETY_THRESHOLD,
            }],
        };
        let v = serde_json::to_value(&body).expect("serialize");
        assert_eq!(v["generationConfig"]["temperature"], 0.5);
        assert_eq!(v["safetySettings"][0]["threshold"], "BLOCK_MEDIUM_AND_ABOVE");
        assert_eq!(v["contents"][0]["parts"][0]["text"], "hi");
    }
}
