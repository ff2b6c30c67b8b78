//! Boundary to the external text-generation service.
//!
//! The orchestrator only depends on [`LlmClient`]; providers translate their wire format and HTTP
//! status codes into the [`CallError`] taxonomy, which is what decides between backoff and
//! giving up on a chapter.

use std::time::Duration;

use anyhow::anyhow;

pub mod gemini;
pub mod openai;
pub mod retry;

pub use gemini::GeminiClient;
pub use openai::OpenAiCompatClient;
pub use retry::{call_with_retries, Pause, RetryPolicy, ThreadPause};

pub trait LlmClient {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, CallError>;
}

/// Request envelope shared by the providers.
#[derive(Clone, Copy, Debug)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub temperature: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("empty response (finish reason: {0})")]
    EmptyResponse(String),
    #[error("blocked by provider: {0}")]
    Blocked(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("gave up after {attempts} calls; last error: {last}")]
    RetriesExhausted { attempts: u32, last: Box<CallError> },
}

impl CallError {
    /// Failures worth another call after a backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_)
                | Self::Timeout(_)
                | Self::Network(_)
                | Self::Unavailable(_)
                | Self::EmptyResponse(_)
        )
    }

    /// Maps a non-success HTTP status to the failure taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited(body),
            408 | 504 => Self::Timeout(body),
            500 | 502 | 503 => Self::Unavailable(body),
            400 | 422 => Self::InvalidArgument(body),
            _ => Self::Rejected { status, body },
        }
    }

    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAiCompat,
}

impl ProviderKind {
    pub fn parse(s: Option<&str>) -> anyhow::Result<Self> {
        match s.unwrap_or("gemini").trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "openai-compatible" | "openai_compat" => Ok(Self::OpenAiCompat),
            other => Err(anyhow!("unknown llm provider: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: String,
    pub timeout: Duration,
    pub temperature: f32,
}

pub fn build_client(settings: &LlmSettings) -> anyhow::Result<Box<dyn LlmClient>> {
    Ok(match settings.provider {
        ProviderKind::Gemini => Box::new(GeminiClient::new(settings)?),
        ProviderKind::OpenAiCompat => Box::new(OpenAiCompatClient::new(settings)?),
    })
}
