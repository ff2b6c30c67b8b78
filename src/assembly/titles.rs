use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{call_with_retries, GenerateRequest, LlmClient, Pause, RetryPolicy};
use crate::pipeline::prompts::render_template;
use crate::tokens::TokenEstimator;

static NUMBERED_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*[.)]?\s*(.*)").expect("numbered line regex"));

/// Batched chapter-title translation.
pub struct TitleTranslator<'a> {
    pub llm: &'a dyn LlmClient,
    pub estimator: &'a dyn TokenEstimator,
    pub pause: &'a dyn Pause,
    pub retry: RetryPolicy,
    pub template: &'a str,
    pub source_lang: &'a str,
    pub target_lang: &'a str,
    pub temperature: f32,
    pub max_prompt_tokens: usize,
}

impl TitleTranslator<'_> {
    /// One translated title per input, in order.
    ///
    /// Titles the response does not cover keep their original text, and so does the whole batch
    /// when the prompt is over budget or the call fails.
    pub fn translate(&self, titles: &[String]) -> Vec<String> {
        let originals: Vec<String> = titles.to_vec();
        let listing = numbered_listing(titles);
        if listing.is_empty() {
            return originals;
        }
        let count = titles.iter().filter(|t| !t.trim().is_empty()).count();
        let count_text = count.to_string();
        let prompt = render_template(
            self.template,
            &[
                ("count", count_text.as_str()),
                ("source_lang", self.source_lang),
                ("target_lang", self.target_lang),
                ("titles", listing.as_str()),
            ],
        );
        let tokens = self.estimator.estimate(&prompt);
        tracing::info!("title batch: {count} title(s), {tokens} tokens");
        if tokens > self.max_prompt_tokens {
            tracing::error!(
                "title batch prompt ({tokens} tokens) exceeds {}; keeping original titles",
                self.max_prompt_tokens
            );
            return originals;
        }

        let request = GenerateRequest {
            prompt: &prompt,
            temperature: self.temperature,
        };
        let response = match call_with_retries(self.llm, &request, &self.retry, self.pause) {
            Ok(r) => r,
            Err(err) => {
                tracing::error!("title batch failed: {err}; keeping original titles");
                return originals;
            }
        };
        tracing::debug!("title batch response:\n{response}");

        let parsed = parse_numbered_titles(&response);
        let mut matched = 0usize;
        let out: Vec<String> = titles
            .iter()
            .enumerate()
            .map(|(i, original)| {
                if original.trim().is_empty() {
                    return original.clone();
                }
                match parsed.get(&(i + 1)) {
                    Some(t) => {
                        matched += 1;
                        t.clone()
                    }
                    None => {
                        tracing::warn!("no translation for title #{} '{original}'", i + 1);
                        original.clone()
                    }
                }
            })
            .collect();
        if matched < count {
            tracing::warn!("matched {matched} of {count} title(s)");
        }
        out
    }
}

/// `N. title` lines for every non-empty title; N is the 1-based position in `titles`.
fn numbered_listing(titles: &[String]) -> String {
    titles
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.trim().is_empty())
        .map(|(i, t)| format!("{}. {}", i + 1, t.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number → text for every `N. text`, `N) text` or `N text` line with non-empty text.
pub fn parse_numbered_titles(response: &str) -> HashMap<usize, String> {
    let mut out = HashMap::new();
    for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(caps) = NUMBERED_LINE_RE.captures(line) else {
            tracing::debug!("unnumbered title line: {line}");
            continue;
        };
        let Ok(num) = caps[1].parse::<usize>() else {
            continue;
        };
        let text = caps[2].trim();
        if !text.is_empty() {
            out.insert(num, text.to_string());
        }
    }
    out
}
