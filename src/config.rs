use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "novel-translator.toml";
pub const CONFIG_ENV_VAR: &str = "NOVEL_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub split: SplitSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub quality: QualitySection,
    #[serde(default)]
    pub book: BookSection,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// Relative paths resolve against `data_dir`, which itself resolves against the config file.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct PathsSection {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub input_novel: Option<PathBuf>,
    #[serde(default)]
    pub source_chapters_dir: Option<PathBuf>,
    #[serde(default)]
    pub target_chapters_dir: Option<PathBuf>,
    #[serde(default)]
    pub titled_chapters_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub glossary_file: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub trace_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct SplitSection {
    /// Regex matched per line; capture group 1 is the chapter title.
    #[serde(default)]
    pub header_regex: Option<String>,
    /// `encoding_rs` label of the input novel, e.g. "utf-8" or "gb18030".
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LlmSection {
    /// "gemini" or "openai".
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub max_backoff_secs: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RetrievalSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub num_results: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ContextSection {
    #[serde(default)]
    pub max_prompt_tokens: Option<usize>,
    /// Tokens taken from the end of older recent chapters; 0 disables.
    #[serde(default)]
    pub recent_window_tokens: Option<usize>,
    #[serde(default)]
    pub pass1_margin: Option<usize>,
    #[serde(default)]
    pub pass2_margin: Option<usize>,
    /// "cl100k_base" or "chars".
    #[serde(default)]
    pub tokenizer: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct QualitySection {
    #[serde(default)]
    pub max_cjk_ratio: Option<f64>,
    #[serde(default)]
    pub min_paragraphs: Option<usize>,
    #[serde(default)]
    pub min_source_bytes_for_paragraphs: Option<usize>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BookSection {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Language code written to the manifest.
    #[serde(default)]
    pub language: Option<String>,
    /// Language names used inside prompts.
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub target_suffix: Option<String>,
    #[serde(default)]
    pub title_batch_max_tokens: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub draft: Option<String>,
    #[serde(default, rename = "final")]
    pub final_pass: Option<String>,
    #[serde(default)]
    pub titles: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    /// Pause after every chapter that reached the LLM.
    #[serde(default)]
    pub delay_secs: Option<f64>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
    /// Used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
    /// Dev-only limiter: translate at most N chapters per run.
    #[serde(default)]
    pub max_chapters: Option<usize>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}
