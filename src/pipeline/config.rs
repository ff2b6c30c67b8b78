use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};

use crate::config::{find_default_config, load_config, AppConfig, CONFIG_ENV_VAR, CONFIG_FILE_NAME};
use crate::models::{LlmSettings, ProviderKind, RetryPolicy};
use crate::pipeline::context::{PASS1_MARGIN, PASS2_MARGIN};
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};
use crate::pipeline::state::DEFAULT_MAX_ATTEMPTS;
use crate::pipeline::translator::TranslatorSettings;
use crate::quality::DefectPolicy;
use crate::tokens::EstimatorKind;

pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_HEADER_REGEX: &str = crate::chapters::split::DEFAULT_HEADER_PATTERN;
pub const REPORT_FILE_NAME: &str = "translation_report.json";

/// Values given on the command line; each one wins over the config file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub input: Option<PathBuf>,
    pub no_retrieval: bool,
    pub max_chapters: Option<usize>,
    pub trace_prompts: bool,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub retry: RetryPolicy,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub enabled: bool,
    pub base_url: String,
    pub num_results: usize,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct BookInfo {
    pub title: String,
    pub author: String,
    /// Language code for the manifest.
    pub language: String,
    pub source_lang: String,
    pub target_lang: String,
    pub target_suffix: String,
    pub title_batch_max_tokens: usize,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,

    pub input_novel: PathBuf,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub titled_dir: PathBuf,
    pub output_dir: PathBuf,
    pub glossary_path: PathBuf,
    pub log_file: PathBuf,
    pub trace_dir: PathBuf,
    pub report_path: PathBuf,

    pub header_regex: String,
    pub encoding: String,

    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,

    pub max_prompt_tokens: usize,
    pub recent_window_tokens: usize,
    pub pass1_margin: usize,
    pub pass2_margin: usize,
    pub tokenizer: EstimatorKind,

    pub defect_policy: DefectPolicy,
    pub max_attempts: u32,

    pub book: BookInfo,

    pub delay: Duration,
    pub trace_prompts: bool,
    pub log_level: String,
    pub max_chapters: Option<usize>,

    pub prompts: PromptSet,
}

impl PipelineConfig {
    pub fn from_paths_and_args(cli: &CliOverrides) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let cfg_file = cli
            .config
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&cwd, CONFIG_FILE_NAME));

        let mut file_cfg = AppConfig::default();
        let mut prompts = PromptSet::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                prompts = PromptSet::load(p, &file_cfg.prompts).context("load prompts")?;
            } else if cli.config.is_some() {
                return Err(anyhow!("config file not found: {}", p.display()));
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| cwd.join(CONFIG_FILE_NAME));
        Self::resolve(cfg_path, file_cfg, prompts, cli)
    }

    /// Pure resolution of file values, CLI overrides and defaults.
    pub fn resolve(
        config_path: PathBuf,
        file_cfg: AppConfig,
        prompts: PromptSet,
        cli: &CliOverrides,
    ) -> anyhow::Result<Self> {
        let config_dir = config_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let data_dir = under(&config_dir, file_cfg.paths.data_dir.clone(), "data");
        let p = &file_cfg.paths;

        let input_novel = match cli.input.clone() {
            Some(i) => i,
            None => under(&data_dir, p.input_novel.clone(), "input/novel.txt"),
        };

        let llm = &file_cfg.llm;
        let provider = ProviderKind::parse(llm.provider.as_deref())?;
        let llm = LlmConfig {
            provider,
            model: llm
                .model
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: llm.base_url.clone().filter(|s| !s.trim().is_empty()),
            api_key_env: llm
                .api_key_env
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
            timeout: Duration::from_secs(llm.timeout_secs.unwrap_or(300).max(1)),
            temperature: llm.temperature.unwrap_or(0.7),
            retry: RetryPolicy {
                max_retries: llm.max_retries.unwrap_or(3),
                max_backoff: Duration::from_secs(llm.max_backoff_secs.unwrap_or(60)),
            },
        };

        let r = &file_cfg.retrieval;
        let retrieval = RetrievalConfig {
            enabled: r.enabled.unwrap_or(true) && !cli.no_retrieval,
            base_url: r
                .base_url
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:8765".to_string()),
            num_results: r.num_results.unwrap_or(5),
            timeout: Duration::from_secs(r.timeout_secs.unwrap_or(60).max(1)),
        };

        let c = &file_cfg.context;
        let q = &file_cfg.quality;
        let defaults = DefectPolicy::default();
        let defect_policy = DefectPolicy {
            max_cjk_ratio: q.max_cjk_ratio.unwrap_or(defaults.max_cjk_ratio),
            min_source_bytes_for_paragraphs: q
                .min_source_bytes_for_paragraphs
                .unwrap_or(defaults.min_source_bytes_for_paragraphs),
            min_paragraphs: q.min_paragraphs.unwrap_or(defaults.min_paragraphs),
        };

        let b = &file_cfg.book;
        let book = BookInfo {
            title: b.title.clone().unwrap_or_else(|| "Untitled".to_string()),
            author: b.author.clone().unwrap_or_else(|| "Unknown".to_string()),
            language: b.language.clone().unwrap_or_else(|| "ru".to_string()),
            source_lang: b.source_lang.clone().unwrap_or_else(|| "Chinese".to_string()),
            target_lang: b.target_lang.clone().unwrap_or_else(|| "Russian".to_string()),
            target_suffix: b.target_suffix.clone().unwrap_or_else(|| "_ru".to_string()),
            title_batch_max_tokens: b.title_batch_max_tokens.unwrap_or(20_000),
        };

        let pl = &file_cfg.pipeline;
        let delay_secs = pl.delay_secs.unwrap_or(1.5);
        if !delay_secs.is_finite() || delay_secs < 0.0 {
            return Err(anyhow!("pipeline.delay_secs must be a non-negative number"));
        }

        Ok(Self {
            input_novel,
            source_dir: under(&data_dir, p.source_chapters_dir.clone(), "chapters_original"),
            target_dir: under(&data_dir, p.target_chapters_dir.clone(), "chapters_translated"),
            titled_dir: under(&data_dir, p.titled_chapters_dir.clone(), "chapters_titled"),
            output_dir: under(&data_dir, p.output_dir.clone(), "output"),
            glossary_path: under(&data_dir, p.glossary_file.clone(), "glossary.json"),
            log_file: under(&data_dir, p.log_file.clone(), "logs/translation.log"),
            trace_dir: under(&data_dir, p.trace_dir.clone(), "trace"),
            report_path: data_dir.join(REPORT_FILE_NAME),
            header_regex: file_cfg
                .split
                .header_regex
                .clone()
                .unwrap_or_else(|| DEFAULT_HEADER_REGEX.to_string()),
            encoding: file_cfg
                .split
                .encoding
                .clone()
                .unwrap_or_else(|| "utf-8".to_string()),
            llm,
            retrieval,
            max_prompt_tokens: c.max_prompt_tokens.unwrap_or(800_000),
            recent_window_tokens: c.recent_window_tokens.unwrap_or(1000),
            pass1_margin: c.pass1_margin.unwrap_or(PASS1_MARGIN),
            pass2_margin: c.pass2_margin.unwrap_or(PASS2_MARGIN),
            tokenizer: EstimatorKind::parse(c.tokenizer.as_deref()),
            defect_policy,
            max_attempts: q.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            book,
            delay: Duration::from_secs_f64(delay_secs),
            trace_prompts: cli.trace_prompts || pl.trace_prompts.unwrap_or(false),
            log_level: pl.log_level.clone().unwrap_or_else(|| "info".to_string()),
            max_chapters: cli.max_chapters.or(pl.max_chapters).filter(|n| *n > 0),
            prompts,
            config_path,
            data_dir,
        })
    }

    /// Reads the API key lazily, so splitting and maintenance commands work without one.
    pub fn llm_settings(&self) -> anyhow::Result<LlmSettings> {
        let api_key = std::env::var(&self.llm.api_key_env).unwrap_or_default();
        if api_key.trim().is_empty() && self.llm.provider == ProviderKind::Gemini {
            return Err(anyhow!(
                "API key not set: export {} (see [llm].api_key_env)",
                self.llm.api_key_env
            ));
        }
        Ok(LlmSettings {
            provider: self.llm.provider,
            model: self.llm.model.clone(),
            base_url: self.llm.base_url.clone(),
            api_key: api_key.trim().to_string(),
            timeout: self.llm.timeout,
            temperature: self.llm.temperature,
        })
    }

    pub fn translator_settings(&self) -> TranslatorSettings {
        TranslatorSettings {
            source_lang: self.book.source_lang.clone(),
            target_lang: self.book.target_lang.clone(),
            temperature: self.llm.temperature,
            retry: self.llm.retry.clone(),
            max_prompt_tokens: self.max_prompt_tokens,
            recent_window_tokens: self.recent_window_tokens,
            pass1_margin: self.pass1_margin,
            pass2_margin: self.pass2_margin,
            num_results: self.retrieval.num_results,
            defect_policy: self.defect_policy.clone(),
            max_attempts: self.max_attempts,
            delay: self.delay,
            glossary_path: self.glossary_path.clone(),
            max_chapters: self.max_chapters,
        }
    }
}

fn under(base: &Path, configured: Option<PathBuf>, default_rel: &str) -> PathBuf {
    let p = configured.unwrap_or_else(|| PathBuf::from(default_rel));
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"# All relative paths resolve against data_dir; data_dir resolves against this file.
[paths]
data_dir = "data"
input_novel = "input/novel.txt"
source_chapters_dir = "chapters_original"
target_chapters_dir = "chapters_translated"
titled_chapters_dir = "chapters_titled"
output_dir = "output"
glossary_file = "glossary.json"
log_file = "logs/translation.log"
trace_dir = "trace"

[split]
# Capture group 1 is the chapter title.
header_regex = '^##\s+(.*)'
# Any encoding_rs label, e.g. "gb18030" for older Chinese text files.
encoding = "utf-8"

[llm]
# "gemini" or "openai" (any OpenAI-compatible chat/completions endpoint).
provider = "gemini"
model = "gemini-2.5-flash"
# base_url = "https://generativelanguage.googleapis.com/v1beta"
api_key_env = "GOOGLE_API_KEY"
timeout_secs = 300
max_retries = 3
max_backoff_secs = 60
temperature = 0.7

[retrieval]
enabled = true
base_url = "http://127.0.0.1:8765"
num_results = 5
timeout_secs = 60

[context]
max_prompt_tokens = 800000
# Tokens taken from the end of older recent chapters; 0 disables tails.
recent_window_tokens = 1000
pass1_margin = 2000
pass2_margin = 1000
# "cl100k_base" or "chars"
tokenizer = "cl100k_base"

[quality]
max_cjk_ratio = 0.05
min_paragraphs = 3
min_source_bytes_for_paragraphs = 500
max_attempts = 2

[book]
title = "Untitled"
author = "Unknown"
language = "ru"
source_lang = "Chinese"
target_lang = "Russian"
target_suffix = "_ru"
title_batch_max_tokens = 20000

[prompts]
draft = "prompts/draft.txt"
final = "prompts/final.txt"
titles = "prompts/titles.txt"

[pipeline]
delay_secs = 1.5
trace_prompts = false
# Used when RUST_LOG is unset.
log_level = "info"
# max_chapters = 5
"#;
