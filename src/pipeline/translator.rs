//! Sequential two-pass chapter translation.
//!
//! Chapters are resolved strictly in listing order: the glossary and the recent-chapter window
//! both accumulate chapter by chapter, so no chapter starts before every earlier one is done,
//! skipped or given up on.

use std::path::PathBuf;
use std::time::Duration;

use crate::chapters::{Chapter, ChapterStore};
use crate::glossary::{parse_candidates, Glossary};
use crate::markers::{extract_draft, strip_markers};
use crate::models::{call_with_retries, CallError, GenerateRequest, LlmClient, Pause, RetryPolicy};
use crate::progress::ConsoleProgress;
use crate::quality::{inspect, DefectPolicy};
use crate::retrieval::{retrieve_block, ContextRetriever};
use crate::textutil::clip;
use crate::tokens::TokenEstimator;

use super::context::{assemble, AssembledContext, ContextLimits, PASS1_MARGIN, PASS2_MARGIN, RECENT_DEPTH};
use super::prompts::{render_template, PromptSet};
use super::report::{ChapterIssue, RunReport};
use super::state::{AttemptOutcome, ChapterState, Event, DEFAULT_MAX_ATTEMPTS};
use super::trace::TraceWriter;
use super::window::RecentWindow;

const EMPTY_CONTEXT: &str = "(none)";

#[derive(Clone, Debug)]
pub struct TranslatorSettings {
    pub source_lang: String,
    pub target_lang: String,
    pub temperature: f32,
    pub retry: RetryPolicy,
    pub max_prompt_tokens: usize,
    pub recent_window_tokens: usize,
    pub pass1_margin: usize,
    pub pass2_margin: usize,
    /// Passages requested from the retriever per chapter.
    pub num_results: usize,
    pub defect_policy: DefectPolicy,
    pub max_attempts: u32,
    /// Pause after each chapter that reached the LLM; a defect retry waits twice as long.
    pub delay: Duration,
    pub glossary_path: PathBuf,
    pub max_chapters: Option<usize>,
}

impl TranslatorSettings {
    pub fn new(glossary_path: PathBuf) -> Self {
        Self {
            source_lang: "Chinese".to_string(),
            target_lang: "Russian".to_string(),
            temperature: 0.7,
            retry: RetryPolicy::default(),
            max_prompt_tokens: 800_000,
            recent_window_tokens: 1000,
            pass1_margin: PASS1_MARGIN,
            pass2_margin: PASS2_MARGIN,
            num_results: 5,
            defect_policy: DefectPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(1500),
            glossary_path,
            max_chapters: None,
        }
    }
}

/// External collaborators, borrowed for the length of a run.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub llm: &'a dyn LlmClient,
    pub retriever: Option<&'a dyn ContextRetriever>,
    pub estimator: &'a dyn TokenEstimator,
    pub pause: &'a dyn Pause,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resolution {
    /// Resolved without calling the LLM.
    Skipped,
    Attempted,
}

pub struct ChapterTranslator<'a> {
    settings: TranslatorSettings,
    prompts: PromptSet,
    services: Services<'a>,
    trace: TraceWriter,
    progress: ConsoleProgress,
    glossary: Glossary,
    window: RecentWindow,
    glossary_added: usize,
    glossary_conflicts: usize,
}

impl<'a> ChapterTranslator<'a> {
    /// Loads the glossary from `settings.glossary_path`; a missing or corrupt file starts empty.
    pub fn new(settings: TranslatorSettings, prompts: PromptSet, services: Services<'a>) -> Self {
        let glossary = Glossary::load(&settings.glossary_path);
        Self {
            settings,
            prompts,
            services,
            trace: TraceWriter::disabled(),
            progress: ConsoleProgress::silent(),
            glossary,
            window: RecentWindow::default(),
            glossary_added: 0,
            glossary_conflicts: 0,
        }
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_progress(mut self, progress: ConsoleProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn glossary(&self) -> &Glossary {
        &self.glossary
    }

    pub fn window(&self) -> &RecentWindow {
        &self.window
    }

    pub fn run(&mut self, store: &ChapterStore) -> anyhow::Result<RunReport> {
        let chapters = store.list()?;
        let total = chapters.len();
        self.progress.info(format!(
            "{total} chapter(s) in {}; glossary has {} entries",
            store.source_dir().display(),
            self.glossary.len()
        ));

        let mut report = RunReport {
            total_chapters: total,
            ..Default::default()
        };
        let mut attempted = 0usize;
        for ch in &chapters {
            let over_limit = self
                .settings
                .max_chapters
                .is_some_and(|limit| attempted >= limit);
            if over_limit && !store.has_target(ch) {
                report.not_attempted.push(ch.file_name.clone());
                continue;
            }
            if self.process_chapter(store, ch, total, &mut report) == Resolution::Attempted {
                attempted += 1;
                tracing::debug!("pause {:?}", self.settings.delay);
                self.services.pause.pause(self.settings.delay);
            }
        }

        if !self.glossary.persist(&self.settings.glossary_path) {
            tracing::error!("final glossary save failed");
        }
        report.glossary_entries = self.glossary.len();
        report.glossary_added = self.glossary_added;
        report.glossary_conflicts = self.glossary_conflicts;
        Ok(report)
    }

    fn process_chapter(
        &mut self,
        store: &ChapterStore,
        ch: &Chapter,
        total: usize,
        report: &mut RunReport,
    ) -> Resolution {
        let name = ch.file_name.as_str();
        if store.has_target(ch) {
            self.progress.chapter(ch.ordinal, total, name, "already translated");
            match store.read_source(ch) {
                Ok(text) if !self.window.contains(name) => self.window.push(name, text.trim()),
                Ok(_) => {}
                Err(err) => tracing::error!("{name}: source unreadable, not used as context: {err:#}"),
            }
            report.skipped_existing.push(name.to_string());
            return Resolution::Skipped;
        }

        let raw = match store.read_source(ch) {
            Ok(t) => t,
            Err(err) => {
                tracing::error!("{name}: {err:#}");
                report.unreadable.push(ChapterIssue::new(name, format!("{err:#}")));
                return Resolution::Skipped;
            }
        };
        let source_bytes = raw.len();
        let text = raw.trim();
        if text.is_empty() {
            tracing::warn!("{name}: source is empty, skipped");
            report.skipped_empty.push(name.to_string());
            return Resolution::Skipped;
        }

        self.progress.chapter(ch.ordinal, total, name, "translating");
        let retrieved = self
            .services
            .retriever
            .and_then(|r| retrieve_block(r, text, self.settings.num_results, name));

        let max_attempts = self.settings.max_attempts;
        let mut state = ChapterState::Pending;
        let mut translated: Option<String> = None;
        let mut last_problem = String::new();
        while !state.is_terminal() {
            state = state.next(Event::Begin, max_attempts);
            let ChapterState::Attempting { attempt } = state else {
                continue;
            };
            if attempt > 1 {
                self.services.pause.pause(self.settings.delay * 2);
            }
            tracing::info!("{name}: attempt {attempt}/{max_attempts}");
            let outcome = self.attempt(ch, text, source_bytes, attempt, retrieved.as_deref());
            state = state.next(outcome.event(), max_attempts);
            match outcome {
                AttemptOutcome::Translated(t) => translated = Some(t),
                AttemptOutcome::Defect(defect) => {
                    tracing::warn!("{name}: defective output on attempt {attempt}: {defect}");
                    last_problem = defect.to_string();
                }
                AttemptOutcome::Fatal(err) => {
                    tracing::error!("{name}: llm call failed, chapter abandoned: {err}");
                    last_problem = err.to_string();
                }
            }
        }

        match (state, translated) {
            (ChapterState::Succeeded { attempt }, Some(text_out)) => {
                match store.write_target(ch, &text_out) {
                    Ok(()) => {
                        tracing::info!("{name}: saved {} (attempt {attempt})", ch.target_file_name());
                        self.window.push(name, text);
                        report.translated.push(name.to_string());
                        self.progress.chapter(ch.ordinal, total, name, "translated");
                    }
                    Err(err) => {
                        tracing::error!("{name}: {err:#}");
                        report.write_failures.push(ChapterIssue::new(name, format!("{err:#}")));
                    }
                }
            }
            (ChapterState::SkippedDefect { attempts }, _) => {
                tracing::error!("{name}: still defective after {attempts} attempt(s), skipped");
                report
                    .defect_skipped
                    .push(ChapterIssue::new(name, &last_problem));
                self.progress.chapter(ch.ordinal, total, name, "skipped (defect)");
            }
            (_, _) => {
                report.call_errors.push(ChapterIssue::new(name, &last_problem));
                self.progress.chapter(ch.ordinal, total, name, "failed (llm error)");
            }
        }
        Resolution::Attempted
    }

    fn attempt(
        &mut self,
        ch: &Chapter,
        text: &str,
        source_bytes: usize,
        attempt: u32,
        retrieved: Option<&str>,
    ) -> AttemptOutcome {
        let name = ch.file_name.as_str();

        let glossary_block = self.glossary.format_for_prompt();
        let ctx = self.assemble(text, &glossary_block, retrieved, self.settings.pass1_margin);
        let prompt = self.render(&self.prompts.draft, ch, text, &ctx);
        self.log_prompt(name, "pass 1", &prompt, &ctx);
        self.trace
            .write_chapter_text(ch.ordinal, attempt, "p1", "prompt", &prompt);
        let response = match self.call(&prompt) {
            Ok(r) => r,
            Err(err) => return AttemptOutcome::Fatal(err),
        };
        self.trace
            .write_chapter_text(ch.ordinal, attempt, "p1", "response", &response);

        let draft = extract_draft(&response);
        if draft.is_empty() {
            tracing::warn!("{name}: no draft in pass-1 response: {}", clip(&response, 200));
        } else {
            tracing::debug!("{name}: draft {} chars", draft.chars().count());
        }
        let merged = self.glossary.merge(parse_candidates(&response));
        self.glossary_added += merged.added();
        self.glossary_conflicts += merged.conflicts();
        if merged.changed() && !self.glossary.persist(&self.settings.glossary_path) {
            tracing::error!("glossary not saved; continuing with the in-memory copy");
        }
        let reuse = if ctx.has_retrieval() { retrieved } else { None };

        let glossary_block = self.glossary.format_for_prompt();
        let ctx = self.assemble(text, &glossary_block, reuse, self.settings.pass2_margin);
        let prompt = self.render(&self.prompts.final_pass, ch, text, &ctx);
        self.log_prompt(name, "pass 2", &prompt, &ctx);
        self.trace
            .write_chapter_text(ch.ordinal, attempt, "p2", "prompt", &prompt);
        let response = match self.call(&prompt) {
            Ok(r) => r,
            Err(err) => return AttemptOutcome::Fatal(err),
        };
        self.trace
            .write_chapter_text(ch.ordinal, attempt, "p2", "response", &response);

        let output = strip_markers(&response);
        match inspect(&output, source_bytes, &self.settings.defect_policy) {
            Some(defect) => AttemptOutcome::Defect(defect),
            None => AttemptOutcome::Translated(output),
        }
    }

    fn assemble(
        &self,
        text: &str,
        glossary_block: &str,
        retrieved: Option<&str>,
        margin: usize,
    ) -> AssembledContext {
        let recent = self.window.most_recent(RECENT_DEPTH);
        assemble(
            self.services.estimator,
            text,
            glossary_block,
            retrieved,
            &recent,
            &ContextLimits {
                max_prompt_tokens: self.settings.max_prompt_tokens,
                margin,
                recent_window_tokens: self.settings.recent_window_tokens,
            },
        )
    }

    fn render(&self, template: &str, ch: &Chapter, text: &str, ctx: &AssembledContext) -> String {
        let background = ctx.background();
        let background = if background.is_empty() {
            EMPTY_CONTEXT
        } else {
            background.as_str()
        };
        render_template(
            template,
            &[
                ("source_lang", self.settings.source_lang.as_str()),
                ("target_lang", self.settings.target_lang.as_str()),
                ("glossary", ctx.glossary.as_str()),
                ("context", background),
                ("chapter_name", ch.file_name.as_str()),
                ("chapter_text", text),
            ],
        )
    }

    fn log_prompt(&self, name: &str, pass: &str, prompt: &str, ctx: &AssembledContext) {
        let tokens = self.services.estimator.estimate(prompt);
        tracing::info!(
            "{name}: {pass} prompt {tokens} tokens (context {}/{}, {} fragment(s))",
            ctx.used(),
            ctx.available,
            ctx.fragments.len()
        );
        if tokens > self.settings.max_prompt_tokens {
            tracing::warn!(
                "{name}: {pass} prompt exceeds the {} token limit",
                self.settings.max_prompt_tokens
            );
        }
    }

    fn call(&self, prompt: &str) -> Result<String, CallError> {
        call_with_retries(
            self.services.llm,
            &GenerateRequest {
                prompt,
                temperature: self.settings.temperature,
            },
            &self.settings.retry,
            self.services.pause,
        )
    }
}
