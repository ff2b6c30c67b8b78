use std::path::Path;

use anyhow::Context;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChapterIssue {
    pub chapter: String,
    pub detail: String,
}

impl ChapterIssue {
    pub fn new(chapter: &str, detail: impl std::fmt::Display) -> Self {
        Self {
            chapter: chapter.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Outcome of one translation run, written next to the glossary so a human can fix what is
/// left and rerun.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    pub total_chapters: usize,
    pub translated: Vec<String>,
    pub skipped_existing: Vec<String>,
    pub skipped_empty: Vec<String>,
    pub call_errors: Vec<ChapterIssue>,
    pub defect_skipped: Vec<ChapterIssue>,
    pub unreadable: Vec<ChapterIssue>,
    pub write_failures: Vec<ChapterIssue>,
    /// Chapters left for a later run because of the chapter limit.
    pub not_attempted: Vec<String>,
    pub glossary_entries: usize,
    pub glossary_added: usize,
    pub glossary_conflicts: usize,
}

impl RunReport {
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        !(self.call_errors.is_empty()
            && self.defect_skipped.is_empty()
            && self.unreadable.is_empty()
            && self.write_failures.is_empty())
    }

    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let mut out = vec![format!(
            "translated {}/{} (already done {}, empty {})",
            self.translated.len(),
            self.total_chapters,
            self.skipped_existing.len(),
            self.skipped_empty.len()
        )];
        let sections = [
            ("call errors", &self.call_errors),
            ("skipped for defects", &self.defect_skipped),
            ("unreadable", &self.unreadable),
            ("write failures", &self.write_failures),
        ];
        for (label, issues) in sections {
            if issues.is_empty() {
                continue;
            }
            let names: Vec<&str> = issues.iter().map(|i| i.chapter.as_str()).collect();
            out.push(format!("{label}: {}", names.join(", ")));
        }
        if !self.not_attempted.is_empty() {
            out.push(format!("left for next run: {}", self.not_attempted.len()));
        }
        out.push(format!(
            "glossary: {} entries (+{}, {} conflicts)",
            self.glossary_entries, self.glossary_added, self.glossary_conflicts
        ));
        out
    }
}

pub fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report dir: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("serialize run report")?;
    std::fs::write(path, json).with_context(|| format!("write report: {}", path.display()))?;
    Ok(())
}
