use std::path::{Path, PathBuf};

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::chapters::{Chapter, ChapterStore};

static LEADING_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+[、.\s]+").expect("leading number regex"));

const TITLE_SCAN_LINES: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedChapter {
    pub file_name: String,
    pub display_title: String,
    pub path: PathBuf,
}

/// Translated title without its leading chapter number (`12、`, `3. `).
pub fn clean_display_title(title: &str) -> String {
    LEADING_NUMBER_RE.replace(title, "").trim().to_string()
}

/// Chapter text with a `## title` heading, unless the title already shows up in the first
/// lines (case-insensitive).
pub fn with_heading(title: &str, content: &str) -> String {
    let head = content
        .lines()
        .take(TITLE_SCAN_LINES)
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();
    if head.contains(&title.to_lowercase()) {
        content.to_string()
    } else {
        format!("## {title}\n\n{content}")
    }
}

/// Writes a titled copy of every translated chapter into `titled_dir`.
///
/// `titles[i]` belongs to `chapters[i]`. Chapters without a translation are skipped; a chapter
/// that cannot be read or written is logged and skipped.
pub fn prepare_titled_chapters(
    store: &ChapterStore,
    chapters: &[Chapter],
    titles: &[String],
    titled_dir: &Path,
) -> anyhow::Result<Vec<PreparedChapter>> {
    std::fs::create_dir_all(titled_dir)
        .with_context(|| format!("create titled dir: {}", titled_dir.display()))?;
    let mut out = Vec::new();
    for (ch, title) in chapters.iter().zip(titles) {
        if !store.has_target(ch) {
            tracing::warn!("{}: no translation, not prepared", ch.file_name);
            continue;
        }
        let content = match store.read_target(ch) {
            Ok(c) => c,
            Err(err) => {
                tracing::error!("{}: {err:#}", ch.file_name);
                continue;
            }
        };
        let display_title = clean_display_title(title);
        let file_name = ch.target_file_name();
        let path = titled_dir.join(&file_name);
        if let Err(err) = std::fs::write(&path, with_heading(&display_title, &content)) {
            tracing::error!("write {}: {err}", path.display());
            continue;
        }
        tracing::debug!("prepared {file_name}");
        out.push(PreparedChapter {
            file_name,
            display_title,
            path,
        });
    }
    tracing::info!("prepared {} titled chapter(s)", out.len());
    Ok(out)
}
