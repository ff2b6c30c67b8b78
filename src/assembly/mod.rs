//! Final stage: translated chapter titles, titled chapter copies and the `book.json` manifest
//! an external packager turns into an e-book.

pub mod prepare;
pub mod titles;

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::chapters::split::INTRO_FILE_NAME;
use crate::chapters::store::read_text;
use crate::chapters::ChapterStore;
use crate::pipeline::config::BookInfo;

pub use crate::chapters::store::original_title_from_file_name;
pub use prepare::{clean_display_title, prepare_titled_chapters, with_heading, PreparedChapter};
pub use titles::{parse_numbered_titles, TitleTranslator};

pub const MANIFEST_FILE_NAME: &str = "book.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChapter {
    pub file: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookManifest {
    pub title: String,
    pub author: String,
    pub language: String,
    pub chapters: Vec<ManifestChapter>,
}

#[derive(Clone, Debug, Default)]
pub struct AssemblyReport {
    pub titles_requested: usize,
    pub prepared: usize,
    pub manifest_path: Option<PathBuf>,
}

/// Ordered manifest entries for every titled chapter file in `titled_dir`.
///
/// The first line of each file (heading marks removed) is its table-of-contents title.
pub fn collect_manifest_chapters(
    titled_dir: &Path,
    target_suffix: &str,
) -> anyhow::Result<Vec<ManifestChapter>> {
    let wanted_tail = format!("{target_suffix}.txt");
    let rd = std::fs::read_dir(titled_dir)
        .with_context(|| format!("read titled dir: {}", titled_dir.display()))?;
    let mut files: Vec<String> = Vec::new();
    for entry in rd {
        let entry = entry.with_context(|| format!("read titled dir: {}", titled_dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(&wanted_tail) {
            files.push(name);
        }
    }
    files.sort();

    let mut out = Vec::with_capacity(files.len());
    for file in files {
        let fallback = file
            .strip_suffix(&wanted_tail)
            .unwrap_or(&file)
            .replace('_', " ");
        let title = match read_text(&titled_dir.join(&file)) {
            Ok(text) => text
                .lines()
                .next()
                .map(|l| l.trim().trim_start_matches('#').trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or(fallback),
            Err(err) => {
                tracing::error!("{err:#}");
                fallback
            }
        };
        out.push(ManifestChapter { file, title });
    }
    Ok(out)
}

pub fn write_manifest(path: &Path, manifest: &BookManifest) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(manifest).context("serialize manifest")?;
    std::fs::write(path, json).with_context(|| format!("write manifest: {}", path.display()))?;
    Ok(())
}

/// Translates titles, writes titled chapters and the manifest.
pub fn run_assembly(
    store: &ChapterStore,
    titles: &TitleTranslator<'_>,
    book: &BookInfo,
    titled_dir: &Path,
    output_dir: &Path,
) -> anyhow::Result<AssemblyReport> {
    let chapters: Vec<_> = store
        .list()?
        .into_iter()
        .filter(|c| c.file_name != INTRO_FILE_NAME && store.has_target(c))
        .collect();
    let mut report = AssemblyReport::default();
    if chapters.is_empty() {
        tracing::warn!("no translated chapters to assemble");
        return Ok(report);
    }

    let originals: Vec<String> = chapters.iter().map(|c| c.title.clone()).collect();
    report.titles_requested = originals.len();
    let translated = titles.translate(&originals);
    report.prepared = prepare_titled_chapters(store, &chapters, &translated, titled_dir)?.len();

    let manifest = BookManifest {
        title: book.title.clone(),
        author: book.author.clone(),
        language: book.language.clone(),
        chapters: collect_manifest_chapters(titled_dir, &book.target_suffix)?,
    };
    let path = output_dir.join(MANIFEST_FILE_NAME);
    write_manifest(&path, &manifest)?;
    tracing::info!(
        "manifest {} with {} chapter(s)",
        path.display(),
        manifest.chapters.len()
    );
    report.manifest_path = Some(path);
    Ok(report)
}
