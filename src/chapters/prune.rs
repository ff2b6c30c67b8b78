//! Maintenance passes over chapter directories: empty source files and defective translations.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::store::{read_text, Chapter, ChapterStore};
use crate::quality::{inspect, Defect, DefectPolicy};

/// `.txt` files in `dir` whose content is whitespace only, sorted.
pub fn find_empty_chapters(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let rd = std::fs::read_dir(dir).with_context(|| format!("read dir: {}", dir.display()))?;
    let mut out = Vec::new();
    for entry in rd {
        let entry = entry.with_context(|| format!("read dir entry: {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        match read_text(&path) {
            Ok(text) if text.trim().is_empty() => out.push(path),
            Ok(_) => {}
            Err(err) => tracing::error!("{err:#}"),
        }
    }
    out.sort();
    Ok(out)
}

/// Removes `paths`; with `dry_run` only reports. Returns how many were (or would be) removed.
pub fn delete_files(paths: &[PathBuf], dry_run: bool) -> usize {
    let mut n = 0usize;
    for p in paths {
        if dry_run {
            tracing::info!("would delete {}", p.display());
            n += 1;
            continue;
        }
        match std::fs::remove_file(p) {
            Ok(()) => {
                tracing::info!("deleted {}", p.display());
                n += 1;
            }
            Err(err) => tracing::error!("delete {} failed: {err}", p.display()),
        }
    }
    n
}

#[derive(Clone, Debug, PartialEq)]
pub struct DefectiveTranslation {
    pub chapter: Chapter,
    pub defect: Defect,
}

/// Existing translations that fail the defect check. Deleting them makes the next run
/// translate those chapters again.
pub fn find_defective_translations(
    store: &ChapterStore,
    chapters: &[Chapter],
    policy: &DefectPolicy,
) -> Vec<DefectiveTranslation> {
    let mut out = Vec::new();
    for ch in chapters.iter().filter(|c| store.has_target(c)) {
        let text = match store.read_target(ch) {
            Ok(t) => t,
            Err(err) => {
                // Unreadable files are left alone.
                tracing::error!("{err:#}");
                continue;
            }
        };
        let source_bytes = store.source_bytes(ch).unwrap_or_else(|err| {
            tracing::warn!("{}: source size unknown ({err:#})", ch.file_name);
            0
        });
        if let Some(defect) = inspect(&text, source_bytes, policy) {
            tracing::info!("defective: {} ({defect})", ch.target_file_name());
            out.push(DefectiveTranslation {
                chapter: ch.clone(),
                defect,
            });
        }
    }
    out
}
