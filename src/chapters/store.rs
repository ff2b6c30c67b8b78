use std::path::{Path, PathBuf};

use anyhow::Context;
use encoding_rs::UTF_8;
use once_cell::sync::Lazy;
use regex::Regex;

static ORDINAL_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+_(.*)\.txt$").expect("chapter file name regex"));

/// One chapter file produced by the splitter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chapter {
    /// 1-based position in the sorted listing.
    pub ordinal: usize,
    pub file_name: String,
    pub title: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
}

impl Chapter {
    pub fn stem(&self) -> &str {
        self.file_name
            .strip_suffix(".txt")
            .unwrap_or(&self.file_name)
    }

    pub fn target_file_name(&self) -> String {
        self.target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// `0001_Some_title.txt` → `Some title`. Names without the numeric prefix keep their stem.
pub fn original_title_from_file_name(file_name: &str) -> String {
    match ORDINAL_FILE_RE.captures(file_name) {
        Some(c) => c[1].replace('_', " ").trim().to_string(),
        None => file_name
            .strip_suffix(".txt")
            .unwrap_or(file_name)
            .replace('_', " "),
    }
}

/// Source chapter directory plus the directory translations land in.
///
/// A chapter counts as done exactly when its target file exists.
#[derive(Clone, Debug)]
pub struct ChapterStore {
    source_dir: PathBuf,
    target_dir: PathBuf,
    target_suffix: String,
}

impl ChapterStore {
    pub fn new(source_dir: PathBuf, target_dir: PathBuf, target_suffix: &str) -> Self {
        Self {
            source_dir,
            target_dir,
            target_suffix: target_suffix.to_string(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn target_name_for(&self, file_name: &str) -> String {
        let stem = file_name.strip_suffix(".txt").unwrap_or(file_name);
        format!("{stem}{}.txt", self.target_suffix)
    }

    /// All `.txt` chapters in the source directory, sorted by file name.
    pub fn list(&self) -> anyhow::Result<Vec<Chapter>> {
        let rd = std::fs::read_dir(&self.source_dir)
            .with_context(|| format!("read chapter dir: {}", self.source_dir.display()))?;
        let mut names: Vec<String> = Vec::new();
        for entry in rd {
            let entry = entry.with_context(|| {
                format!("read chapter dir entry: {}", self.source_dir.display())
            })?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".txt") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, file_name)| Chapter {
                ordinal: i + 1,
                title: original_title_from_file_name(&file_name),
                source_path: self.source_dir.join(&file_name),
                target_path: self.target_dir.join(self.target_name_for(&file_name)),
                file_name,
            })
            .collect())
    }

    pub fn read_source(&self, chapter: &Chapter) -> anyhow::Result<String> {
        read_text(&chapter.source_path)
    }

    pub fn source_bytes(&self, chapter: &Chapter) -> anyhow::Result<usize> {
        let md = std::fs::metadata(&chapter.source_path)
            .with_context(|| format!("stat chapter: {}", chapter.source_path.display()))?;
        Ok(md.len() as usize)
    }

    pub fn has_target(&self, chapter: &Chapter) -> bool {
        chapter.target_path.exists()
    }

    pub fn read_target(&self, chapter: &Chapter) -> anyhow::Result<String> {
        read_text(&chapter.target_path)
    }

    /// Writes the trimmed translation, creating the target directory on first use.
    ///
    /// The text goes to a sibling `.part` file that is renamed over the target, so the target
    /// path only ever holds a complete translation.
    pub fn write_target(&self, chapter: &Chapter, text: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.target_dir)
            .with_context(|| format!("create target dir: {}", self.target_dir.display()))?;
        let tmp = staging_path(&chapter.target_path);
        let written = std::fs::write(&tmp, text.trim())
            .and_then(|()| std::fs::rename(&tmp, &chapter.target_path));
        if let Err(err) = written {
            if tmp.is_file() {
                if let Err(rm) = std::fs::remove_file(&tmp) {
                    tracing::warn!("{}: partial file not removed: {rm}", tmp.display());
                }
            }
            return Err(err)
                .with_context(|| format!("write translation: {}", chapter.target_path.display()));
        }
        Ok(())
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

/// UTF-8 text file (BOM stripped, invalid sequences replaced).
pub fn read_text(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read: {}", path.display()))?;
    let (text, _, had_errors) = UTF_8.decode(&bytes);
    if had_errors {
        tracing::warn!("{}: invalid UTF-8 replaced", path.display());
    }
    Ok(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_come_from_file_names() {
        assert_eq!(original_title_from_file_name("0001_Some_title.txt"), "Some title");
        assert_eq!(original_title_from_file_name("0012_第十二章_风起.txt"), "第十二章 风起");
        assert_eq!(original_title_from_file_name("notes.txt"), "notes");
    }

    #[test]
    fn listing_is_sorted_and_maps_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).expect("mkdir");
        for name in ["0002_b.txt", "0001_a.txt", "readme.md", "0000_intro.txt"] {
            std::fs::write(src.join(name), "x").expect("write");
        }
        std::fs::create_dir_all(src.join("sub.txt")).expect("mkdir");
        let store = ChapterStore::new(src, dir.path().join("out"), "_ru");
        let chapters = store.list().expect("list");
        let names: Vec<&str> = chapters.iter().map(|c| c.file_name.as_str()).collect();
        assert_eq!(names, vec!["0000_intro.txt", "0001_a.txt", "0002_b.txt"]);
        assert_eq!(chapters[1].ordinal, 2);
        assert_eq!(chapters[1].stem(), "0001_a");
        assert_eq!(chapters[1].target_file_name(), "0001_a_ru.txt");
        assert_eq!(chapters[1].target_path, dir.path().join("out").join("0001_a_ru.txt"));
    }

    #[test]
    fn write_target_trims_and_creates_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).expect("mkdir");
        std::fs::write(src.join("0001_a.txt"), "\u{FEFF}源文本").expect("write");
        let store = ChapterStore::new(src, dir.path().join("deep").join("out"), "_ru");
        let ch = store.list().expect("list").remove(0);
        assert_eq!(store.read_source(&ch).expect("read"), "源文本");
        assert!(!store.has_target(&ch));
        store.write_target(&ch, "\n  Перевод.  \n").expect("write");
        assert!(store.has_target(&ch));
        assert_eq!(store.read_target(&ch).expect("read"), "Перевод.");
        assert!(!staging_path(&ch.target_path).exists());
    }

    #[test]
    fn leftover_partial_file_is_not_a_translation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&src).expect("mkdir");
        std::fs::create_dir_all(&out).expect("mkdir");
        std::fs::write(src.join("0001_a.txt"), "源").expect("write");
        std::fs::write(out.join("0001_a_ru.txt.part"), "Обрыв").expect("write");
        let store = ChapterStore::new(src, out, "_ru");
        let ch = store.list().expect("list").remove(0);
        assert!(!store.has_target(&ch));
        store.write_target(&ch, "Полный перевод.").expect("write");
        assert_eq!(store.read_target(&ch).expect("read"), "Полный перевод.");
        assert!(!staging_path(&ch.target_path).exists());
    }

    #[test]
    fn failed_write_leaves_no_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&src).expect("mkdir");
        std::fs::write(src.join("0001_a.txt"), "源").expect("write");
        let store = ChapterStore::new(src, out, "_ru");
        let ch = store.list().expect("list").remove(0);
        std::fs::create_dir_all(staging_path(&ch.target_path)).expect("mkdir");
        assert!(store.write_target(&ch, "Перевод.").is_err());
        assert!(!store.has_target(&ch));
    }
}
