use std::path::Path;

use anyhow::{anyhow, Context};
use encoding_rs::Encoding;
use regex::Regex;

use crate::textutil::sanitize_filename;

pub const INTRO_FILE_NAME: &str = "0000_intro.txt";
pub const DEFAULT_HEADER_PATTERN: &str = r"^##\s+(.*)";

#[derive(Clone, Debug)]
pub struct SplitOptions {
    pub header_re: Regex,
    pub encoding: &'static Encoding,
}

impl SplitOptions {
    pub fn new(header_pattern: &str, encoding_label: &str) -> anyhow::Result<Self> {
        let header_re = Regex::new(header_pattern)
            .with_context(|| format!("invalid chapter header regex: {header_pattern}"))?;
        if header_re.captures_len() < 2 {
            return Err(anyhow!(
                "chapter header regex needs a capture group for the title: {header_pattern}"
            ));
        }
        let encoding = Encoding::for_label(encoding_label.trim().as_bytes())
            .ok_or_else(|| anyhow!("unknown input encoding: {encoding_label}"))?;
        Ok(Self {
            header_re,
            encoding,
        })
    }
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            header_re: Regex::new(DEFAULT_HEADER_PATTERN).expect("default header regex"),
            encoding: encoding_rs::UTF_8,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitReport {
    /// Headers found in the input.
    pub chapters: usize,
    pub written: usize,
    pub kept_existing: usize,
    /// Headers with no body text; nothing is written for them.
    pub empty: usize,
    pub intro_written: bool,
}

struct Section<'a> {
    title: Option<&'a str>,
    lines: Vec<&'a str>,
}

/// Splits `input` at header lines into `out_dir/{k:04}_{title}.txt`.
///
/// Existing chapter files are never rewritten, so a rerun only fills gaps.
pub fn split_novel(input: &Path, out_dir: &Path, opts: &SplitOptions) -> anyhow::Result<SplitReport> {
    let bytes = std::fs::read(input).with_context(|| format!("read novel: {}", input.display()))?;
    let (text, used, had_errors) = opts.encoding.decode(&bytes);
    if had_errors {
        tracing::warn!(
            "{}: malformed {} sequences replaced",
            input.display(),
            used.name()
        );
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create chapter dir: {}", out_dir.display()))?;

    let sections = sections(&text, &opts.header_re);
    let mut report = SplitReport::default();
    let mut ordinal = 0usize;
    for section in sections {
        let body = section.lines.join("\n");
        let body = body.trim();
        let Some(raw_title) = section.title else {
            report.intro_written = write_intro(out_dir, body)?;
            continue;
        };
        ordinal += 1;
        report.chapters += 1;
        let file_name = format!("{ordinal:04}_{}.txt", sanitize_filename(raw_title, false));
        let path = out_dir.join(&file_name);
        if path.exists() {
            tracing::debug!("chapter file exists, kept: {file_name}");
            report.kept_existing += 1;
        } else if body.is_empty() {
            tracing::warn!("chapter {ordinal} ({raw_title:?}) has no text; not written");
            report.empty += 1;
        } else {
            std::fs::write(&path, format!("{body}\n"))
                .with_context(|| format!("write chapter: {}", path.display()))?;
            tracing::info!("chapter {ordinal}: {raw_title:?} -> {file_name}");
            report.written += 1;
        }
    }
    if report.chapters == 0 {
        tracing::warn!("no chapter headers matched {}", opts.header_re.as_str());
    }
    Ok(report)
}

fn sections<'a>(text: &'a str, header_re: &Regex) -> Vec<Section<'a>> {
    let mut out = vec![Section {
        title: None,
        lines: Vec::new(),
    }];
    for line in text.lines() {
        if let Some(caps) = header_re.captures(line) {
            let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            out.push(Section {
                title: Some(title),
                lines: Vec::new(),
            });
        } else if let Some(current) = out.last_mut() {
            current.lines.push(line);
        }
    }
    out
}

fn write_intro(out_dir: &Path, body: &str) -> anyhow::Result<bool> {
    if body.is_empty() {
        return Ok(false);
    }
    let path = out_dir.join(INTRO_FILE_NAME);
    let occupied = std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
    if occupied {
        tracing::debug!("intro file exists and is not empty, kept");
        return Ok(false);
    }
    std::fs::write(&path, format!("{body}\n"))
        .with_context(|| format!("write intro: {}", path.display()))?;
    Ok(true)
}
