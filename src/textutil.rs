use once_cell::sync::Lazy;
use regex::Regex;

static PARAGRAPH_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n+").expect("paragraph break regex"));
static LEADING_HASHES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#+\s+").expect("hashes"));
static FORBIDDEN_FILENAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("forbidden filename chars"));
static WHITESPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace"));

const MAX_FILENAME_STEM_CHARS: usize = 100;

/// CJK Unified Ideographs (basic block). Glossary candidates and the residue check
/// both key off this range.
#[inline]
pub fn is_cjk_ideograph(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&ch)
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_ideograph)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScriptCounts {
    pub non_ws: usize,
    pub cjk: usize,
}

impl ScriptCounts {
    #[must_use]
    pub fn cjk_ratio(&self) -> f64 {
        if self.non_ws == 0 {
            0.0
        } else {
            self.cjk as f64 / self.non_ws as f64
        }
    }
}

pub fn script_counts(text: &str) -> ScriptCounts {
    let mut m = ScriptCounts::default();
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        m.non_ws = m.non_ws.saturating_add(1);
        if is_cjk_ideograph(ch) {
            m.cjk = m.cjk.saturating_add(1);
        }
    }
    m
}

/// Non-empty paragraphs separated by blank lines.
pub fn paragraphs(text: &str) -> Vec<&str> {
    PARAGRAPH_BREAK_RE
        .split(text)
        .filter(|p| !p.trim().is_empty())
        .collect()
}

pub fn sanitize_filename(name: &str, allow_spaces: bool) -> String {
    let name = LEADING_HASHES_RE.replace(name, "");
    let name = name.trim();
    let name = FORBIDDEN_FILENAME_RE.replace_all(name, "_");
    let name = if allow_spaces {
        WHITESPACE_RUN_RE.replace_all(&name, " ").trim().to_string()
    } else {
        WHITESPACE_RUN_RE.replace_all(&name, "_").trim().to_string()
    };

    let (stem, ext) = split_extension(&name);
    let stem: String = stem.chars().take(MAX_FILENAME_STEM_CHARS).collect();
    let joined = format!("{stem}{ext}");
    let cleaned = joined.trim_matches('.');
    if cleaned.is_empty() || cleaned == ext {
        return format!("_invalid_name_{ext}");
    }
    cleaned.to_string()
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 && !name[i + 1..].is_empty() && !name[i + 1..].contains(' ') => {
            (&name[..i], &name[i..])
        }
        _ => (name, ""),
    }
}

/// Shortens text for log lines without splitting a character.
pub fn clip(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let text = "one\n\ntwo\n  \n\nthree\nstill three\n\n\n";
        assert_eq!(paragraphs(text), vec!["one", "two", "three\nstill three"]);
        assert!(paragraphs("   \n\n  ").is_empty());
    }

    #[test]
    fn cjk_ratio_ignores_whitespace() {
        let c = script_counts("ab 中\n文 cd");
        assert_eq!(c.non_ws, 6);
        assert_eq!(c.cjk, 2);
        assert!((c.cjk_ratio() - 2.0 / 6.0).abs() < 1e-9);
        assert_eq!(script_counts("   ").cjk_ratio(), 0.0);
    }

    #[test]
    fn sanitize_filename_replaces_forbidden_and_spaces() {
        assert_eq!(sanitize_filename("## Chapter 1: A/B?", false), "Chapter_1__A_B_");
        assert_eq!(sanitize_filename("第一章  风起", true), "第一章 风起");
        assert_eq!(sanitize_filename("...", false), "_invalid_name_");
        let long = "x".repeat(150);
        assert_eq!(sanitize_filename(&long, false).chars().count(), 100);
    }
}
