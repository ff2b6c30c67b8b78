use once_cell::sync::Lazy;
use regex::Regex;

pub const TRANSLATION_START: &str = "[TRANSLATION_START]";
pub const TRANSLATION_END: &str = "[TRANSLATION_END]";
pub const CANDIDATES_START: &str = "[GLOSSARY_CANDIDATES_START]";
pub const CANDIDATES_END: &str = "[GLOSSARY_CANDIDATES_END]";

static TRANSLATION_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("(?i){}", regex::escape(TRANSLATION_START)))
        .expect("translation start regex")
});

static TRANSLATION_STOP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "(?i){}|{}",
        regex::escape(TRANSLATION_END),
        regex::escape(CANDIDATES_START)
    ))
    .expect("translation stop regex")
});

static CANDIDATES_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "(?is){}(.*?){}",
        regex::escape(CANDIDATES_START),
        regex::escape(CANDIDATES_END)
    ))
    .expect("candidates block regex")
});

// Stray markers (including hallucinated closing forms) that must never reach a chapter file.
static ANY_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[/?(?:TRANSLATION|TRANSLATION_START|TRANSLATION_END|GLOSSARY_CANDIDATES_START|GLOSSARY_CANDIDATES_END)\]")
        .expect("any marker regex")
});

/// Inner text of the glossary candidates block, if the response carries one.
pub fn candidates_block(response: &str) -> Option<&str> {
    CANDIDATES_BLOCK_RE
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Draft translation from a pass-1 response.
///
/// Text after `[TRANSLATION_START]` up to `[TRANSLATION_END]` (or the candidates block). Without
/// a start marker the whole response minus the candidates block is used.
pub fn extract_draft(response: &str) -> String {
    let body = match TRANSLATION_START_RE.find(response) {
        Some(start) => {
            let rest = &response[start.end()..];
            match TRANSLATION_STOP_RE.find(rest) {
                Some(stop) => rest[..stop.start()].to_string(),
                None => rest.to_string(),
            }
        }
        None => CANDIDATES_BLOCK_RE.replace_all(response, "").into_owned(),
    };
    strip_markers(&body)
}

pub fn strip_markers(text: &str) -> String {
    ANY_MARKER_RE.replace_all(text, "").trim().to_string()
}
