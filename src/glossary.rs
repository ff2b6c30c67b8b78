//! Persistent source-term → target-term mapping.
//!
//! The first mapping recorded for a source term is kept for the rest of the run; later
//! proposals that disagree are reported as conflicts and dropped.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::markers::candidates_block;
use crate::textutil::contains_cjk;

pub const EMPTY_GLOSSARY_MARKER: &str = "No entries.";
const PROMPT_HEADER: &str = "Key terms and names:";

const MIN_TERM_CHARS: usize = 2;
const MAX_TERM_CHARS: usize = 49;

static CANDIDATE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(.+?)\s*[:：]\s*(.+?)\s*$").expect("candidate line regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TermEntry {
    pub src: String,
    pub tgt: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeEvent {
    Added {
        src: String,
        tgt: String,
    },
    Conflict {
        src: String,
        existing_tgt: String,
        proposed_tgt: String,
    },
    Transliteration {
        src: String,
    },
}

#[derive(Clone, Debug, Default)]
pub struct MergeOutcome {
    pub events: Vec<MergeEvent>,
}

impl MergeOutcome {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.added() > 0
    }

    #[must_use]
    pub fn added(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, MergeEvent::Added { .. }))
            .count()
    }

    #[must_use]
    pub fn conflicts(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, MergeEvent::Conflict { .. }))
            .count()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Glossary {
    entries: Vec<TermEntry>,
    index: HashMap<String, usize>,
}

impl Glossary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, src: &str) -> Option<&str> {
        self.index.get(src).map(|&i| self.entries[i].tgt.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = &TermEntry> {
        self.entries.iter()
    }

    /// Reads the glossary file. Missing, empty and unparsable files all yield an empty glossary.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!("glossary not found: {} (starting empty)", path.display());
            return Self::new();
        }
        match Self::read(path) {
            Ok(g) => {
                tracing::info!("glossary loaded: {} entries", g.len());
                g
            }
            Err(err) => {
                tracing::error!("glossary unreadable, starting empty: {err:#}");
                Self::new()
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read glossary: {}", path.display()))?;
        let text = text.trim_start_matches('\u{FEFF}');
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(text).context("parse glossary json")?;
        let mut g = Self::new();
        for (src, value) in map {
            match value.as_str() {
                Some(tgt) => g.insert(src, tgt.to_string()),
                None => tracing::warn!("glossary entry {src:?} is not a string; skipped"),
            }
        }
        Ok(g)
    }

    fn insert(&mut self, src: String, tgt: String) {
        if self.index.contains_key(&src) {
            return;
        }
        self.index.insert(src.clone(), self.entries.len());
        self.entries.push(TermEntry { src, tgt });
    }

    #[must_use]
    pub fn format_for_prompt(&self) -> String {
        if self.entries.is_empty() {
            return EMPTY_GLOSSARY_MARKER.to_string();
        }
        let mut out = String::new();
        out.push_str(PROMPT_HEADER);
        for e in &self.entries {
            out.push_str("\n- ");
            out.push_str(&e.src);
            out.push_str(": ");
            out.push_str(&e.tgt);
        }
        out
    }

    pub fn merge(&mut self, candidates: impl IntoIterator<Item = (String, String)>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for (src, tgt) in candidates {
            match self.get(&src) {
                None if src == tgt => {
                    tracing::debug!("glossary: skipped transliteration {src:?}");
                    outcome.events.push(MergeEvent::Transliteration { src });
                }
                None => {
                    tracing::info!("glossary+ {src:?}: {tgt:?}");
                    outcome.events.push(MergeEvent::Added {
                        src: src.clone(),
                        tgt: tgt.clone(),
                    });
                    self.insert(src, tgt);
                }
                Some(existing) if existing != tgt => {
                    tracing::warn!(
                        "glossary conflict {src:?}: proposed {tgt:?}, kept {existing:?}"
                    );
                    outcome.events.push(MergeEvent::Conflict {
                        existing_tgt: existing.to_string(),
                        src,
                        proposed_tgt: tgt,
                    });
                }
                Some(_) => {}
            }
        }
        if outcome.added() > 0 || outcome.conflicts() > 0 {
            tracing::info!(
                "glossary update: +{} conflicts {}",
                outcome.added(),
                outcome.conflicts()
            );
        }
        outcome
    }

    /// Writes the glossary as a pretty JSON object. Errors are logged, not returned.
    pub fn persist(&self, path: &Path) -> bool {
        match self.write(path) {
            Ok(()) => {
                tracing::debug!("glossary saved: {}", path.display());
                true
            }
            Err(err) => {
                tracing::error!("glossary not saved: {err:#}");
                false
            }
        }
    }

    fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create glossary dir: {}", parent.display()))?;
            }
        }
        let mut map = serde_json::Map::with_capacity(self.entries.len());
        for e in &self.entries {
            map.insert(e.src.clone(), serde_json::Value::String(e.tgt.clone()));
        }
        let json = serde_json::to_string_pretty(&serde_json::Value::Object(map))
            .context("serialize glossary")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("write glossary: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("replace glossary: {}", path.display()))?;
        Ok(())
    }
}

/// Glossary proposals found in a pass-1 response, in order of appearance.
///
/// Only pairs whose sides are 2..=49 characters long and whose source contains a CJK ideograph
/// survive. A source proposed twice keeps its first position and its last target.
pub fn parse_candidates(response: &str) -> Vec<(String, String)> {
    let Some(block) = candidates_block(response) else {
        tracing::info!("no glossary candidates in response");
        return Vec::new();
    };

    let mut out: Vec<(String, String)> = Vec::new();
    for line in block.lines() {
        let Some(caps) = CANDIDATE_LINE_RE.captures(line) else {
            continue;
        };
        let src = caps[1].trim();
        let tgt = caps[2].trim();
        if !term_len_ok(src) || !term_len_ok(tgt) {
            tracing::debug!("candidate rejected (length): {src:?}: {tgt:?}");
            continue;
        }
        if !contains_cjk(src) {
            tracing::debug!("candidate rejected (no ideographs): {src:?}");
            continue;
        }
        match out.iter_mut().find(|(s, _)| s == src) {
            Some(slot) => slot.1 = tgt.to_string(),
            None => out.push((src.to_string(), tgt.to_string())),
        }
    }
    if out.is_empty() {
        tracing::info!("no glossary candidates in response");
    }
    out
}

fn term_len_ok(term: &str) -> bool {
    let n = term.chars().count();
    (MIN_TERM_CHARS..=MAX_TERM_CHARS).contains(&n)
}
