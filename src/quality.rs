use crate::textutil::{paragraphs, script_counts};

/// Tunable gates for the output defect check.
#[derive(Clone, Debug, PartialEq)]
pub struct DefectPolicy {
    /// Maximum share of CJK ideographs among non-whitespace characters.
    pub max_cjk_ratio: f64,
    /// Paragraph count is only checked when the source is longer than this (bytes).
    pub min_source_bytes_for_paragraphs: usize,
    pub min_paragraphs: usize,
}

impl Default for DefectPolicy {
    fn default() -> Self {
        Self {
            max_cjk_ratio: 0.05,
            min_source_bytes_for_paragraphs: 500,
            min_paragraphs: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Defect {
    Empty,
    CjkResidue { ratio: f64 },
    TooFewParagraphs { found: usize, source_bytes: usize },
}

impl Defect {
    #[must_use]
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Empty => "empty_output",
            Self::CjkResidue { .. } => "cjk_residue",
            Self::TooFewParagraphs { .. } => "too_few_paragraphs",
        }
    }
}

impl std::fmt::Display for Defect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "output is empty"),
            Self::CjkResidue { ratio } => {
                write!(f, "untranslated CJK residue ({:.1}% of characters)", ratio * 100.0)
            }
            Self::TooFewParagraphs {
                found,
                source_bytes,
            } => write!(
                f,
                "only {found} paragraph(s) for a {source_bytes}-byte source chapter"
            ),
        }
    }
}

/// First defect found in `output`, checked in order: emptiness, CJK residue, paragraph count.
pub fn inspect(output: &str, source_bytes: usize, policy: &DefectPolicy) -> Option<Defect> {
    let counts = script_counts(output);
    if counts.non_ws == 0 {
        return Some(Defect::Empty);
    }
    let ratio = counts.cjk_ratio();
    if ratio > policy.max_cjk_ratio {
        return Some(Defect::CjkResidue { ratio });
    }
    if source_bytes > policy.min_source_bytes_for_paragraphs {
        let found = paragraphs(output).len();
        if found < policy.min_paragraphs {
            return Some(Defect::TooFewParagraphs {
                found,
                source_bytes,
            });
        }
    }
    None
}
