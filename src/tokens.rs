//! Token estimation for prompt budgeting.
//!
//! Two estimators sit behind [`TokenEstimator`]: an exact BPE counter (`cl100k_base`) and a
//! character-ratio approximation used when the BPE tables are unavailable. The choice is made
//! once, at startup, by [`select_estimator`].

use tiktoken_rs::CoreBPE;

const CHARS_PER_TOKEN_ESTIMATE: usize = 3;
const CHARS_PER_TOKEN_TAIL: usize = 4;
const MAX_TAIL_RESYNC_TOKENS: usize = 3;

pub trait TokenEstimator {
    fn name(&self) -> &'static str;

    fn estimate(&self, text: &str) -> usize;

    /// Roughly the last `n_tokens` tokens of `text`. Never fails.
    fn tail(&self, text: &str, n_tokens: i64) -> String;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EstimatorKind {
    Bpe,
    Chars,
}

impl EstimatorKind {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("cl100k_base").trim().to_ascii_lowercase().as_str() {
            "chars" | "char" | "heuristic" => Self::Chars,
            _ => Self::Bpe,
        }
    }
}

pub fn select_estimator(kind: EstimatorKind) -> Box<dyn TokenEstimator> {
    match kind {
        EstimatorKind::Chars => Box::new(CharRatioEstimator),
        EstimatorKind::Bpe => match BpeEstimator::cl100k() {
            Ok(bpe) => {
                tracing::info!("token estimator: cl100k_base");
                Box::new(bpe)
            }
            Err(err) => {
                tracing::warn!("cl100k_base unavailable ({err:#}); using chars/3 estimate");
                Box::new(CharRatioEstimator)
            }
        },
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CharRatioEstimator;

impl TokenEstimator for CharRatioEstimator {
    fn name(&self) -> &'static str {
        "chars"
    }

    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / CHARS_PER_TOKEN_ESTIMATE
    }

    fn tail(&self, text: &str, n_tokens: i64) -> String {
        char_tail(text, n_tokens)
    }
}

fn char_tail(text: &str, n_tokens: i64) -> String {
    if n_tokens <= 0 {
        return String::new();
    }
    let want = (n_tokens as usize).saturating_mul(CHARS_PER_TOKEN_TAIL);
    let total = text.chars().count();
    if want >= total {
        return text.to_string();
    }
    text.chars().skip(total - want).collect()
}

pub struct BpeEstimator {
    bpe: CoreBPE,
}

impl BpeEstimator {
    pub fn cl100k() -> anyhow::Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()?;
        Ok(Self { bpe })
    }
}

impl TokenEstimator for BpeEstimator {
    fn name(&self) -> &'static str {
        "cl100k_base"
    }

    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }

    fn tail(&self, text: &str, n_tokens: i64) -> String {
        if n_tokens <= 0 {
            return String::new();
        }
        let ids = self.bpe.encode_ordinary(text);
        let n = n_tokens as usize;
        if ids.len() <= n {
            return text.to_string();
        }
        // A cut can land inside a multi-byte character; skip forward until the ids decode.
        let start = ids.len() - n;
        for skip in 0..=MAX_TAIL_RESYNC_TOKENS {
            let from = start + skip;
            if from >= ids.len() {
                break;
            }
            if let Ok(s) = self.bpe.decode(ids[from..].to_vec()) {
                return s;
            }
        }
        tracing::debug!("bpe tail decode failed; falling back to character tail");
        char_tail(text, n_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_estimator_divides_by_three() {
        let est = CharRatioEstimator;
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("abcdefghi"), 3);
        assert_eq!(est.estimate("一二三四五六"), 2);
    }

    #[test]
    fn char_tail_takes_four_chars_per_token() {
        let est = CharRatioEstimator;
        assert_eq!(est.tail("abcdefghij", 2), "cdefghij");
        assert_eq!(est.tail("abc", 5), "abc");
        assert_eq!(est.tail("abc", 0), "");
        assert_eq!(est.tail("abc", -3), "");
        assert_eq!(est.tail("一二三四五六七八九", 1), "六七八九");
    }

    #[test]
    fn estimator_kind_parses_known_names() {
        assert_eq!(EstimatorKind::parse(Some("chars")), EstimatorKind::Chars);
        assert_eq!(EstimatorKind::parse(Some(" Heuristic ")), EstimatorKind::Chars);
        assert_eq!(EstimatorKind::parse(None), EstimatorKind::Bpe);
        assert_eq!(EstimatorKind::parse(Some("cl100k_base")), EstimatorKind::Bpe);
    }

    #[test]
    fn bpe_tail_is_suffix_and_bounded() {
        let est = BpeEstimator::cl100k().expect("cl100k tables");
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let tail = est.tail(&text, 10);
        assert!(text.ends_with(&tail));
        assert!(est.estimate(&tail) <= 12);
        assert_eq!(est.tail("short", 100), "short");
        assert_eq!(est.tail("short", 0), "");
    }

    #[test]
    fn bpe_tail_never_panics_on_cjk() {
        let est = BpeEstimator::cl100k().expect("cl100k tables");
        let text = "夜色降临，他独自走在长街上，灯火一盏一盏地熄灭。".repeat(10);
        for n in 1..30 {
            let tail = est.tail(&text, n);
            assert!(text.ends_with(&tail));
        }
    }
}
