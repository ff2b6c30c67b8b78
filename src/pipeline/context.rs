//! Token-budgeted background context for one prompt.
//!
//! The chapter text and glossary are always sent; what is left of the prompt budget (after a
//! safety margin) is filled with the retrieval block and then with recent-chapter context. A
//! fragment is either included whole or dropped, and its cost is the estimate of its rendered
//! text, label included.

use crate::tokens::TokenEstimator;

use super::window::RecentEntry;

/// Recent chapters considered for context, counting back from the newest.
pub const RECENT_DEPTH: usize = 3;
/// Tail windows smaller than this are not worth their label.
pub const MIN_TAIL_TOKENS: usize = 50;

pub const PASS1_MARGIN: usize = 2000;
pub const PASS2_MARGIN: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenBudget {
    remaining: usize,
}

impl TokenBudget {
    pub fn new(total: usize) -> Self {
        Self { remaining: total }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Deducts `cost` if it fits; otherwise leaves the budget untouched.
    pub fn try_consume(&mut self, cost: usize) -> bool {
        if cost > self.remaining {
            return false;
        }
        self.remaining -= cost;
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextLimits {
    pub max_prompt_tokens: usize,
    pub margin: usize,
    /// Ceiling for tail windows; 0 turns them off.
    pub recent_window_tokens: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FragmentKind {
    Retrieval,
    FullRecent { id: String },
    TailRecent { id: String, distance: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub text: String,
    pub cost: usize,
}

#[derive(Clone, Debug, Default)]
pub struct AssembledContext {
    pub glossary: String,
    /// Retrieval first, then recent chapters oldest to newest.
    pub fragments: Vec<Fragment>,
    pub available: usize,
}

impl AssembledContext {
    pub fn used(&self) -> usize {
        self.fragments.iter().map(|f| f.cost).sum()
    }

    pub fn has_retrieval(&self) -> bool {
        self.fragments
            .iter()
            .any(|f| f.kind == FragmentKind::Retrieval)
    }

    pub fn background(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub fn assemble(
    est: &dyn TokenEstimator,
    chapter_text: &str,
    glossary_block: &str,
    retrieval_block: Option<&str>,
    recent: &[&RecentEntry],
    limits: &ContextLimits,
) -> AssembledContext {
    let available = limits
        .max_prompt_tokens
        .saturating_sub(est.estimate(chapter_text))
        .saturating_sub(est.estimate(glossary_block))
        .saturating_sub(limits.margin);
    let mut budget = TokenBudget::new(available);
    let mut fragments = Vec::new();

    if let Some(block) = retrieval_block.filter(|b| !b.trim().is_empty()) {
        let cost = est.estimate(block);
        if budget.try_consume(cost) {
            fragments.push(Fragment {
                kind: FragmentKind::Retrieval,
                text: block.to_string(),
                cost,
            });
        } else {
            tracing::warn!("retrieval context ({cost} tokens) does not fit {available}; dropped");
        }
    }

    let skip = recent.len().saturating_sub(RECENT_DEPTH);
    let considered = &recent[skip..];
    for (i, entry) in considered.iter().enumerate() {
        let distance = considered.len() - i;
        if distance == 1 {
            let text = render_full(entry);
            let cost = est.estimate(&text);
            if budget.try_consume(cost) {
                fragments.push(Fragment {
                    kind: FragmentKind::FullRecent {
                        id: entry.id.clone(),
                    },
                    text,
                    cost,
                });
                continue;
            }
        }
        if let Some(fragment) = tail_fragment(est, entry, distance, limits, &mut budget) {
            fragments.push(fragment);
        }
    }

    AssembledContext {
        glossary: glossary_block.to_string(),
        fragments,
        available,
    }
}

fn tail_fragment(
    est: &dyn TokenEstimator,
    entry: &RecentEntry,
    distance: usize,
    limits: &ContextLimits,
    budget: &mut TokenBudget,
) -> Option<Fragment> {
    let want = limits.recent_window_tokens.min(budget.remaining());
    if want <= MIN_TAIL_TOKENS {
        return None;
    }
    let tail = est.tail(&entry.text, want as i64);
    if tail.trim().is_empty() {
        return None;
    }
    let text = format!(
        "### Recent context (end of N-{distance}: {}):\n{tail}\n###",
        entry.id
    );
    let cost = est.estimate(&text);
    if !budget.try_consume(cost) {
        tracing::debug!("tail of {} ({cost} tokens) does not fit", entry.id);
        return None;
    }
    Some(Fragment {
        kind: FragmentKind::TailRecent {
            id: entry.id.clone(),
            distance,
        },
        text,
        cost,
    })
}

fn render_full(entry: &RecentEntry) -> String {
    format!(
        "### Recent context (full N-1: {}):\n{}\n###",
        entry.id, entry.text
    )
}
