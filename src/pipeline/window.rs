use std::collections::VecDeque;

pub const WINDOW_CAPACITY: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecentEntry {
    pub id: String,
    pub text: String,
}

/// Source text of the last few resolved chapters, oldest first.
#[derive(Clone, Debug)]
pub struct RecentWindow {
    entries: VecDeque<RecentEntry>,
    capacity: usize,
}

impl Default for RecentWindow {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY)
    }
}

impl RecentWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, id: impl Into<String>, text: impl Into<String>) {
        self.entries.push_back(RecentEntry {
            id: id.into(),
            text: text.into(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    /// Up to `n` newest entries, oldest first.
    pub fn most_recent(&self, n: usize) -> Vec<&RecentEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_last_four_after_six_pushes() {
        let mut w = RecentWindow::default();
        for i in 1..=6 {
            w.push(format!("ch{i}"), format!("text {i}"));
        }
        assert_eq!(w.len(), 4);
        assert_eq!(w.ids(), vec!["ch3", "ch4", "ch5", "ch6"]);
        assert!(!w.contains("ch2"));
        assert_eq!(w.most_recent(3).iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["ch4", "ch5", "ch6"]);
    }

    #[test]
    fn most_recent_handles_short_windows() {
        let mut w = RecentWindow::default();
        assert!(w.most_recent(3).is_empty());
        w.push("a", "1");
        assert_eq!(w.most_recent(3).len(), 1);
        assert_eq!(w.most_recent(0).len(), 0);
    }
}
