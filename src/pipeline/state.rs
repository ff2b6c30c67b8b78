//! Per-chapter attempt lifecycle.
//!
//! ```text
//! Pending -> Attempting(1) -> Succeeded
//!                          -> FatalError
//!                          -> DefectRetry(1) -> Attempting(2) -> ... -> SkippedDefect
//! ```

use crate::models::CallError;
use crate::quality::Defect;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// What one pass-1 + pass-2 attempt produced.
#[derive(Debug)]
pub enum AttemptOutcome {
    Translated(String),
    Defect(Defect),
    Fatal(CallError),
}

impl AttemptOutcome {
    pub fn event(&self) -> Event {
        match self {
            Self::Translated(_) => Event::Translated,
            Self::Defect(_) => Event::Defective,
            Self::Fatal(_) => Event::CallFailed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Start the next attempt (from `Pending` or after a defect).
    Begin,
    Translated,
    Defective,
    CallFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChapterState {
    Pending,
    Attempting { attempt: u32 },
    DefectRetry { attempt: u32 },
    Succeeded { attempt: u32 },
    SkippedDefect { attempts: u32 },
    FatalError { attempt: u32 },
}

impl ChapterState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::SkippedDefect { .. } | Self::FatalError { .. }
        )
    }

    /// Transition table. Events that do not apply to the current state leave it unchanged.
    pub fn next(self, event: Event, max_attempts: u32) -> Self {
        match (self, event) {
            (Self::Pending, Event::Begin) => Self::Attempting { attempt: 1 },
            (Self::Attempting { attempt }, Event::Translated) => Self::Succeeded { attempt },
            (Self::Attempting { attempt }, Event::Defective) => Self::DefectRetry { attempt },
            (Self::Attempting { attempt }, Event::CallFailed) => Self::FatalError { attempt },
            (Self::DefectRetry { attempt }, Event::Begin) if attempt < max_attempts => {
                Self::Attempting {
                    attempt: attempt + 1,
                }
            }
            (Self::DefectRetry { attempt }, Event::Begin) => Self::SkippedDefect { attempts: attempt },
            (state, _) => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: &[Event], max: u32) -> ChapterState {
        events
            .iter()
            .fold(ChapterState::Pending, |s, e| s.next(*e, max))
    }

    #[test]
    fn success_on_first_attempt() {
        assert_eq!(
            run(&[Event::Begin, Event::Translated], 2),
            ChapterState::Succeeded { attempt: 1 }
        );
    }

    #[test]
    fn defect_then_success() {
        let s = run(&[Event::Begin, Event::Defective, Event::Begin, Event::Translated], 2);
        assert_eq!(s, ChapterState::Succeeded { attempt: 2 });
    }

    #[test]
    fn defects_exhaust_attempts() {
        let s = run(
            &[Event::Begin, Event::Defective, Event::Begin, Event::Defective, Event::Begin],
            2,
        );
        assert_eq!(s, ChapterState::SkippedDefect { attempts: 2 });
        assert!(s.is_terminal());
    }

    #[test]
    fn call_failure_is_terminal_immediately() {
        let s = run(&[Event::Begin, Event::CallFailed], 2);
        assert_eq!(s, ChapterState::FatalError { attempt: 1 });
        assert_eq!(s.next(Event::Begin, 2), s);
    }

    #[test]
    fn single_attempt_policy_skips_after_first_defect() {
        let s = run(&[Event::Begin, Event::Defective, Event::Begin], 1);
        assert_eq!(s, ChapterState::SkippedDefect { attempts: 1 });
    }

    #[test]
    fn stray_events_are_ignored() {
        assert_eq!(
            ChapterState::Pending.next(Event::Translated, 2),
            ChapterState::Pending
        );
        let retry = ChapterState::DefectRetry { attempt: 1 };
        assert_eq!(retry.next(Event::CallFailed, 2), retry);
    }

    #[test]
    fn outcome_maps_to_event() {
        assert_eq!(AttemptOutcome::Translated("x".into()).event(), Event::Translated);
        assert_eq!(AttemptOutcome::Defect(Defect::Empty).event(), Event::Defective);
        assert_eq!(
            AttemptOutcome::Fatal(CallError::Blocked("SAFETY".into())).event(),
            Event::CallFailed
        );
    }
}
