use std::time::Duration;

use super::{CallError, GenerateRequest, LlmClient};

/// Sleeps between calls. Swapped out in tests so backoff does not block.
pub trait Pause {
    fn pause(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra calls after the first one fails transiently.
    pub max_retries: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait after the `attempt`-th (1-based) failed call: `2^attempt` seconds, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_backoff)
    }
}

/// One logical LLM call: transient failures are retried with exponential backoff, anything else
/// is returned on the spot.
pub fn call_with_retries(
    client: &dyn LlmClient,
    request: &GenerateRequest<'_>,
    policy: &RetryPolicy,
    pause: &dyn Pause,
) -> Result<String, CallError> {
    let max_calls = policy.max_retries.saturating_add(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match client.generate(request) {
            Ok(text) => return Ok(text),
            Err(err) if err.is_transient() => {
                if attempt >= max_calls {
                    tracing::error!("llm call failed {attempt} times, giving up: {err}");
                    return Err(CallError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                let wait = policy.backoff(attempt);
                tracing::warn!(
                    "llm call {attempt}/{max_calls} failed: {err}; retrying in {}s",
                    wait.as_secs()
                );
                pause.pause(wait);
            }
            Err(err) => {
                tracing::error!("llm call failed (not retryable): {err}");
                return Err(err);
            }
        }
    }
}
