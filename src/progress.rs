use std::io::{self, Write};
use std::time::Instant;

/// Elapsed-time stamped status lines on stderr, independent of the log filter.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn silent() -> Self {
        Self::new(false)
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.emit(msg.as_ref());
    }

    pub fn stage(&self, name: &str) {
        self.emit(&format!("=== {name} ==="));
    }

    /// `[mm:ss] Translate 3/120 (  2.5%) 0003_title.txt: translated`
    pub fn chapter(&self, current: usize, total: usize, name: &str, status: &str) {
        if !self.enabled {
            return;
        }
        let line = format!("{} {name}: {status}", progress_label("Translate", current, total));
        self.emit(&line);
    }

    fn emit(&self, line: &str) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {line}");
    }
}

fn progress_label(label: &str, current: usize, total: usize) -> String {
    let total = total.max(1);
    let current = current.min(total);
    let pct = (current as f64 / total as f64) * 100.0;
    format!("{label} {current}/{total} ({pct:5.1}%)")
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
