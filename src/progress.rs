//! Progress bars and tail-friendly progress lines.
//!
//! In log-only mode bars are hidden and each phase prints periodic
//! `[phase] n/total (pct%)` lines to stderr instead.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Number of progress lines printed per phase in log-only mode
const LOG_LINES_PER_PHASE: u64 = 10;

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProgressMode {
    pub log_only: bool,
}

impl ProgressMode {
    pub fn new(log_only: bool) -> Self {
        Self { log_only }
    }

    /// Progress for a counted phase.
    pub fn phase(&self, phase: &str, total: u64) -> PhaseProgress {
        let bar = ProgressBar::new(total);
        if self.log_only {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(phase.to_string());
        PhaseProgress {
            bar,
            phase: phase.to_string(),
            total,
            log_only: self.log_only,
            done: AtomicU64::new(0),
        }
    }

    /// Spinner for file loading and other uncounted work.
    pub fn spinner(&self, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if self.log_only {
            pb.set_draw_target(ProgressDrawTarget::hidden());
            eprintln!("[{}]", msg);
        } else {
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{msg} {spinner} [{elapsed_precise}]")
            {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        pb.set_message(msg.to_string());
        pb
    }
}

/// One phase's progress. `inc` may be called from rayon workers.
pub struct PhaseProgress {
    bar: ProgressBar,
    phase: String,
    total: u64,
    log_only: bool,
    done: AtomicU64,
}

impl PhaseProgress {
    /// Progress that draws and prints nothing (library callers, tests).
    pub fn hidden(phase: &str, total: u64) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            phase: phase.to_string(),
            total,
            log_only: false,
            done: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.bar.inc(1);
        let current = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if self.log_only {
            let interval = (self.total / LOG_LINES_PER_PHASE).max(1);
            if current % interval == 0 || current == self.total {
                let pct = 100.0 * current as f64 / self.total.max(1) as f64;
                eprintln!("[{}] {}/{} ({:.1}%)", self.phase, current, self.total, pct);
            }
        }
    }

    pub fn position(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn finish(&self, msg: &str) {
        self.bar.finish_with_message(format!("{} {}", self.phase, msg));
    }
}
