//! Status snapshots for logs and JSON output.

use gapless_types::SchedulerStatus;

use crate::scheduler::Scheduler;
use crate::sink::AudioSink;

impl<S: AudioSink> Scheduler<S> {
    /// Point-in-time view of the scheduler.
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state(),
            current_time: self.current_time(),
            available_duration: self.available_duration(),
            queued_segments: self.queue().len(),
            pending_bytes: self.pending_bytes(),
            volume: self.volume(),
            muted: self.muted(),
        }
    }
}

/// One-line progress summary, e.g. `running 0:03 / 0:10 (2 queued)`.
pub fn progress_line(status: &SchedulerStatus) -> String {
    let mut line = format!(
        "{} {} / {} ({} queued)",
        status.state,
        format_duration_secs(status.current_time),
        format_duration_secs(status.available_duration),
        status.queued_segments
    );
    if status.muted {
        line.push_str(" [muted]");
    }
    line
}

/// `m:ss` for a non-negative number of seconds.
pub fn format_duration_secs(secs: f64) -> String {
    let total_secs = if secs.is_finite() { secs.max(0.0) as u64 } else { 0 };
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    format!("{mins}:{secs:02}")
}
