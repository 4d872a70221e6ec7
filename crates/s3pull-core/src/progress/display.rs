//! Single-line terminal display, rewritten every 500 ms.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::format::{format_bytes, format_duration, format_speed};

use super::{ProgressSnapshot, ProgressTracker};

const DISPLAY_INTERVAL: Duration = Duration::from_millis(500);

/// Render the one-line progress report.
pub fn render_line(s: &ProgressSnapshot) -> String {
    let eta = match s.eta.seconds {
        Some(secs) => format!("{} ({})", format_duration(secs as u64), s.eta.method),
        None => "unknown".to_string(),
    };
    format!(
        "{:>5.1}% | {} / {} | avg {} | active {} ({}/{}) | inst {} | ETA {} | \
         {} completed, {} downloading, {} pending, {} retrying | retries {} (max {})",
        s.percent,
        format_bytes(s.total_downloaded),
        format_bytes(s.total_size),
        format_speed(s.overall_avg_speed),
        format_speed(s.active_speed),
        s.active_count,
        s.segment_count,
        format_speed(s.instant_speed_sum),
        eta,
        s.counts.completed,
        s.counts.downloading,
        s.counts.pending,
        s.counts.retrying,
        s.total_retries,
        s.max_segment_retries,
    )
}

fn rewrite_line(line: &str, prev_len: &mut usize) {
    let pad = prev_len.saturating_sub(line.len());
    print!("\r{}{}", line, " ".repeat(pad));
    let _ = std::io::stdout().flush();
    *prev_len = line.len();
}

/// Spawn the display ticker. Runs until the token is cancelled; the caller is
/// expected to follow up with [`print_final`] to terminate the line.
pub fn spawn_display(
    tracker: Arc<ProgressTracker>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DISPLAY_INTERVAL);
        let mut prev_len = 0usize;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    rewrite_line(&render_line(&tracker.snapshot()), &mut prev_len);
                }
            }
        }
    })
}

/// Print the final progress report on its own line and log it.
pub fn print_final(tracker: &ProgressTracker) {
    let line = render_line(&tracker.snapshot());
    println!("\r{}", line);
    tracing::info!("final progress: {}", line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_segments;
    use crate::progress::SegmentStatus;

    #[test]
    fn line_contains_every_reported_field() {
        let segments = plan_segments(1_000_000, 4);
        let tracker = ProgressTracker::new(&segments, 1_000_000);
        tracker.prime(0, 250_000, SegmentStatus::CompletedAlreadyExists);
        tracker.set_status(1, SegmentStatus::Downloading { attempt: 1, resume_pct: 0.0 });
        tracker.begin_attempt(1);

        let line = render_line(&tracker.snapshot());
        assert!(line.contains("25.0%"), "percent missing: {line}");
        assert!(line.contains("244.14 KB / 976.56 KB"), "byte counts missing: {line}");
        assert!(line.contains("ETA"), "eta missing: {line}");
        assert!(line.contains("1 completed, 1 downloading, 2 pending, 0 retrying"));
        assert!(line.contains("retries 1 (max 1)"));
    }
}
