//! Per-segment and aggregate progress: speed histories, ETA estimation, display.
//!
//! Each worker owns one slot and is the only writer of that slot's counters;
//! the display ticker performs read-only scans. Counters are atomics and the
//! status/speed history sits behind a per-slot mutex, so no global lock is
//! ever held across segments.

mod display;

pub use display::{print_final, render_line, spawn_display};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::planner::Segment;

/// Per-segment speed ring capacity.
const SEGMENT_SAMPLE_CAP: usize = 10;
/// Segment average speed uses the most recent samples up to this many.
const SEGMENT_AVG_WINDOW: usize = 5;
/// Global average speed uses the most recent history entries up to this many.
const GLOBAL_AVG_WINDOW: usize = 10;
/// Global history retains samples no older than this.
const GLOBAL_HISTORY_WINDOW: Duration = Duration::from_secs(30);
/// Global history accepts at most one sample per this interval.
const GLOBAL_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
/// A segment is "active" when its last update is at most this old.
const ACTIVE_WINDOW: Duration = Duration::from_secs(5);

/// Lifecycle state of one segment, as shown to the user.
///
/// The display form preserves the human-facing status text; counting for the
/// display line goes through [`SegmentStatus::kind`] instead of substring
/// matching so a stream-error message can never be miscounted.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentStatus {
    Pending,
    /// Initial state when a partial scratch file was found at startup.
    Resuming { pct: f64 },
    Downloading { attempt: u64, resume_pct: f64 },
    StreamError { message: String },
    Retrying { attempt: u64, saved_pct: f64 },
    Completed,
    CompletedAlreadyExists,
    CompletedResumed,
}

/// Display-line bucket for a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Completed,
    Downloading,
    Pending,
    Retrying,
    Other,
}

impl SegmentStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            SegmentStatus::Completed
            | SegmentStatus::CompletedAlreadyExists
            | SegmentStatus::CompletedResumed => StatusKind::Completed,
            SegmentStatus::Downloading { .. } => StatusKind::Downloading,
            SegmentStatus::Pending => StatusKind::Pending,
            SegmentStatus::Retrying { .. } => StatusKind::Retrying,
            SegmentStatus::Resuming { .. } | SegmentStatus::StreamError { .. } => StatusKind::Other,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.kind() == StatusKind::Completed
    }
}

impl std::fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentStatus::Pending => write!(f, "pending"),
            SegmentStatus::Resuming { pct } => write!(f, "resuming from {:.1}%", pct),
            SegmentStatus::Downloading { attempt, resume_pct } => {
                write!(f, "downloading (attempt {}, resume {:.1}%)", attempt, resume_pct)
            }
            SegmentStatus::StreamError { message } => write!(f, "stream error: {}", message),
            SegmentStatus::Retrying { attempt, saved_pct } => {
                write!(f, "retrying now (attempt {}, {:.1}% saved)", attempt, saved_pct)
            }
            SegmentStatus::Completed => write!(f, "completed"),
            SegmentStatus::CompletedAlreadyExists => write!(f, "completed (already exists)"),
            SegmentStatus::CompletedResumed => write!(f, "completed (resumed)"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SpeedSample {
    bytes_per_sec: f64,
    at: Instant,
}

#[derive(Debug)]
struct SlotInner {
    status: SegmentStatus,
    samples: VecDeque<SpeedSample>,
    current_speed: f64,
    last_update: Option<Instant>,
    last_downloaded: u64,
}

/// One segment's progress state. The owning worker is the only writer.
#[derive(Debug)]
pub struct SegmentSlot {
    expected: u64,
    downloaded: AtomicU64,
    retries: AtomicU64,
    inner: Mutex<SlotInner>,
}

impl SegmentSlot {
    fn new(expected: u64) -> Self {
        SegmentSlot {
            expected,
            downloaded: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            inner: Mutex::new(SlotInner {
                status: SegmentStatus::Pending,
                samples: VecDeque::with_capacity(SEGMENT_SAMPLE_CAP),
                current_speed: 0.0,
                last_update: None,
                last_downloaded: 0,
            }),
        }
    }

    /// Mean of the most recent samples (up to [`SEGMENT_AVG_WINDOW`]); the
    /// current instantaneous speed when no samples exist yet.
    fn average_speed(inner: &SlotInner) -> f64 {
        if inner.samples.is_empty() {
            return inner.current_speed;
        }
        let window = inner.samples.len().min(SEGMENT_AVG_WINDOW);
        let sum: f64 = inner
            .samples
            .iter()
            .rev()
            .take(window)
            .map(|s| s.bytes_per_sec)
            .sum();
        sum / window as f64
    }
}

#[derive(Debug)]
struct GlobalInner {
    samples: VecDeque<SpeedSample>,
    last_at: Instant,
    last_bytes: u64,
}

/// Method that produced the current ETA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtaMethod {
    /// Sum of active segments' average speeds (argument: active count).
    Active(usize),
    /// Mean of the recent global speed history.
    Global,
    /// Bytes over total elapsed time.
    Overall,
    Unknown,
}

impl std::fmt::Display for EtaMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EtaMethod::Active(n) => write!(f, "active({})", n),
            EtaMethod::Global => write!(f, "global"),
            EtaMethod::Overall => write!(f, "overall"),
            EtaMethod::Unknown => write!(f, "unknown"),
        }
    }
}

/// ETA estimate plus the method that produced it.
#[derive(Debug, Clone, Copy)]
pub struct Eta {
    pub seconds: Option<f64>,
    pub method: EtaMethod,
}

/// Counts of segments per display bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub completed: usize,
    pub downloading: usize,
    pub pending: usize,
    pub retrying: usize,
}

/// Read-only view of the tracker for the display line and the final summary.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub total_size: u64,
    pub total_downloaded: u64,
    pub percent: f64,
    pub elapsed: Duration,
    pub overall_avg_speed: f64,
    pub global_avg_speed: f64,
    pub active_speed: f64,
    pub active_count: usize,
    pub instant_speed_sum: f64,
    pub segment_count: usize,
    pub eta: Eta,
    pub counts: StatusCounts,
    pub total_retries: u64,
    pub max_segment_retries: u64,
}

/// Shared progress state for one download run.
#[derive(Debug)]
pub struct ProgressTracker {
    total_size: u64,
    started: Instant,
    slots: Vec<SegmentSlot>,
    global: Mutex<GlobalInner>,
}

impl ProgressTracker {
    pub fn new(segments: &[Segment], total_size: u64) -> Self {
        let now = Instant::now();
        ProgressTracker {
            total_size,
            started: now,
            slots: segments.iter().map(|s| SegmentSlot::new(s.len())).collect(),
            global: Mutex::new(GlobalInner {
                samples: VecDeque::new(),
                last_at: now,
                last_bytes: 0,
            }),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.slots.len()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn expected_len(&self, index: usize) -> u64 {
        self.slots[index].expected
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Seed a slot from the pre-scan of its scratch file, before any attempt.
    pub fn prime(&self, index: usize, resume_bytes: u64, status: SegmentStatus) {
        let slot = &self.slots[index];
        slot.downloaded.store(resume_bytes, Ordering::Relaxed);
        let mut inner = slot.inner.lock().unwrap();
        inner.last_downloaded = resume_bytes;
        inner.status = status;
    }

    /// Count a new attempt for the segment; returns the attempt number (1-based).
    pub fn begin_attempt(&self, index: usize) -> u64 {
        self.slots[index].retries.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn set_status(&self, index: usize, status: SegmentStatus) {
        let mut inner = self.slots[index].inner.lock().unwrap();
        inner.status = status;
    }

    pub fn status(&self, index: usize) -> SegmentStatus {
        self.slots[index].inner.lock().unwrap().status.clone()
    }

    /// Record a progress sample for segment `index`.
    ///
    /// `downloaded` is the segment's absolute byte count (resume baseline plus
    /// bytes streamed this run). When `speed_hint` is absent or non-positive,
    /// the instantaneous speed is derived from the previous sample, assuming
    /// one second when this is the first.
    pub fn update_progress(&self, index: usize, downloaded: u64, speed_hint: Option<f64>) {
        let now = Instant::now();
        let slot = &self.slots[index];
        slot.downloaded.store(downloaded, Ordering::Relaxed);

        {
            let mut inner = slot.inner.lock().unwrap();
            let speed = match speed_hint {
                Some(s) if s > 0.0 => s,
                _ => {
                    let dt = inner
                        .last_update
                        .map(|t| now.duration_since(t).as_secs_f64())
                        .unwrap_or(1.0)
                        .max(f64::EPSILON);
                    downloaded.saturating_sub(inner.last_downloaded) as f64 / dt
                }
            };
            if inner.samples.len() == SEGMENT_SAMPLE_CAP {
                inner.samples.pop_front();
            }
            inner.samples.push_back(SpeedSample { bytes_per_sec: speed, at: now });
            inner.current_speed = speed;
            inner.last_update = Some(now);
            inner.last_downloaded = downloaded;
        }

        self.update_global(now);
    }

    /// Set a segment's absolute byte count without recording a speed sample.
    /// Used for no-fetch completions and cancellation checkpoints.
    pub fn set_downloaded(&self, index: usize, bytes: u64) {
        let slot = &self.slots[index];
        slot.downloaded.store(bytes, Ordering::Relaxed);
        let mut inner = slot.inner.lock().unwrap();
        inner.last_downloaded = bytes;
    }

    fn update_global(&self, now: Instant) {
        let mut global = self.global.lock().unwrap();
        let dt = now.duration_since(global.last_at);
        if dt < GLOBAL_SAMPLE_INTERVAL {
            return;
        }
        let total = self.total_downloaded();
        let speed = total.saturating_sub(global.last_bytes) as f64 / dt.as_secs_f64();
        global.samples.push_back(SpeedSample { bytes_per_sec: speed, at: now });
        while let Some(front) = global.samples.front() {
            if now.duration_since(front.at) > GLOBAL_HISTORY_WINDOW {
                global.samples.pop_front();
            } else {
                break;
            }
        }
        global.last_at = now;
        global.last_bytes = total;
    }

    pub fn total_downloaded(&self) -> u64 {
        self.slots.iter().map(|s| s.downloaded.load(Ordering::Relaxed)).sum()
    }

    pub fn total_retries(&self) -> u64 {
        self.slots.iter().map(|s| s.retries.load(Ordering::Relaxed)).sum()
    }

    pub fn max_segment_retries(&self) -> u64 {
        self.slots
            .iter()
            .map(|s| s.retries.load(Ordering::Relaxed))
            .max()
            .unwrap_or(0)
    }

    /// Take a consistent-enough snapshot for display. Slots are read one at a
    /// time; the display tolerates a sample landing between two reads.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let now = Instant::now();
        let elapsed = now.duration_since(self.started);
        let total_downloaded = self.total_downloaded();

        let mut counts = StatusCounts::default();
        let mut active_speed = 0.0;
        let mut active_count = 0usize;
        let mut instant_speed_sum = 0.0;

        for slot in &self.slots {
            let inner = slot.inner.lock().unwrap();
            match inner.status.kind() {
                StatusKind::Completed => counts.completed += 1,
                StatusKind::Downloading => counts.downloading += 1,
                StatusKind::Pending => counts.pending += 1,
                StatusKind::Retrying => counts.retrying += 1,
                StatusKind::Other => {}
            }
            let recent = inner
                .last_update
                .map(|t| now.duration_since(t) <= ACTIVE_WINDOW)
                .unwrap_or(false);
            if recent {
                instant_speed_sum += inner.current_speed;
                if inner.current_speed > 0.0 {
                    active_count += 1;
                    active_speed += SegmentSlot::average_speed(&inner);
                }
            }
        }

        let overall_avg_speed = if elapsed.as_secs_f64() > 0.0 {
            total_downloaded as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let global_avg_speed = {
            let global = self.global.lock().unwrap();
            if global.samples.is_empty() {
                overall_avg_speed
            } else {
                let window = global.samples.len().min(GLOBAL_AVG_WINDOW);
                let sum: f64 = global
                    .samples
                    .iter()
                    .rev()
                    .take(window)
                    .map(|s| s.bytes_per_sec)
                    .sum();
                sum / window as f64
            }
        };

        let remaining = self.total_size.saturating_sub(total_downloaded);
        let eta = select_eta(
            remaining,
            active_count,
            active_speed,
            global_avg_speed,
            overall_avg_speed,
        );

        let percent = if self.total_size == 0 {
            100.0
        } else {
            (total_downloaded as f64 / self.total_size as f64 * 100.0).min(100.0)
        };

        ProgressSnapshot {
            total_size: self.total_size,
            total_downloaded,
            percent,
            elapsed,
            overall_avg_speed,
            global_avg_speed,
            active_speed,
            active_count,
            instant_speed_sum,
            segment_count: self.slots.len(),
            eta,
            counts,
            total_retries: self.total_retries(),
            max_segment_retries: self.max_segment_retries(),
        }
    }

    #[cfg(test)]
    fn inject_segment_sample(&self, index: usize, bytes_per_sec: f64) {
        let mut inner = self.slots[index].inner.lock().unwrap();
        let now = Instant::now();
        if inner.samples.len() == SEGMENT_SAMPLE_CAP {
            inner.samples.pop_front();
        }
        inner.samples.push_back(SpeedSample { bytes_per_sec, at: now });
        inner.current_speed = bytes_per_sec;
        inner.last_update = Some(now);
    }

    #[cfg(test)]
    fn inject_global_sample(&self, bytes_per_sec: f64) {
        let mut global = self.global.lock().unwrap();
        global
            .samples
            .push_back(SpeedSample { bytes_per_sec, at: Instant::now() });
    }
}

/// Pick the ETA in priority order: active aggregate (needs at least two active
/// segments), then global average, then overall average; unknown when none is
/// finite and positive.
fn select_eta(
    remaining: u64,
    active_count: usize,
    active_speed: f64,
    global_avg: f64,
    overall_avg: f64,
) -> Eta {
    let candidate = |speed: f64| -> Option<f64> {
        let eta = remaining as f64 / speed;
        (eta.is_finite() && eta > 0.0).then_some(eta)
    };

    if active_count >= 2 {
        if let Some(secs) = candidate(active_speed) {
            return Eta { seconds: Some(secs), method: EtaMethod::Active(active_count) };
        }
    }
    if let Some(secs) = candidate(global_avg) {
        return Eta { seconds: Some(secs), method: EtaMethod::Global };
    }
    if let Some(secs) = candidate(overall_avg) {
        return Eta { seconds: Some(secs), method: EtaMethod::Overall };
    }
    Eta { seconds: None, method: EtaMethod::Unknown }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_segments;

    fn tracker(total: u64, n: usize) -> ProgressTracker {
        ProgressTracker::new(&plan_segments(total, n), total)
    }

    #[test]
    fn status_display_preserves_legacy_text() {
        assert_eq!(SegmentStatus::Pending.to_string(), "pending");
        assert_eq!(
            SegmentStatus::Resuming { pct: 40.0 }.to_string(),
            "resuming from 40.0%"
        );
        assert_eq!(
            SegmentStatus::Downloading { attempt: 2, resume_pct: 40.0 }.to_string(),
            "downloading (attempt 2, resume 40.0%)"
        );
        assert_eq!(
            SegmentStatus::Retrying { attempt: 3, saved_pct: 66.7 }.to_string(),
            "retrying now (attempt 3, 66.7% saved)"
        );
        assert_eq!(SegmentStatus::Completed.to_string(), "completed");
        assert_eq!(
            SegmentStatus::CompletedAlreadyExists.to_string(),
            "completed (already exists)"
        );
        assert_eq!(SegmentStatus::CompletedResumed.to_string(), "completed (resumed)");
        assert_eq!(
            SegmentStatus::StreamError { message: "reset".into() }.to_string(),
            "stream error: reset"
        );
    }

    #[test]
    fn stream_error_status_counts_in_no_bucket() {
        let t = tracker(1000, 4);
        t.set_status(0, SegmentStatus::Completed);
        t.set_status(1, SegmentStatus::Downloading { attempt: 1, resume_pct: 0.0 });
        t.set_status(2, SegmentStatus::StreamError { message: "downloading failed".into() });
        let counts = t.snapshot().counts;
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.downloading, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.retrying, 0);
    }

    #[test]
    fn segment_samples_are_capped() {
        let t = tracker(1_000_000, 1);
        for i in 0..25 {
            t.update_progress(0, i * 100, Some(1000.0));
        }
        let inner = t.slots[0].inner.lock().unwrap();
        assert_eq!(inner.samples.len(), SEGMENT_SAMPLE_CAP);
    }

    #[test]
    fn attempts_accumulate_per_segment_and_total() {
        let t = tracker(1000, 3);
        assert_eq!(t.begin_attempt(0), 1);
        assert_eq!(t.begin_attempt(0), 2);
        assert_eq!(t.begin_attempt(2), 1);
        assert_eq!(t.total_retries(), 3);
        assert_eq!(t.max_segment_retries(), 2);
    }

    #[test]
    fn priming_counts_resume_bytes_into_total() {
        let t = tracker(1000, 4);
        t.prime(1, 100, SegmentStatus::Resuming { pct: 40.0 });
        t.prime(2, 250, SegmentStatus::CompletedAlreadyExists);
        assert_eq!(t.total_downloaded(), 350);
        assert_eq!(t.status(2), SegmentStatus::CompletedAlreadyExists);
    }

    #[test]
    fn eta_prefers_active_with_two_or_more_segments() {
        let t = tracker(10_000, 4);
        t.inject_segment_sample(0, 100.0);
        t.inject_segment_sample(1, 100.0);
        let snap = t.snapshot();
        assert_eq!(snap.active_count, 2);
        assert_eq!(snap.eta.method, EtaMethod::Active(2));
        // remaining 10_000 at 200 B/s aggregate
        assert!((snap.eta.seconds.unwrap() - 50.0).abs() < 1.0);
    }

    #[test]
    fn eta_falls_back_to_global_with_one_active_segment() {
        let t = tracker(10_000, 4);
        t.inject_segment_sample(0, 100.0);
        t.inject_global_sample(500.0);
        let snap = t.snapshot();
        assert_eq!(snap.active_count, 1);
        assert_eq!(snap.eta.method, EtaMethod::Global);
        assert!((snap.eta.seconds.unwrap() - 20.0).abs() < 0.1);
    }

    #[test]
    fn eta_unknown_when_nothing_moves() {
        let t = tracker(10_000, 4);
        let snap = t.snapshot();
        assert_eq!(snap.eta.method, EtaMethod::Unknown);
        assert!(snap.eta.seconds.is_none());
    }

    #[test]
    fn zero_size_snapshot_reports_full_percent() {
        let t = tracker(0, 3);
        assert_eq!(t.snapshot().percent, 100.0);
    }

    #[test]
    fn speed_derived_from_delta_when_no_hint() {
        let t = tracker(1_000_000, 1);
        t.update_progress(0, 5000, None);
        // first sample assumes a one-second interval
        let inner = t.slots[0].inner.lock().unwrap();
        assert!((inner.current_speed - 5000.0).abs() < 0.5);
    }
}
