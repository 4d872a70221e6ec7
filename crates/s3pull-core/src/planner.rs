//! Range math: split an object of known size into N contiguous segments.

/// A single segment: byte range [start, end) (half-open) of the remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive).
    pub end: u64,
}

impl Segment {
    /// Length of this segment in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// True for zero-length segments (possible when total size < concurrency).
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// HTTP Range header value for the bytes still missing after `resume_bytes`
    /// are already on disk: `bytes=(start+resume)-(end-1)`, inclusive end.
    /// Callers must not ask for a range once the segment is fully covered.
    pub fn range_value_from(&self, resume_bytes: u64) -> String {
        debug_assert!(self.start + resume_bytes < self.end);
        format!("bytes={}-{}", self.start + resume_bytes, self.end - 1)
    }
}

/// Builds the segment plan for a given total size and concurrency.
///
/// Always returns exactly `concurrency` segments. Each segment i starts at
/// `i * floor(total_size / concurrency)`; the last segment absorbs the
/// remainder. With `total_size == 0` every segment is zero-length, and with
/// `total_size < concurrency` the leading segments are zero-length while the
/// last one carries all the bytes. Ranges are contiguous, non-overlapping,
/// and union to `[0, total_size)`.
pub fn plan_segments(total_size: u64, concurrency: usize) -> Vec<Segment> {
    assert!(concurrency >= 1, "concurrency must be at least 1");

    let n = concurrency as u64;
    let base = total_size / n;

    let mut out = Vec::with_capacity(concurrency);
    for i in 0..n {
        let start = i * base;
        let end = if i == n - 1 { total_size } else { (i + 1) * base };
        out.push(Segment { start, end });
    }

    out
}
