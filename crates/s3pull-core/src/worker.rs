//! Single-segment download worker.
//!
//! Each worker owns one segment's lifecycle: inspect the scratch file, fetch
//! the remaining byte range, stream it to disk, verify the on-disk length,
//! and retry forever on any failure. Bytes already written are never thrown
//! away (the overlong case excepted), so every retry resumes exactly where
//! the previous attempt stopped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::control::Aborted;
use crate::planner::Segment;
use crate::progress::{ProgressTracker, SegmentStatus};
use crate::scratch::inspect_scratch;
use crate::transport::Transport;

/// Fixed sleep between attempts.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// Minimum spacing between progress samples.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Error from a single attempt. Every kind is retryable; the worker loop only
/// exits on success or cancellation.
#[derive(Debug)]
pub enum AttemptError {
    /// The ranged request itself failed (connect, DNS, 5xx, ...).
    Transport(anyhow::Error),
    /// The body stream failed mid-transfer.
    Stream(std::io::Error),
    /// Server-reported content length does not match the requested remainder.
    ShortBody { expected: u64, reported: u64 },
    /// Post-stream check: on-disk scratch length does not match the segment.
    LengthMismatch { expected: u64, actual: u64 },
    /// Scratch file I/O failed.
    Io(std::io::Error),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Transport(e) => write!(f, "{e:#}"),
            AttemptError::Stream(e) => write!(f, "body stream failed: {e}"),
            AttemptError::ShortBody { expected, reported } => {
                write!(f, "short response: expected {expected} bytes, server reported {reported}")
            }
            AttemptError::LengthMismatch { expected, actual } => {
                write!(f, "length mismatch: expected {expected} bytes on disk, found {actual}")
            }
            AttemptError::Io(e) => write!(f, "scratch io: {e}"),
        }
    }
}

impl std::error::Error for AttemptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttemptError::Stream(e) | AttemptError::Io(e) => Some(e),
            AttemptError::Transport(_)
            | AttemptError::ShortBody { .. }
            | AttemptError::LengthMismatch { .. } => None,
        }
    }
}

enum AttemptFailure {
    Cancelled,
    Failed(AttemptError),
}

impl From<AttemptError> for AttemptFailure {
    fn from(e: AttemptError) -> Self {
        AttemptFailure::Failed(e)
    }
}

/// Everything a worker needs besides its own segment.
#[derive(Clone)]
pub struct WorkerContext {
    pub transport: Arc<dyn Transport>,
    pub bucket: String,
    pub key: String,
    pub tracker: Arc<ProgressTracker>,
    pub cancel: CancellationToken,
}

/// Drive segment `index` to completion. Returns the scratch path once the
/// on-disk length matches the segment, or `Aborted` when cancellation arrives
/// at a suspension point. There is no failure return: transfers retry
/// indefinitely with a fixed one-second backoff.
pub async fn run_segment(
    ctx: &WorkerContext,
    index: usize,
    segment: Segment,
    scratch: PathBuf,
) -> Result<PathBuf, Aborted> {
    loop {
        let attempt = ctx.tracker.begin_attempt(index);
        match run_attempt(ctx, index, segment, &scratch, attempt).await {
            Ok(status) => {
                tracing::info!("segment {} {} after {} attempt(s)", index, status, attempt);
                ctx.tracker.set_status(index, status);
                return Ok(scratch);
            }
            Err(AttemptFailure::Cancelled) => {
                tracing::info!("segment {} cancelled; scratch preserved", index);
                return Err(Aborted);
            }
            Err(AttemptFailure::Failed(err)) => {
                tracing::error!("segment {} attempt {} failed: {}", index, attempt, err);
                ctx.tracker
                    .set_status(index, SegmentStatus::StreamError { message: err.to_string() });

                let saved_pct = saved_percent(&scratch, segment.len());
                ctx.tracker
                    .set_status(index, SegmentStatus::Retrying { attempt, saved_pct });

                tokio::select! {
                    _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                    _ = ctx.cancel.cancelled() => return Err(Aborted),
                }
            }
        }
    }
}

/// One pass through the attempt protocol.
async fn run_attempt(
    ctx: &WorkerContext,
    index: usize,
    segment: Segment,
    scratch: &Path,
    attempt: u64,
) -> Result<SegmentStatus, AttemptFailure> {
    let expected_len = segment.len();

    let check = inspect_scratch(scratch, expected_len);
    if check.complete {
        ctx.tracker.set_downloaded(index, expected_len);
        return Ok(SegmentStatus::CompletedAlreadyExists);
    }
    let resume = if check.valid { check.resume_bytes } else { 0 };

    let remaining = expected_len - resume;
    if remaining == 0 {
        // zero-length segments need no fetch
        ctx.tracker.set_downloaded(index, expected_len);
        return Ok(SegmentStatus::CompletedResumed);
    }
    let resume_pct = resume as f64 / expected_len as f64 * 100.0;

    ctx.tracker
        .set_status(index, SegmentStatus::Downloading { attempt, resume_pct });
    tracing::debug!(
        "segment {} attempt {}: fetching {} bytes from offset {}",
        index,
        attempt,
        remaining,
        segment.start + resume
    );

    let range = segment.range_value_from(resume);
    let body = tokio::select! {
        r = ctx.transport.get_range(&ctx.bucket, &ctx.key, &range) => {
            r.map_err(AttemptError::Transport)?
        }
        _ = ctx.cancel.cancelled() => return Err(AttemptFailure::Cancelled),
    };

    if body.content_length != remaining {
        return Err(AttemptError::ShortBody {
            expected: remaining,
            reported: body.content_length,
        }
        .into());
    }

    let mut file = if resume > 0 {
        tokio::fs::OpenOptions::new().append(true).open(scratch).await
    } else {
        tokio::fs::File::create(scratch).await
    }
    .map_err(AttemptError::Io)?;

    let mut stream = body.stream;
    let mut session_bytes = 0u64;
    let mut bytes_since_sample = 0u64;
    let mut last_sample_at = Instant::now();

    loop {
        let next = tokio::select! {
            c = stream.next() => c,
            _ = ctx.cancel.cancelled() => {
                // keep what we have; the next run resumes from here
                let _ = file.flush().await;
                ctx.tracker.set_downloaded(index, resume + session_bytes);
                return Err(AttemptFailure::Cancelled);
            }
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                let _ = file.flush().await;
                return Err(AttemptError::Stream(e).into());
            }
            None => break,
        };

        file.write_all(&chunk).await.map_err(AttemptError::Io)?;
        session_bytes += chunk.len() as u64;
        bytes_since_sample += chunk.len() as u64;

        let since = last_sample_at.elapsed();
        if since >= SAMPLE_INTERVAL {
            let speed = bytes_since_sample as f64 / since.as_secs_f64();
            ctx.tracker
                .update_progress(index, resume + session_bytes, Some(speed));
            tracing::debug!(
                "segment {} attempt {}: {} / {} bytes at {:.0} B/s",
                index,
                attempt,
                resume + session_bytes,
                expected_len,
                speed
            );
            last_sample_at = Instant::now();
            bytes_since_sample = 0;
        }
    }

    file.flush().await.map_err(AttemptError::Io)?;
    drop(file);

    // the on-disk length is the only authority for completion
    let on_disk = tokio::fs::metadata(scratch)
        .await
        .map_err(AttemptError::Io)?
        .len();
    if on_disk != expected_len {
        ctx.tracker.set_downloaded(index, on_disk.min(expected_len));
        return Err(AttemptError::LengthMismatch { expected: expected_len, actual: on_disk }.into());
    }

    ctx.tracker.update_progress(index, expected_len, None);
    Ok(SegmentStatus::Completed)
}

fn saved_percent(scratch: &Path, expected_len: u64) -> f64 {
    if expected_len == 0 {
        return 100.0;
    }
    let on_disk = std::fs::metadata(scratch).map(|m| m.len()).unwrap_or(0);
    on_disk.min(expected_len) as f64 / expected_len as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_error_messages() {
        let e = AttemptError::ShortBody { expected: 150_000, reported: 100_000 };
        assert_eq!(
            e.to_string(),
            "short response: expected 150000 bytes, server reported 100000"
        );
        let e = AttemptError::LengthMismatch { expected: 250_000, actual: 249_999 };
        assert_eq!(
            e.to_string(),
            "length mismatch: expected 250000 bytes on disk, found 249999"
        );
    }

    #[test]
    fn saved_percent_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.part0");
        std::fs::write(&path, vec![0u8; 50]).unwrap();
        assert!((saved_percent(&path, 200) - 25.0).abs() < f64::EPSILON);
        // overlong on disk never reports more than 100%
        assert!((saved_percent(&path, 40) - 100.0).abs() < f64::EPSILON);
        assert_eq!(saved_percent(&dir.path().join("absent"), 200), 0.0);
    }
}
