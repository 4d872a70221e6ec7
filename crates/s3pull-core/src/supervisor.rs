//! Orchestration of one download run: size probe, segment plan, worker fleet,
//! progress display, final assembly, and the completion summary.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::assembler;
use crate::config::PullConfig;
use crate::format::{format_duration, format_speed};
use crate::planner::plan_segments;
use crate::progress::{self, ProgressTracker, SegmentStatus};
use crate::safe_resume::{self, PullManifest};
use crate::scratch::{inspect_scratch, scratch_path};
use crate::transport::Transport;
use crate::worker::{self, WorkerContext};

/// Delay between successive worker spawns, so N connections don't all open in
/// the same instant.
const SPAWN_STAGGER: Duration = Duration::from_millis(100);

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub final_path: PathBuf,
    pub size: u64,
    pub elapsed: Duration,
    pub avg_speed: f64,
    pub total_retries: u64,
    pub max_segment_retries: u64,
}

/// How the run ended. Cancellation is an ordered shutdown, not an error:
/// scratch bytes stay on disk and the next run resumes from them.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(DownloadSummary),
    /// The final file already exists with the right length; nothing fetched.
    AlreadyComplete { final_path: PathBuf, size: u64 },
    Cancelled,
}

/// Download one object. Fatal errors (head failure, assembly verification)
/// propagate as `Err`; transfer failures never do, they retry inside the
/// workers until success or cancellation.
pub async fn run(
    transport: Arc<dyn Transport>,
    config: &PullConfig,
    cancel: CancellationToken,
) -> Result<RunOutcome> {
    config.validate()?;

    let bucket = config.bucket.clone();
    let key = config.normalized_key().to_string();
    let basename = config.basename().to_string();
    let download_dir = config.download_dir.clone();

    tokio::fs::create_dir_all(&download_dir)
        .await
        .with_context(|| format!("failed to create {}", download_dir.display()))?;

    let head = transport
        .head(&bucket, &key)
        .await
        .context("head request failed")?;
    let total_size = head.content_length;
    tracing::info!("s3://{}/{} is {} bytes", bucket, key, total_size);

    if cancel.is_cancelled() {
        return Ok(RunOutcome::Cancelled);
    }

    let final_path = download_dir.join(&basename);
    if let Ok(meta) = tokio::fs::metadata(&final_path).await {
        if meta.len() == total_size {
            tracing::info!(
                "{} already downloaded ({} bytes), nothing to do",
                final_path.display(),
                total_size
            );
            return Ok(RunOutcome::AlreadyComplete { final_path, size: total_size });
        }
    }

    let manifest = PullManifest { key: key.clone(), total_size };
    safe_resume::reconcile_scratch(&download_dir, &basename, &manifest)?;
    safe_resume::store(&safe_resume::manifest_path(&download_dir, &basename), &manifest)?;

    let segments = plan_segments(total_size, config.concurrency);
    let scratch_paths: Vec<PathBuf> = (0..segments.len())
        .map(|i| scratch_path(&download_dir, &basename, i))
        .collect();

    let tracker = Arc::new(ProgressTracker::new(&segments, total_size));
    prime_from_disk(&tracker, &segments, &scratch_paths);

    let display_stop = CancellationToken::new();
    let display = progress::spawn_display(Arc::clone(&tracker), display_stop.clone());

    let ctx = WorkerContext {
        transport,
        bucket,
        key,
        tracker: Arc::clone(&tracker),
        cancel: cancel.clone(),
    };

    let mut handles = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().copied().enumerate() {
        let ctx = ctx.clone();
        let scratch = scratch_paths[i].clone();
        handles.push(tokio::spawn(async move {
            worker::run_segment(&ctx, i, segment, scratch).await
        }));

        if i + 1 < segments.len() {
            tokio::select! {
                _ = tokio::time::sleep(SPAWN_STAGGER) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    let mut cancelled = false;
    for handle in handles {
        match handle.await {
            Ok(Ok(_path)) => {}
            Ok(Err(_aborted)) => cancelled = true,
            Err(e) => {
                display_stop.cancel();
                let _ = display.await;
                return Err(anyhow::anyhow!(e)).context("segment worker task failed");
            }
        }
    }

    display_stop.cancel();
    let _ = display.await;

    if cancelled {
        progress::print_final(&tracker);
        tracing::info!("download cancelled; scratch files preserved for resume");
        return Ok(RunOutcome::Cancelled);
    }

    if let Err(e) = assembler::assemble(&final_path, &segments, &scratch_paths, total_size).await {
        progress::print_final(&tracker);
        return Err(e);
    }

    safe_resume::remove(&safe_resume::manifest_path(&download_dir, &basename));

    let elapsed = tracker.started().elapsed();
    let avg_speed = if elapsed.as_secs_f64() > 0.0 {
        total_size as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    let summary = DownloadSummary {
        final_path,
        size: total_size,
        elapsed,
        avg_speed,
        total_retries: tracker.total_retries(),
        max_segment_retries: tracker.max_segment_retries(),
    };
    tracing::info!(
        "download complete: {} ({} bytes) in {}, {} total attempt(s), max {} on one segment, {}",
        summary.final_path.display(),
        summary.size,
        format_duration(summary.elapsed.as_secs()),
        summary.total_retries,
        summary.max_segment_retries,
        format_speed(summary.avg_speed),
    );

    Ok(RunOutcome::Completed(summary))
}

/// Pre-scan scratch files so the tracker's first frame reflects on-disk
/// progress and so resumable segments announce themselves in the log.
fn prime_from_disk(
    tracker: &ProgressTracker,
    segments: &[crate::planner::Segment],
    scratch_paths: &[PathBuf],
) {
    for (i, segment) in segments.iter().enumerate() {
        let expected = segment.len();
        let check = inspect_scratch(&scratch_paths[i], expected);
        if check.complete {
            tracker.prime(i, expected, SegmentStatus::CompletedAlreadyExists);
            tracing::info!("segment {} already complete on disk", i);
        } else if check.valid && check.resume_bytes > 0 {
            let pct = check.resume_bytes as f64 / expected as f64 * 100.0;
            tracker.prime(i, check.resume_bytes, SegmentStatus::Resuming { pct });
            tracing::info!(
                "segment {} resuming from {:.1}% ({} of {} bytes)",
                i,
                pct,
                check.resume_bytes,
                expected
            );
        }
    }
}
