//! Final assembly: verify every scratch file, concatenate in segment order,
//! verify the result, clean up.
//!
//! Errors here are fatal. Workers have already certified each segment, so a
//! mismatch at this stage means the scratch set changed underneath us and no
//! amount of retrying inside the assembler can fix that.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::planner::Segment;

/// Concatenate the scratch files for `segments` into `final_path`.
///
/// Each scratch is length-verified before any byte is copied, and the final
/// file is length-verified against `total_size` afterwards. Scratch files are
/// deleted on success; a failed deletion is logged and ignored.
pub async fn assemble(
    final_path: &Path,
    segments: &[Segment],
    scratch_paths: &[PathBuf],
    total_size: u64,
) -> Result<()> {
    assert_eq!(segments.len(), scratch_paths.len());

    for (i, (segment, scratch)) in segments.iter().zip(scratch_paths).enumerate() {
        verify_scratch(i, segment, scratch).await?;
    }

    let mut out = tokio::fs::File::create(final_path)
        .await
        .with_context(|| format!("failed to create final file {}", final_path.display()))?;

    for (segment, scratch) in segments.iter().zip(scratch_paths) {
        if segment.is_empty() {
            continue;
        }
        let mut input = tokio::fs::File::open(scratch)
            .await
            .with_context(|| format!("failed to open scratch {}", scratch.display()))?;
        tokio::io::copy(&mut input, &mut out)
            .await
            .with_context(|| format!("failed to append scratch {}", scratch.display()))?;
    }

    out.flush().await.context("failed to flush final file")?;
    out.sync_all().await.context("failed to sync final file")?;
    drop(out);

    let final_len = tokio::fs::metadata(final_path)
        .await
        .with_context(|| format!("failed to stat final file {}", final_path.display()))?
        .len();
    if final_len != total_size {
        bail!(
            "final file verification failed: expected {} bytes, found {}",
            total_size,
            final_len
        );
    }

    for scratch in scratch_paths {
        match tokio::fs::remove_file(scratch).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("failed to delete scratch {}: {}", scratch.display(), e),
        }
    }

    tracing::info!(
        "assembled {} segment(s) into {} ({} bytes)",
        segments.len(),
        final_path.display(),
        total_size
    );
    Ok(())
}

async fn verify_scratch(index: usize, segment: &Segment, scratch: &Path) -> Result<()> {
    let expected = segment.len();
    let actual = match tokio::fs::metadata(scratch).await {
        Ok(m) => m.len(),
        // an empty segment legitimately never created a scratch file
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && expected == 0 => return Ok(()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("segment {index} verification failed: cannot stat {}", scratch.display()))
        }
    };
    if actual != expected {
        bail!("segment {index} verification failed: expected {expected} bytes, found {actual}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_segments;
    use crate::scratch::scratch_path;
    use tempfile::tempdir;

    fn write_scratch_set(dir: &Path, basename: &str, body: &[u8], segments: &[Segment]) -> Vec<PathBuf> {
        segments
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let path = scratch_path(dir, basename, i);
                std::fs::write(&path, &body[s.start as usize..s.end as usize]).unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn concatenates_in_segment_order() {
        let dir = tempdir().unwrap();
        let body: Vec<u8> = (0u8..=255).cycle().take(64 * 1024).collect();
        let segments = plan_segments(body.len() as u64, 4);
        let paths = write_scratch_set(dir.path(), "blob.bin", &body, &segments);

        let final_path = dir.path().join("blob.bin");
        assemble(&final_path, &segments, &paths, body.len() as u64)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&final_path).unwrap(), body);
        for p in &paths {
            assert!(!p.exists(), "scratch must be deleted after assembly");
        }
    }

    #[tokio::test]
    async fn truncated_scratch_is_fatal() {
        let dir = tempdir().unwrap();
        let body = vec![9u8; 1000];
        let segments = plan_segments(1000, 4);
        let paths = write_scratch_set(dir.path(), "blob.bin", &body, &segments);

        // corrupt one scratch to length L-1
        let f = std::fs::OpenOptions::new().write(true).open(&paths[2]).unwrap();
        f.set_len(segments[2].len() - 1).unwrap();

        let final_path = dir.path().join("blob.bin");
        let err = assemble(&final_path, &segments, &paths, 1000).await.unwrap_err();
        assert!(err.to_string().contains("segment 2 verification failed"));
        assert!(!final_path.exists(), "final file must not be produced");
        assert!(paths[0].exists(), "scratch is preserved on fatal error");
    }

    #[tokio::test]
    async fn empty_object_yields_empty_file() {
        let dir = tempdir().unwrap();
        let segments = plan_segments(0, 3);
        let paths: Vec<PathBuf> = (0..3).map(|i| scratch_path(dir.path(), "empty", i)).collect();

        let final_path = dir.path().join("empty");
        assemble(&final_path, &segments, &paths, 0).await.unwrap();
        assert_eq!(std::fs::metadata(&final_path).unwrap().len(), 0);
    }
}
