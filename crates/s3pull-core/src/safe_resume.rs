//! Stale-scratch detection via a sidecar manifest.
//!
//! Scratch files are keyed by basename only, so partial bytes left behind by
//! a different object (same file name, different key or size) would corrupt a
//! resume. A small JSON sidecar records `(key, total_size)` from the run that
//! created the scratch files; a mismatch on startup discards them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identity of the object the scratch files belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullManifest {
    pub key: String,
    pub total_size: u64,
}

/// Sidecar path: `<dir>/<basename>.pull.json`.
pub fn manifest_path(download_dir: &Path, basename: &str) -> PathBuf {
    download_dir.join(format!("{basename}.pull.json"))
}

/// Read the manifest if present. A manifest that exists but cannot be parsed
/// is treated as absent (the scratch set will be discarded as mismatched).
pub fn load(path: &Path) -> Option<PullManifest> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::error!("failed to read manifest {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&data) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::error!("failed to parse manifest {}: {}", path.display(), e);
            None
        }
    }
}

pub fn store(path: &Path, manifest: &PullManifest) -> Result<()> {
    let data = serde_json::to_string_pretty(manifest)?;
    std::fs::write(path, data)
        .with_context(|| format!("failed to write manifest {}", path.display()))?;
    Ok(())
}

pub fn remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to remove manifest {}: {}", path.display(), e);
        }
    }
}

/// Reconcile on-disk scratch files with the object being downloaded.
///
/// When the stored manifest differs from `current` (or any scratch file
/// predates manifest support), every `<basename>.part*` file is deleted so
/// the run starts from zero. Returns true when stale scratch was discarded.
pub fn reconcile_scratch(download_dir: &Path, basename: &str, current: &PullManifest) -> Result<bool> {
    let path = manifest_path(download_dir, basename);
    let stored = load(&path);

    if stored.as_ref() == Some(current) {
        return Ok(false);
    }

    let discarded = discard_scratch_files(download_dir, basename)?;
    if discarded > 0 {
        match stored {
            Some(m) => tracing::warn!(
                "scratch files for {} belong to key {} ({} bytes); discarded {} file(s)",
                basename,
                m.key,
                m.total_size,
                discarded
            ),
            None => tracing::warn!(
                "scratch files for {} have no manifest; discarded {} file(s)",
                basename,
                discarded
            ),
        }
    }
    Ok(discarded > 0)
}

fn discard_scratch_files(download_dir: &Path, basename: &str) -> Result<usize> {
    let prefix = format!("{basename}.part");
    let mut removed = 0usize;
    let entries = match std::fs::read_dir(download_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to scan {}", download_dir.display()))
        }
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(rest) = name.strip_prefix(&prefix) {
            if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
                std::fs::remove_file(entry.path())
                    .with_context(|| format!("failed to remove stale scratch {}", name))?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manifest(key: &str, size: u64) -> PullManifest {
        PullManifest { key: key.to_string(), total_size: size }
    }

    #[test]
    fn manifest_roundtrip() {
        let dir = tempdir().unwrap();
        let path = manifest_path(dir.path(), "clip.mp4");
        let m = manifest("videos/clip.mp4", 1_000_000);
        store(&path, &m).unwrap();
        assert_eq!(load(&path), Some(m));
    }

    #[test]
    fn matching_manifest_keeps_scratch() {
        let dir = tempdir().unwrap();
        let m = manifest("videos/clip.mp4", 1_000_000);
        store(&manifest_path(dir.path(), "clip.mp4"), &m).unwrap();
        let part = dir.path().join("clip.mp4.part0");
        std::fs::write(&part, b"abc").unwrap();

        let discarded = reconcile_scratch(dir.path(), "clip.mp4", &m).unwrap();
        assert!(!discarded);
        assert!(part.exists());
    }

    #[test]
    fn size_change_discards_scratch() {
        let dir = tempdir().unwrap();
        store(
            &manifest_path(dir.path(), "clip.mp4"),
            &manifest("videos/clip.mp4", 500),
        )
        .unwrap();
        let part0 = dir.path().join("clip.mp4.part0");
        let part1 = dir.path().join("clip.mp4.part1");
        std::fs::write(&part0, b"abc").unwrap();
        std::fs::write(&part1, b"defg").unwrap();
        // unrelated file with a similar name must survive
        let other = dir.path().join("clip.mp4.partial-notes");
        std::fs::write(&other, b"keep").unwrap();

        let discarded =
            reconcile_scratch(dir.path(), "clip.mp4", &manifest("videos/clip.mp4", 900)).unwrap();
        assert!(discarded);
        assert!(!part0.exists());
        assert!(!part1.exists());
        assert!(other.exists());
    }

    #[test]
    fn missing_manifest_with_scratch_discards() {
        let dir = tempdir().unwrap();
        let part = dir.path().join("clip.mp4.part3");
        std::fs::write(&part, b"stale").unwrap();
        let discarded =
            reconcile_scratch(dir.path(), "clip.mp4", &manifest("videos/clip.mp4", 900)).unwrap();
        assert!(discarded);
        assert!(!part.exists());
    }

    #[test]
    fn clean_directory_reports_nothing_discarded() {
        let dir = tempdir().unwrap();
        let discarded =
            reconcile_scratch(dir.path(), "clip.mp4", &manifest("videos/clip.mp4", 900)).unwrap();
        assert!(!discarded);
    }
}
