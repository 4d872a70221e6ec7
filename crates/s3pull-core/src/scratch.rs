//! Scratch file naming and resume inspection.
//!
//! A segment's scratch file length is the authoritative resume state: bytes
//! `[0, len)` of the file hold bytes `[start, start + len)` of the object.
//! The inspector classifies a scratch file before each attempt so the worker
//! knows where the next ranged fetch must begin.

use std::path::{Path, PathBuf};

/// Path of the scratch file for segment `index`: `<dir>/<basename>.part<index>`.
pub fn scratch_path(download_dir: &Path, basename: &str, index: usize) -> PathBuf {
    download_dir.join(format!("{basename}.part{index}"))
}

/// Classification of a scratch file against its segment's expected length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchCheck {
    /// Bytes already on disk that the next attempt may build on.
    pub resume_bytes: u64,
    /// False when the file was overlong (now deleted) or could not be inspected.
    pub valid: bool,
    /// True when the on-disk length already equals the expected length.
    pub complete: bool,
}

impl ScratchCheck {
    fn absent() -> Self {
        ScratchCheck { resume_bytes: 0, valid: true, complete: false }
    }

    fn invalid() -> Self {
        ScratchCheck { resume_bytes: 0, valid: false, complete: false }
    }
}

/// Inspect a scratch file and classify it for resume.
///
/// - missing file: `resume_bytes = 0`, valid.
/// - length == expected: complete.
/// - length < expected: partial, `resume_bytes = length`.
/// - length > expected: corrupt; the file is deleted and the segment restarts
///   from zero. If the deletion itself fails the check is still invalid, and
///   the next attempt's truncating open recovers.
/// - any other filesystem error: invalid, logged, nothing deleted.
pub fn inspect_scratch(path: &Path, expected_len: u64) -> ScratchCheck {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ScratchCheck::absent(),
        Err(e) => {
            tracing::error!("failed to inspect scratch {}: {}", path.display(), e);
            return ScratchCheck::invalid();
        }
    };

    let len = meta.len();
    if len == expected_len {
        return ScratchCheck { resume_bytes: expected_len, valid: true, complete: true };
    }
    if len < expected_len {
        return ScratchCheck { resume_bytes: len, valid: true, complete: false };
    }

    tracing::error!(
        "scratch {} is {} bytes but segment expects {}; deleting and restarting",
        path.display(),
        len,
        expected_len
    );
    if let Err(e) = std::fs::remove_file(path) {
        tracing::error!("failed to delete overlong scratch {}: {}", path.display(), e);
    }
    ScratchCheck::invalid()
}
