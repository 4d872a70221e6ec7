//! Cancellation marker for user-initiated shutdown.
//!
//! The supervisor hands every worker a `CancellationToken` (the CLI trips it
//! on SIGINT). Workers observe it at suspension points only; a tripped token
//! surfaces as `Aborted`, which is an ordered shutdown, not a failure.

/// Error returned when a download is stopped by the user.
#[derive(Debug)]
pub struct Aborted;

impl std::fmt::Display for Aborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "download aborted by user")
    }
}

impl std::error::Error for Aborted {}
