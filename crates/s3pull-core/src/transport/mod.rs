//! Narrow transport capability consumed by the engine.
//!
//! The engine only ever needs two operations against the object store: a
//! size probe and a ranged body fetch. Keeping the seam this small lets the
//! integration tests substitute an in-memory implementation with
//! programmable faults.

pub mod s3;

pub use s3::S3Transport;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Result of a size probe.
#[derive(Debug, Clone, Copy)]
pub struct ObjectHead {
    pub content_length: u64,
}

/// A ranged fetch: the server-reported length plus the streaming body.
///
/// The reported `content_length` is advisory; the engine verifies completion
/// against the on-disk scratch length, never against this field alone.
pub struct RangeBody {
    pub content_length: u64,
    pub stream: BoxStream<'static, std::io::Result<Bytes>>,
}

/// Object-store operations the engine depends on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Size probe for the object.
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead>;

    /// Ranged fetch; `range` is an HTTP-style inclusive `bytes=a-b` value.
    async fn get_range(&self, bucket: &str, key: &str, range: &str) -> Result<RangeBody>;
}
