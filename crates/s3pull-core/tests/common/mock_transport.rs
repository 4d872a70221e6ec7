//! In-memory `Transport` with programmable faults for engine tests.
//!
//! Serves a single static body. Faults are keyed by the first byte offset of
//! the requested range and consumed on first match, so a segment can be made
//! to fail exactly once and then recover.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use s3pull_core::transport::{ObjectHead, RangeBody, Transport};

const CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy)]
#[allow(dead_code)] // not every test exercises every fault
pub enum Fault {
    /// Yield this many bytes, then fail the stream with a connection reset.
    ResetAfter(u64),
    /// Report this content length instead of the real remainder.
    MisreportLength(u64),
    /// Report the full remainder but end the body after this many bytes.
    TruncateBody(u64),
    /// Yield this many bytes, then stall forever (until cancellation).
    StallAfter(u64),
    /// Fail the request before any body is produced.
    RequestError,
}

pub struct MockTransport {
    body: Vec<u8>,
    faults: Mutex<Vec<(u64, Fault)>>,
    get_calls: AtomicUsize,
    bytes_served: AtomicU64,
    ranges: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new(body: Vec<u8>) -> Self {
        MockTransport {
            body,
            faults: Mutex::new(Vec::new()),
            get_calls: AtomicUsize::new(0),
            bytes_served: AtomicU64::new(0),
            ranges: Mutex::new(Vec::new()),
        }
    }

    /// Arm a one-shot fault for the next ranged fetch starting at `range_start`.
    pub fn with_fault(self, range_start: u64, fault: Fault) -> Self {
        self.faults.lock().unwrap().push((range_start, fault));
        self
    }

    /// Number of ranged fetches issued.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Relaxed)
    }

    /// Total body bytes handed to callers (across all attempts).
    pub fn bytes_served(&self) -> u64 {
        self.bytes_served.load(Ordering::Relaxed)
    }

    /// Every range string seen, in request order.
    pub fn ranges(&self) -> Vec<String> {
        self.ranges.lock().unwrap().clone()
    }

    fn take_fault(&self, range_start: u64) -> Option<Fault> {
        let mut faults = self.faults.lock().unwrap();
        let pos = faults.iter().position(|(start, _)| *start == range_start)?;
        Some(faults.remove(pos).1)
    }
}

/// Parse an inclusive `bytes=a-b` range value.
fn parse_range(range: &str) -> Result<(u64, u64)> {
    let value = range.strip_prefix("bytes=").context("range must start with bytes=")?;
    let (a, b) = value.split_once('-').context("range must be a-b")?;
    Ok((a.parse()?, b.parse()?))
}

fn chunked(data: &[u8]) -> Vec<io::Result<Bytes>> {
    data.chunks(CHUNK)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect()
}

#[async_trait]
impl Transport for MockTransport {
    async fn head(&self, _bucket: &str, _key: &str) -> Result<ObjectHead> {
        Ok(ObjectHead { content_length: self.body.len() as u64 })
    }

    async fn get_range(&self, _bucket: &str, _key: &str, range: &str) -> Result<RangeBody> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        self.ranges.lock().unwrap().push(range.to_string());

        let (start, end_incl) = parse_range(range)?;
        if start > end_incl || end_incl >= self.body.len() as u64 {
            bail!("range {} out of bounds for {} byte body", range, self.body.len());
        }
        let full = &self.body[start as usize..=end_incl as usize];
        let remaining = full.len() as u64;

        let (reported, items, stall) = match self.take_fault(start) {
            Some(Fault::RequestError) => bail!("connection refused"),
            Some(Fault::ResetAfter(n)) => {
                let n = n.min(remaining) as usize;
                let mut items = chunked(&full[..n]);
                items.push(Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")));
                (remaining, items, false)
            }
            Some(Fault::MisreportLength(reported)) => (reported, chunked(full), false),
            Some(Fault::TruncateBody(n)) => {
                let n = n.min(remaining) as usize;
                (remaining, chunked(&full[..n]), false)
            }
            Some(Fault::StallAfter(n)) => {
                let n = n.min(remaining) as usize;
                (remaining, chunked(&full[..n]), true)
            }
            None => (remaining, chunked(full), false),
        };

        let served: u64 = items
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|b| b.len() as u64))
            .sum();
        self.bytes_served.fetch_add(served, Ordering::Relaxed);

        let base = stream::iter(items);
        let stream = if stall {
            base.chain(stream::once(futures::future::pending::<io::Result<Bytes>>()))
                .boxed()
        } else {
            base.boxed()
        };

        Ok(RangeBody { content_length: reported, stream })
    }
}
