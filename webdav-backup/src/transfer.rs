//! Upload progress reporting.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub elapsed: Duration,
    /// Set on the final callback once the body is exhausted
    pub finished: bool,
}

impl TransferProgress {
    pub fn bytes_per_second(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes_sent as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Callback for progress updates
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Stream wrapper that counts bytes passing through and reports them at
/// most once per `interval`, plus once at the end.
pub struct ProgressStream<S> {
    inner: S,
    bytes_sent: u64,
    total_bytes: u64,
    started: Instant,
    last_report: Instant,
    interval: Duration,
    callback: ProgressCallback,
}

impl<S> ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    pub fn new(inner: S, total_bytes: u64, interval: Duration, callback: ProgressCallback) -> Self {
        let now = Instant::now();
        Self {
            inner,
            bytes_sent: 0,
            total_bytes,
            started: now,
            last_report: now,
            interval,
            callback,
        }
    }

    fn snapshot(&self, finished: bool) -> TransferProgress {
        TransferProgress {
            bytes_sent: self.bytes_sent,
            total_bytes: self.total_bytes,
            elapsed: self.started.elapsed(),
            finished,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.bytes_sent += chunk.len() as u64;
                let now = Instant::now();
                if now.duration_since(self.last_report) >= self.interval {
                    self.last_report = now;
                    (self.callback)(self.snapshot(false));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                (self.callback)(self.snapshot(true));
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Human-readable size with binary units, e.g. `1.50 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

pub fn format_rate(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}
